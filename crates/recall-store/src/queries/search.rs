use crate::queries::observation::{OBSERVATION_COLUMNS, observation_from_row};
use crate::records::{ObservationRow, ProjectStat, StoreStats};
use crate::{Database, Error, Result};
use rusqlite::params;

impl Database {
    /// Substring search over title, subtitle, narrative, and body.
    /// Vector search is the primary retrieval path; this backs the UI's
    /// plain-text filter and the MCP search fallback.
    pub fn search_by_text(
        &self,
        query: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObservationRow>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut rows = Vec::new();

        if let Some(project) = project {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM observations \
                 WHERE project = ?1 AND (title LIKE ?2 ESCAPE '\\' \
                    OR subtitle LIKE ?2 ESCAPE '\\' \
                    OR narrative LIKE ?2 ESCAPE '\\' \
                    OR body LIKE ?2 ESCAPE '\\') \
                 ORDER BY id DESC LIMIT ?3",
                OBSERVATION_COLUMNS
            ))?;
            let mapped =
                stmt.query_map(params![project, pattern, limit as i64], observation_from_row)?;
            for row in mapped {
                rows.push(row?);
            }
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM observations \
                 WHERE title LIKE ?1 ESCAPE '\\' \
                    OR subtitle LIKE ?1 ESCAPE '\\' \
                    OR narrative LIKE ?1 ESCAPE '\\' \
                    OR body LIKE ?1 ESCAPE '\\' \
                 ORDER BY id DESC LIMIT ?2",
                OBSERVATION_COLUMNS
            ))?;
            let mapped = stmt.query_map(params![pattern, limit as i64], observation_from_row)?;
            for row in mapped {
                rows.push(row?);
            }
        }
        Ok(rows)
    }

    /// The anchor observation with up to `radius` id-ordered neighbors on
    /// each side, oldest first. Radius is clamped to a sane bound.
    pub fn get_timeline(&self, anchor_id: i64, radius: usize) -> Result<Vec<ObservationRow>> {
        let radius = radius.min(50) as i64;

        let anchor = self
            .get_observation(anchor_id)?
            .ok_or_else(|| Error::Query(format!("no observation with id {}", anchor_id)))?;

        let mut before = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM observations WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
                OBSERVATION_COLUMNS
            ))?;
            let mapped = stmt.query_map(params![anchor_id, radius], observation_from_row)?;
            mapped.collect::<std::result::Result<Vec<_>, _>>()?
        };
        before.reverse();

        let after = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM observations WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
                OBSERVATION_COLUMNS
            ))?;
            let mapped = stmt.query_map(params![anchor_id, radius], observation_from_row)?;
            mapped.collect::<std::result::Result<Vec<_>, _>>()?
        };

        before.push(anchor);
        before.extend(after);
        Ok(before)
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectStat>> {
        let mut stmt = self.conn.prepare(
            "SELECT project, COUNT(*), MAX(created_at_epoch) \
             FROM observations GROUP BY project ORDER BY MAX(created_at_epoch) DESC",
        )?;
        let stats = stmt
            .query_map([], |row| {
                Ok(ProjectStat {
                    project: row.get(0)?,
                    observation_count: row.get(1)?,
                    last_epoch: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        Ok(StoreStats {
            session_count: count("SELECT COUNT(*) FROM sessions")?,
            observation_count: count("SELECT COUNT(*) FROM observations")?,
            summary_count: count("SELECT COUNT(*) FROM session_summaries")?,
            prompt_count: count("SELECT COUNT(*) FROM user_prompts")?,
            pending_count: count(
                "SELECT COUNT(*) FROM pending_messages WHERE processed_at IS NULL",
            )?,
            projects: self.list_projects()?,
        })
    }
}
