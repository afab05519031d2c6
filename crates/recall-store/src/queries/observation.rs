use crate::records::{NewObservation, ObservationRow, StoredId};
use crate::{Database, Result};
use recall_types::{ObservationType, ParsedObservation};
use rusqlite::{OptionalExtension, Row, params};

pub(crate) fn observation_from_row(row: &Row<'_>) -> rusqlite::Result<ObservationRow> {
    let kind: String = row.get(5)?;
    let facts: String = row.get(10)?;
    let concepts: String = row.get(11)?;
    let files_read: String = row.get(12)?;
    let files_modified: String = row.get(13)?;

    Ok(ObservationRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        content_session_id: row.get(2)?,
        memory_session_id: row.get(3)?,
        project: row.get(4)?,
        observation: ParsedObservation {
            kind: ObservationType::parse_lenient(&kind),
            title: row.get(6)?,
            subtitle: row.get(7)?,
            narrative: row.get(8)?,
            text: row.get(9)?,
            facts: serde_json::from_str(&facts).unwrap_or_default(),
            concepts: serde_json::from_str(&concepts).unwrap_or_default(),
            files_read: serde_json::from_str(&files_read).unwrap_or_default(),
            files_modified: serde_json::from_str(&files_modified).unwrap_or_default(),
        },
        prompt_number: row.get(14)?,
        created_at_epoch: row.get(15)?,
    })
}

pub(crate) const OBSERVATION_COLUMNS: &str =
    "id, session_id, content_session_id, memory_session_id, project, kind, title, subtitle, \
     narrative, body, facts, concepts, files_read, files_modified, prompt_number, created_at_epoch";

impl Database {
    /// Store a batch of observations, one StoredId per input in order.
    /// The `(memory_session_id, title, created_at_epoch)` dedup rule applies:
    /// a duplicate tuple returns the existing id with `imported = false`.
    pub fn store_observations(&self, batch: &[NewObservation]) -> Result<Vec<StoredId>> {
        batch.iter().map(|obs| self.store_observation(obs)).collect()
    }

    pub fn store_observation(&self, obs: &NewObservation) -> Result<StoredId> {
        let parsed = &obs.observation;
        let inserted = self.conn.execute(
            r#"
            INSERT INTO observations
                (session_id, content_session_id, memory_session_id, project, kind, title,
                 subtitle, narrative, body, facts, concepts, files_read, files_modified,
                 prompt_number, created_at_epoch)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(memory_session_id, title, created_at_epoch) DO NOTHING
            "#,
            params![
                obs.session_id,
                obs.content_session_id,
                obs.memory_session_id,
                obs.project,
                parsed.kind.as_str(),
                parsed.title,
                parsed.subtitle,
                parsed.narrative,
                parsed.text,
                serde_json::to_string(&parsed.facts).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&parsed.concepts).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&parsed.files_read).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&parsed.files_modified).unwrap_or_else(|_| "[]".to_string()),
                obs.prompt_number,
                obs.created_at_epoch,
            ],
        )?;

        if inserted == 1 {
            return Ok(StoredId {
                id: self.conn.last_insert_rowid(),
                imported: true,
            });
        }

        // Dedup collision: hand back the existing row id.
        let id = self.conn.query_row(
            "SELECT id FROM observations \
             WHERE memory_session_id = ?1 AND title = ?2 AND created_at_epoch = ?3",
            params![obs.memory_session_id, parsed.title, obs.created_at_epoch],
            |row| row.get(0),
        )?;
        Ok(StoredId { id, imported: false })
    }

    /// Store an externally-shaped observation with its original timestamp.
    /// Same dedup rule as `store_observation`; used by the migration pipeline.
    pub fn import_observation(&self, obs: &NewObservation) -> Result<StoredId> {
        self.store_observation(obs)
    }

    pub fn get_observation(&self, id: i64) -> Result<Option<ObservationRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM observations WHERE id = ?1", OBSERVATION_COLUMNS),
                [id],
                observation_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_observations_by_ids(&self, ids: &[i64]) -> Result<Vec<ObservationRow>> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = self.get_observation(*id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn list_observations(
        &self,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObservationRow>> {
        let mut rows = Vec::new();
        if let Some(project) = project {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM observations WHERE project = ?1 ORDER BY id DESC LIMIT ?2",
                OBSERVATION_COLUMNS
            ))?;
            let mapped = stmt.query_map(params![project, limit as i64], observation_from_row)?;
            for row in mapped {
                rows.push(row?);
            }
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM observations ORDER BY id DESC LIMIT ?1",
                OBSERVATION_COLUMNS
            ))?;
            let mapped = stmt.query_map([limit as i64], observation_from_row)?;
            for row in mapped {
                rows.push(row?);
            }
        }
        Ok(rows)
    }

    /// All observation ids with their memory session, for vector backfill.
    pub fn list_observation_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM observations ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_types::ObservationType;

    fn sample(memory_session_id: &str, title: &str, epoch: i64) -> NewObservation {
        NewObservation {
            session_id: None,
            content_session_id: None,
            memory_session_id: memory_session_id.to_string(),
            project: "recall".to_string(),
            observation: ParsedObservation {
                kind: ObservationType::Discovery,
                title: title.to_string(),
                narrative: Some("found the schema".to_string()),
                facts: vec!["uses WAL".to_string()],
                ..Default::default()
            },
            prompt_number: 1,
            created_at_epoch: epoch,
        }
    }

    #[test]
    fn test_dedup_returns_existing_id() {
        let db = Database::open_in_memory().unwrap();
        let obs = sample("mem-1", "Schema discovered", 1_000);

        let first = db.store_observation(&obs).unwrap();
        let second = db.import_observation(&obs).unwrap();

        assert!(first.imported);
        assert!(!second.imported);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_distinct_tuples_are_distinct_rows() {
        let db = Database::open_in_memory().unwrap();

        let a = db.store_observation(&sample("mem-1", "t", 1_000)).unwrap();
        let b = db.store_observation(&sample("mem-1", "t", 2_000)).unwrap();
        let c = db.store_observation(&sample("mem-2", "t", 1_000)).unwrap();

        assert!(a.imported && b.imported && c.imported);
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_round_trip_preserves_lists() {
        let db = Database::open_in_memory().unwrap();
        let mut obs = sample("mem-1", "lists", 1_000);
        obs.observation.files_read = vec!["/tmp/a.rs".to_string(), "/tmp/b.rs".to_string()];
        obs.observation.concepts = vec!["sqlite".to_string()];

        let stored = db.store_observation(&obs).unwrap();
        let row = db.get_observation(stored.id).unwrap().unwrap();

        assert_eq!(row.observation.files_read, obs.observation.files_read);
        assert_eq!(row.observation.concepts, obs.observation.concepts);
        assert_eq!(row.observation.kind, ObservationType::Discovery);
    }

    #[test]
    fn test_batch_preserves_order() {
        let db = Database::open_in_memory().unwrap();
        let batch = vec![
            sample("mem-1", "first", 1),
            sample("mem-1", "second", 2),
            sample("mem-1", "first", 1), // duplicate of [0]
        ];

        let stored = db.store_observations(&batch).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored[0].imported);
        assert!(stored[1].imported);
        assert!(!stored[2].imported);
        assert_eq!(stored[0].id, stored[2].id);
    }
}
