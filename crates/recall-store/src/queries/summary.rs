use crate::records::{StoredId, SummaryRow};
use crate::{Database, Result};
use recall_types::ParsedSummary;
use rusqlite::{OptionalExtension, Row, params};

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok(SummaryRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        memory_session_id: row.get(2)?,
        project: row.get(3)?,
        summary: ParsedSummary {
            request: row.get(4)?,
            investigated: row.get(5)?,
            learned: row.get(6)?,
            completed: row.get(7)?,
            next_steps: row.get(8)?,
            notes: row.get(9)?,
        },
        created_at_epoch: row.get(10)?,
    })
}

const SUMMARY_COLUMNS: &str = "id, session_id, memory_session_id, project, request, investigated, \
     learned, completed, next_steps, notes, created_at_epoch";

impl Database {
    /// Store the per-session roll-up. At most one row per memory session: a
    /// re-store updates the fields in place and reports `imported = false`.
    pub fn store_summary(
        &self,
        session_id: Option<i64>,
        memory_session_id: &str,
        project: &str,
        summary: &ParsedSummary,
        created_at_epoch: i64,
    ) -> Result<StoredId> {
        self.conn.execute(
            r#"
            INSERT INTO session_summaries
                (session_id, memory_session_id, project, request, investigated, learned,
                 completed, next_steps, notes, created_at_epoch)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(memory_session_id) DO UPDATE SET
                request = ?4,
                investigated = ?5,
                learned = ?6,
                completed = ?7,
                next_steps = ?8,
                notes = ?9
            "#,
            params![
                session_id,
                memory_session_id,
                project,
                summary.request,
                summary.investigated,
                summary.learned,
                summary.completed,
                summary.next_steps,
                summary.notes,
                created_at_epoch,
            ],
        )?;

        let (id, created): (i64, i64) = self.conn.query_row(
            "SELECT id, created_at_epoch FROM session_summaries WHERE memory_session_id = ?1",
            [memory_session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoredId {
            id,
            imported: created == created_at_epoch,
        })
    }

    pub fn get_summary(&self, id: i64) -> Result<Option<SummaryRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM session_summaries WHERE id = ?1", SUMMARY_COLUMNS),
                [id],
                summary_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_summary_for_session(&self, memory_session_id: &str) -> Result<Option<SummaryRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM session_summaries WHERE memory_session_id = ?1",
                    SUMMARY_COLUMNS
                ),
                [memory_session_id],
                summary_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_summary_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM session_summaries ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
