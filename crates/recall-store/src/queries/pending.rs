use crate::records::PendingMessageRow;
use crate::{Database, Result};
use recall_types::{PendingKind, util};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

fn pending_from_row(row: &Row<'_>) -> rusqlite::Result<PendingMessageRow> {
    let kind: String = row.get(2)?;
    Ok(PendingMessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: PendingKind::parse(&kind).unwrap_or(PendingKind::Observation),
        tool_name: row.get(3)?,
        tool_input: row.get(4)?,
        tool_response: row.get(5)?,
        prompt_number: row.get(6)?,
        cwd: row.get(7)?,
        last_assistant_message: row.get(8)?,
        enqueued_at: row.get(9)?,
        processed_at: row.get(10)?,
    })
}

const PENDING_COLUMNS: &str = "id, session_id, kind, tool_name, tool_input, tool_response, \
     prompt_number, cwd, last_assistant_message, enqueued_at, processed_at";

impl Database {
    pub fn enqueue_observation_message(
        &self,
        session_db_id: i64,
        tool_name: &str,
        tool_input: &Value,
        tool_response: &Value,
        prompt_number: i64,
        cwd: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO pending_messages
                (session_id, kind, tool_name, tool_input, tool_response, prompt_number, cwd, enqueued_at)
            VALUES (?1, 'observation', ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                session_db_id,
                tool_name,
                tool_input.to_string(),
                tool_response.to_string(),
                prompt_number,
                cwd,
                util::now_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn enqueue_summary_message(
        &self,
        session_db_id: i64,
        prompt_number: i64,
        last_assistant_message: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO pending_messages
                (session_id, kind, prompt_number, last_assistant_message, enqueued_at)
            VALUES (?1, 'summarize', ?2, ?3, ?4)
            "#,
            params![
                session_db_id,
                prompt_number,
                last_assistant_message,
                util::now_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Pop the oldest unprocessed message for a session, marking it in-flight.
    /// The in-flight marker is a crash breadcrumb, not a lock: the single
    /// generator per session is the only consumer.
    pub fn next_pending(&self, session_db_id: i64) -> Result<Option<PendingMessageRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM pending_messages \
                     WHERE session_id = ?1 AND processed_at IS NULL \
                     ORDER BY id ASC LIMIT 1",
                    PENDING_COLUMNS
                ),
                [session_db_id],
                pending_from_row,
            )
            .optional()?;

        if let Some(message) = &row {
            self.conn.execute(
                "UPDATE pending_messages SET in_flight = 1 WHERE id = ?1",
                [message.id],
            )?;
        }
        Ok(row)
    }

    /// Transition processed_at exactly once. Returns false if the row was
    /// already processed (or does not exist).
    pub fn mark_processed(&self, message_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE pending_messages SET processed_at = ?2, in_flight = 0 \
             WHERE id = ?1 AND processed_at IS NULL",
            params![message_id, util::now_rfc3339()],
        )?;
        Ok(changed == 1)
    }

    pub fn count_pending(&self, session_db_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_messages \
             WHERE session_id = ?1 AND processed_at IS NULL",
            [session_db_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Clear in-flight markers left by a generator that died mid-consume.
    /// Called once at worker start; the rows become consumable again.
    pub fn reset_stuck_messages(&self) -> Result<usize> {
        let reset = self.conn.execute(
            "UPDATE pending_messages SET in_flight = 0 \
             WHERE in_flight = 1 AND processed_at IS NULL",
            [],
        )?;
        Ok(reset)
    }

    /// Drop consumed queue rows processed before the cutoff.
    pub fn cleanup_processed(&self, before_rfc3339: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM pending_messages \
             WHERE processed_at IS NOT NULL AND processed_at < ?1",
            [before_rfc3339],
        )?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(db: &Database) -> i64 {
        db.create_session("sess-001", "recall", "").unwrap().id
    }

    #[test]
    fn test_pending_drains_in_enqueue_order() {
        let db = Database::open_in_memory().unwrap();
        let sid = session(&db);

        for i in 0..3 {
            db.enqueue_observation_message(
                sid,
                "Read",
                &json!({"file_path": format!("/tmp/{i}.rs")}),
                &json!({"ok": true}),
                1,
                Some("/tmp"),
            )
            .unwrap();
        }

        let mut seen = Vec::new();
        while let Some(message) = db.next_pending(sid).unwrap() {
            seen.push(message.tool_input_json()["file_path"].as_str().unwrap().to_string());
            assert!(db.mark_processed(message.id).unwrap());
        }
        assert_eq!(seen, vec!["/tmp/0.rs", "/tmp/1.rs", "/tmp/2.rs"]);
        assert_eq!(db.count_pending(sid).unwrap(), 0);
    }

    #[test]
    fn test_mark_processed_is_exactly_once() {
        let db = Database::open_in_memory().unwrap();
        let sid = session(&db);
        let id = db
            .enqueue_summary_message(sid, 1, Some("done"))
            .unwrap();

        assert!(db.mark_processed(id).unwrap());
        assert!(!db.mark_processed(id).unwrap());
    }

    #[test]
    fn test_reset_stuck_messages_resurrects_in_flight_rows() {
        let db = Database::open_in_memory().unwrap();
        let sid = session(&db);
        db.enqueue_observation_message(sid, "Bash", &json!({}), &json!({}), 1, None)
            .unwrap();

        // simulate a crash mid-consume: popped but never marked processed
        let message = db.next_pending(sid).unwrap().unwrap();
        drop(message);

        assert_eq!(db.reset_stuck_messages().unwrap(), 1);
        // the row is still consumable
        assert!(db.next_pending(sid).unwrap().is_some());
    }

    #[test]
    fn test_cleanup_processed() {
        let db = Database::open_in_memory().unwrap();
        let sid = session(&db);
        let id = db.enqueue_summary_message(sid, 1, None).unwrap();
        db.mark_processed(id).unwrap();

        assert_eq!(db.cleanup_processed("9999-01-01T00:00:00Z").unwrap(), 1);
        assert_eq!(db.cleanup_processed("9999-01-01T00:00:00Z").unwrap(), 0);
    }
}
