use crate::records::SessionRow;
use crate::{Database, Error, Result};
use recall_types::{SessionStatus, util};
use rusqlite::{OptionalExtension, Row, params};

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    let status: String = row.get(4)?;
    Ok(SessionRow {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        memory_session_id: row.get(2)?,
        project: row.get(3)?,
        status: SessionStatus::parse(&status).unwrap_or_default(),
        started_at: row.get(5)?,
        user_prompt: row.get(6)?,
        prompt_counter: row.get(7)?,
    })
}

const SESSION_COLUMNS: &str = "id, content_session_id, memory_session_id, project, status, \
     started_at, user_prompt, prompt_counter";

impl Database {
    /// Create the session row for a host session, or return the existing one.
    /// Idempotent on `content_session_id`.
    pub fn create_session(
        &self,
        content_session_id: &str,
        project: &str,
        user_prompt: &str,
    ) -> Result<SessionRow> {
        self.conn.execute(
            r#"
            INSERT INTO sessions (content_session_id, project, status, started_at, user_prompt)
            VALUES (?1, ?2, 'active', ?3, ?4)
            ON CONFLICT(content_session_id) DO NOTHING
            "#,
            params![content_session_id, project, util::now_rfc3339(), user_prompt],
        )?;

        self.get_session_by_content_id(content_session_id)?
            .ok_or_else(|| Error::Query(format!("session vanished: {}", content_session_id)))
    }

    pub fn get_session(&self, session_db_id: i64) -> Result<Option<SessionRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                [session_db_id],
                session_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_session_by_content_id(
        &self,
        content_session_id: &str,
    ) -> Result<Option<SessionRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE content_session_id = ?1",
                    SESSION_COLUMNS
                ),
                [content_session_id],
                session_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Assign the extractor's session identifier. At most once: a second call
    /// with the same value is a no-op, a different value is an error.
    pub fn update_memory_session_id(
        &self,
        session_db_id: i64,
        memory_session_id: &str,
    ) -> Result<()> {
        let existing: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT memory_session_id FROM sessions WHERE id = ?1",
                [session_db_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => Err(Error::Query(format!("no session with id {}", session_db_id))),
            Some(Some(current)) if current != memory_session_id => Err(Error::Query(format!(
                "memory_session_id already set to '{}', refusing '{}'",
                current, memory_session_id
            ))),
            Some(Some(_)) => Ok(()),
            Some(None) => {
                self.conn.execute(
                    "UPDATE sessions SET memory_session_id = ?2 WHERE id = ?1",
                    params![session_db_id, memory_session_id],
                )?;
                Ok(())
            }
        }
    }

    /// Bump and return the monotone turn counter for a session.
    pub fn next_prompt_number(&self, session_db_id: i64) -> Result<i64> {
        self.conn.execute(
            "UPDATE sessions SET prompt_counter = prompt_counter + 1 WHERE id = ?1",
            [session_db_id],
        )?;
        let counter = self.conn.query_row(
            "SELECT prompt_counter FROM sessions WHERE id = ?1",
            [session_db_id],
            |row| row.get(0),
        )?;
        Ok(counter)
    }

    pub fn mark_session_completed(&self, session_db_id: i64) -> Result<()> {
        self.set_status(session_db_id, SessionStatus::Completed)
    }

    pub fn mark_session_failed(&self, session_db_id: i64) -> Result<()> {
        self.set_status(session_db_id, SessionStatus::Failed)
    }

    fn set_status(&self, session_db_id: i64, status: SessionStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE sessions SET status = ?2 WHERE id = ?1",
            params![session_db_id, status.as_str()],
        )?;
        if changed == 0 {
            return Err(Error::Query(format!("no session with id {}", session_db_id)));
        }
        Ok(())
    }

    pub fn list_sessions(&self, project: Option<&str>, limit: usize) -> Result<Vec<SessionRow>> {
        let mut rows = Vec::new();
        if let Some(project) = project {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM sessions WHERE project = ?1 ORDER BY id DESC LIMIT ?2",
                SESSION_COLUMNS
            ))?;
            let mapped = stmt.query_map(params![project, limit as i64], session_from_row)?;
            for row in mapped {
                rows.push(row?);
            }
        } else {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM sessions ORDER BY id DESC LIMIT ?1",
                SESSION_COLUMNS
            ))?;
            let mapped = stmt.query_map([limit as i64], session_from_row)?;
            for row in mapped {
                rows.push(row?);
            }
        }
        Ok(rows)
    }
}
