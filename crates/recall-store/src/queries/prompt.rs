use crate::records::{NewUserPrompt, StoredId, UserPromptRow};
use crate::{Database, Result};
use rusqlite::{OptionalExtension, Row, params};

fn prompt_from_row(row: &Row<'_>) -> rusqlite::Result<UserPromptRow> {
    Ok(UserPromptRow {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        project: row.get(2)?,
        prompt_number: row.get(3)?,
        prompt_text: row.get(4)?,
        created_at_epoch: row.get(5)?,
    })
}

const PROMPT_COLUMNS: &str =
    "id, content_session_id, project, prompt_number, prompt_text, created_at_epoch";

impl Database {
    pub fn store_user_prompt(&self, prompt: &NewUserPrompt) -> Result<StoredId> {
        self.conn.execute(
            r#"
            INSERT INTO user_prompts
                (content_session_id, project, prompt_number, prompt_text, created_at_epoch)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                prompt.content_session_id,
                prompt.project,
                prompt.prompt_number,
                prompt.prompt_text,
                prompt.created_at_epoch,
            ],
        )?;
        Ok(StoredId {
            id: self.conn.last_insert_rowid(),
            imported: true,
        })
    }

    pub fn get_user_prompt(&self, id: i64) -> Result<Option<UserPromptRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM user_prompts WHERE id = ?1", PROMPT_COLUMNS),
                [id],
                prompt_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_prompts_for_session(
        &self,
        content_session_id: &str,
    ) -> Result<Vec<UserPromptRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM user_prompts WHERE content_session_id = ?1 ORDER BY prompt_number ASC",
            PROMPT_COLUMNS
        ))?;
        let rows = stmt
            .query_map([content_session_id], prompt_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_prompt_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM user_prompts ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
