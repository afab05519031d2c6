use crate::Result;
use rusqlite::Connection;
use std::path::Path;

// NOTE: Storage Design Rationale
//
// Why one writer connection for the worker's lifetime?
// - SQLite serializes writes anyway; a single connection makes the ordering
//   guarantee explicit and keeps the WAL small
// - Readers (UI polling, MCP search) see snapshot-isolated state under WAL
//
// Why a natural dedup key instead of content hashing?
// - (memory_session_id, title, created_at_epoch) survives re-import from a
//   replicated snapshot without carrying a separate hash column
// - Collisions are answered with the existing row id, so import is idempotent
//
// Why JSON-encoded list columns (facts, concepts, files)?
// - The lists are opaque to SQL; they are only unpacked at the API edge
// - Avoids three join tables for data that is always read as a unit

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5_000)?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_session_id TEXT NOT NULL UNIQUE,
                memory_session_id TEXT,
                project TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                started_at TEXT NOT NULL,
                user_prompt TEXT NOT NULL DEFAULT '',
                prompt_counter INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER,
                content_session_id TEXT,
                memory_session_id TEXT NOT NULL,
                project TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'discovery',
                title TEXT NOT NULL,
                subtitle TEXT,
                narrative TEXT,
                body TEXT,
                facts TEXT NOT NULL DEFAULT '[]',
                concepts TEXT NOT NULL DEFAULT '[]',
                files_read TEXT NOT NULL DEFAULT '[]',
                files_modified TEXT NOT NULL DEFAULT '[]',
                prompt_number INTEGER NOT NULL DEFAULT 0,
                created_at_epoch INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER,
                memory_session_id TEXT NOT NULL UNIQUE,
                project TEXT NOT NULL,
                request TEXT,
                investigated TEXT,
                learned TEXT,
                completed TEXT,
                next_steps TEXT,
                notes TEXT,
                created_at_epoch INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_prompts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content_session_id TEXT NOT NULL,
                project TEXT,
                prompt_number INTEGER NOT NULL,
                prompt_text TEXT NOT NULL,
                created_at_epoch INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pending_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                tool_name TEXT,
                tool_input TEXT,
                tool_response TEXT,
                prompt_number INTEGER NOT NULL DEFAULT 0,
                cwd TEXT,
                last_assistant_message TEXT,
                enqueued_at TEXT NOT NULL,
                in_flight INTEGER NOT NULL DEFAULT 0,
                processed_at TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_obs_dedup
                ON observations(memory_session_id, title, created_at_epoch);
            CREATE INDEX IF NOT EXISTS idx_obs_project ON observations(project);
            CREATE INDEX IF NOT EXISTS idx_obs_memory_session ON observations(memory_session_id);
            CREATE INDEX IF NOT EXISTS idx_obs_epoch ON observations(created_at_epoch DESC);
            CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);
            CREATE INDEX IF NOT EXISTS idx_prompts_session ON user_prompts(content_session_id);
            CREATE INDEX IF NOT EXISTS idx_pending_session
                ON pending_messages(session_id, processed_at);
            "#,
        )?;

        Ok(())
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute("VACUUM", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initialization() {
        let db = Database::open_in_memory().unwrap();
        // init twice must be idempotent
        db.init_schema().unwrap();
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/recall.db");
        let _db = Database::open(&path).unwrap();
        assert!(path.exists());
    }
}
