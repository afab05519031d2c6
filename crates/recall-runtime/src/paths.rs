use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment override for the service directory.
pub const PLUGIN_ROOT_ENV: &str = "CLAUDE_PLUGIN_ROOT";

pub const DEFAULT_PORT: u16 = 37777;

/// Layout of the per-machine state directory:
///
/// ```text
/// <root>/
///   claude-mem.db      relational store
///   vectors.db         embedded vector store (backend = sqlite-vec)
///   vector-db/         collection-service data dir (backend = chroma)
///   export/            replication workspace (git-managed)
///   settings.json
///   logs/
/// ```
#[derive(Debug, Clone)]
pub struct ServiceDirs {
    root: PathBuf,
}

impl ServiceDirs {
    /// Resolution order: the environment override, then the standalone
    /// directory under the user's home, then the marketplace install
    /// location. The first existing location wins; with none existing the
    /// standalone directory is created.
    pub fn resolve() -> Result<Self> {
        if let Ok(root) = std::env::var(PLUGIN_ROOT_ENV) {
            let root = PathBuf::from(root);
            if root.exists() {
                return Ok(Self { root });
            }
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("no home directory on this system".to_string()))?;

        let standalone = home.join(".memory-service");
        if standalone.exists() {
            return Ok(Self { root: standalone });
        }

        let marketplace = home.join(".claude/plugins/marketplace/memory-service");
        if marketplace.exists() {
            return Ok(Self { root: marketplace });
        }

        std::fs::create_dir_all(&standalone)?;
        Ok(Self { root: standalone })
    }

    /// Pin the service directory explicitly (tests, `--dir` override).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_db(&self) -> PathBuf {
        self.root.join("claude-mem.db")
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join("vectors.db")
    }

    pub fn vector_service_dir(&self) -> PathBuf {
        self.root.join("vector-db")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.root.join("export")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn worker_log(&self) -> PathBuf {
        self.logs_dir().join("worker.log")
    }

    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let dirs = ServiceDirs::at(temp.path());

        assert_eq!(dirs.store_db(), temp.path().join("claude-mem.db"));
        assert_eq!(dirs.vectors_db(), temp.path().join("vectors.db"));
        assert_eq!(dirs.settings_file(), temp.path().join("settings.json"));

        dirs.ensure_layout().unwrap();
        assert!(dirs.logs_dir().exists());
    }
}
