use crate::paths::ServiceDirs;
use crate::{Error, Result};
use recall_types::util;
use recall_vector::SharedStore;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Snapshot of the embedded vector database
    Sqlite,
    /// Vector snapshot plus the full relational database
    Full,
    /// Observations and summaries as a JSON document
    Json,
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub files: Vec<PathBuf>,
}

/// Fold outstanding WAL pages into the main database file so a plain file
/// copy is a complete snapshot. Best-effort: a database another process has
/// locked, or a file that is not SQLite at all, is copied as-is.
pub(crate) fn checkpoint_for_copy(path: &Path) {
    if !path.exists() {
        return;
    }
    match rusqlite::Connection::open(path) {
        Ok(conn) => {
            let result =
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_row| Ok(()));
            if let Err(err) = result {
                debug!("wal checkpoint on {} skipped: {}", path.display(), err);
            }
        }
        Err(err) => debug!("wal checkpoint on {} skipped: {}", path.display(), err),
    }
}

/// Copy databases (or dump JSON) into the output directory. Defaults to the
/// replication workspace under the service directory.
pub fn run_export(
    dirs: &ServiceDirs,
    store: &SharedStore,
    format: ExportFormat,
    output: Option<PathBuf>,
    project: Option<&str>,
    no_vectors: bool,
) -> Result<ExportReport> {
    let out_dir = output.unwrap_or_else(|| dirs.export_dir());
    std::fs::create_dir_all(&out_dir)?;

    let mut files = Vec::new();

    let copy_vectors = |files: &mut Vec<PathBuf>| -> Result<()> {
        if no_vectors {
            return Ok(());
        }
        let source = dirs.vectors_db();
        if !source.exists() {
            return Err(Error::Config(format!(
                "no vector database at {}",
                source.display()
            )));
        }
        checkpoint_for_copy(&source);
        let target = out_dir.join("vectors.db");
        std::fs::copy(&source, &target)?;
        files.push(target);
        Ok(())
    };

    match format {
        ExportFormat::Sqlite => {
            copy_vectors(&mut files)?;
        }
        ExportFormat::Full => {
            copy_vectors(&mut files)?;
            let source = dirs.store_db();
            if source.exists() {
                checkpoint_for_copy(&source);
                let target = out_dir.join("full-export.db");
                std::fs::copy(&source, &target)?;
                files.push(target);
            }
        }
        ExportFormat::Json => {
            let (observations, stats) = {
                let store = store.lock().unwrap();
                (
                    store.list_observations(project, i64::MAX as usize)?,
                    store.stats()?,
                )
            };
            let document = json!({
                "exported_at": util::now_rfc3339(),
                "project": project,
                "observation_count": observations.len(),
                "stats": stats,
                "observations": observations,
            });
            let target = out_dir.join("export.json");
            std::fs::write(&target, serde_json::to_string_pretty(&document)?)?;
            files.push(target);
        }
    }

    info!("exported {} file(s) to {}", files.len(), out_dir.display());
    Ok(ExportReport { files })
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_store::{Database, NewObservation};
    use recall_types::ParsedObservation;
    use recall_vector::{EmbeddedVecBackend, HashEmbedder, ObservationSync, VectorBackend};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn seeded_store(dirs: &ServiceDirs, count: i64) -> SharedStore {
        let db = Database::open(&dirs.store_db()).unwrap();
        for i in 0..count {
            db.store_observation(&NewObservation {
                session_id: None,
                content_session_id: None,
                memory_session_id: "mem-1".to_string(),
                project: "recall".to_string(),
                observation: ParsedObservation {
                    title: format!("observation {i}"),
                    narrative: Some(format!("narrative {i}")),
                    ..Default::default()
                },
                prompt_number: 0,
                created_at_epoch: i,
            })
            .unwrap();
        }
        Arc::new(Mutex::new(db))
    }

    #[tokio::test]
    async fn test_sqlite_export_contains_all_documents() {
        let temp = TempDir::new().unwrap();
        let dirs = ServiceDirs::at(temp.path());
        dirs.ensure_layout().unwrap();
        let store = seeded_store(&dirs, 10);

        // index all ten observations into the embedded backend
        let backend =
            EmbeddedVecBackend::new(&dirs.vectors_db(), Arc::new(HashEmbedder::new(16)), 16)
                .unwrap();
        backend.initialize().await.unwrap();
        for id in store.lock().unwrap().list_observation_ids().unwrap() {
            let row = store.lock().unwrap().get_observation(id).unwrap().unwrap();
            backend
                .sync_observation(&ObservationSync::from(&row))
                .await
                .unwrap();
        }
        drop(backend);

        let report = run_export(&dirs, &store, ExportFormat::Sqlite, None, None, false).unwrap();
        assert_eq!(report.files.len(), 1);
        let exported = &report.files[0];
        assert!(exported.exists());
        assert!(std::fs::metadata(exported).unwrap().len() > 0);

        let conn = rusqlite::Connection::open(exported).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vector_documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 10);
    }

    #[test]
    fn test_json_export_respects_project_filter() {
        let temp = TempDir::new().unwrap();
        let dirs = ServiceDirs::at(temp.path());
        dirs.ensure_layout().unwrap();
        let store = seeded_store(&dirs, 3);

        let report = run_export(
            &dirs,
            &store,
            ExportFormat::Json,
            None,
            Some("recall"),
            true,
        )
        .unwrap();
        let content = std::fs::read_to_string(&report.files[0]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["observation_count"], 3);

        let empty = run_export(
            &dirs,
            &store,
            ExportFormat::Json,
            None,
            Some("other"),
            true,
        )
        .unwrap();
        let content = std::fs::read_to_string(&empty.files[0]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["observation_count"], 0);
    }

    #[test]
    fn test_sqlite_export_without_vectors_db_errors() {
        let temp = TempDir::new().unwrap();
        let dirs = ServiceDirs::at(temp.path());
        dirs.ensure_layout().unwrap();
        let store = seeded_store(&dirs, 1);

        let err =
            run_export(&dirs, &store, ExportFormat::Sqlite, None, None, false).unwrap_err();
        assert!(err.to_string().contains("no vector database"));
    }
}
