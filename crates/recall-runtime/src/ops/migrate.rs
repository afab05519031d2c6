use crate::Result;
use recall_store::NewObservation;
use recall_vector::SharedStore;
use recall_vector::adapter::SchemaAdapter;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// Options for one migration run. Deduplication is entirely the store's
/// `(memory_session_id, title, created_at_epoch)` key; the pipeline only
/// counts what the store reports.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub target_project: String,
    pub memory_session_id: Option<String>,
    pub batch_size: usize,
    pub continue_on_error: bool,
    pub dry_run: bool,
}

impl MigrationOptions {
    pub fn new(target_project: &str) -> Self {
        Self {
            target_project: target_project.to_string(),
            memory_session_id: None,
            batch_size: 100,
            continue_on_error: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigratedRecord {
    pub index: usize,
    pub external_id: Option<String>,
    pub id: Option<i64>,
    pub imported: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub total: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub records: Vec<MigratedRecord>,
    pub duration_ms: u128,
}

/// Normalize foreign records through the adapter and import them in batches.
pub fn migrate_batch(
    store: &SharedStore,
    adapter: &SchemaAdapter,
    externals: &[Value],
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    let started = Instant::now();
    let memory_session_id = options
        .memory_session_id
        .clone()
        .unwrap_or_else(|| format!("import-{}", adapter.id));

    let mut report = MigrationReport {
        total: externals.len(),
        imported: 0,
        duplicates: 0,
        errors: 0,
        records: Vec::with_capacity(externals.len()),
        duration_ms: 0,
    };

    'outer: for chunk_start in (0..externals.len()).step_by(options.batch_size.max(1)) {
        let chunk_end = (chunk_start + options.batch_size.max(1)).min(externals.len());

        // one store lock per chunk, not per record
        let store = store.lock().unwrap();
        for (offset, external) in externals[chunk_start..chunk_end].iter().enumerate() {
            let index = chunk_start + offset;

            let normalized = match adapter.transform(external) {
                Ok(normalized) => normalized,
                Err(err) => {
                    report.errors += 1;
                    report.records.push(MigratedRecord {
                        index,
                        external_id: None,
                        id: None,
                        imported: false,
                        error: Some(err.to_string()),
                    });
                    warn!("record {} failed to normalize: {}", index, err);
                    if !options.continue_on_error {
                        break 'outer;
                    }
                    continue;
                }
            };

            if options.dry_run {
                report.imported += 1;
                report.records.push(MigratedRecord {
                    index,
                    external_id: normalized.external_id,
                    id: None,
                    imported: true,
                    error: None,
                });
                continue;
            }

            let new_observation = NewObservation {
                session_id: None,
                content_session_id: None,
                memory_session_id: memory_session_id.clone(),
                project: options.target_project.clone(),
                observation: normalized.observation,
                prompt_number: 0,
                created_at_epoch: normalized.created_at_epoch,
            };

            match store.import_observation(&new_observation) {
                Ok(stored) => {
                    if stored.imported {
                        report.imported += 1;
                    } else {
                        report.duplicates += 1;
                    }
                    report.records.push(MigratedRecord {
                        index,
                        external_id: normalized.external_id,
                        id: Some(stored.id),
                        imported: stored.imported,
                        error: None,
                    });
                }
                Err(err) => {
                    report.errors += 1;
                    report.records.push(MigratedRecord {
                        index,
                        external_id: normalized.external_id,
                        id: None,
                        imported: false,
                        error: Some(err.to_string()),
                    });
                    warn!("record {} failed to import: {}", index, err);
                    if !options.continue_on_error {
                        break 'outer;
                    }
                }
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis();
    debug!(
        "migration: {}/{} imported, {} duplicates, {} errors in {}ms",
        report.imported, report.total, report.duplicates, report.errors, report.duration_ms
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_store::Database;
    use recall_vector::adapter::TimestampFormat;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn adapter() -> SchemaAdapter {
        let mut adapter = SchemaAdapter::new("legacy", "Legacy export");
        adapter.set_field("title", "heading").unwrap();
        adapter.set_field("timestamp", "created").unwrap();
        adapter.transforms.timestamp = TimestampFormat::EpochMs;
        adapter
    }

    fn store() -> SharedStore {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_migrate_counts_imports_duplicates_and_errors() {
        let store = store();
        let externals = vec![
            json!({"heading": "first", "created": 1000}),
            json!({"heading": "second", "created": 2000}),
            json!({"heading": "first", "created": 1000}), // duplicate tuple
            json!({"heading": "bad", "created": "not-a-number"}),
        ];

        let report = migrate_batch(
            &store,
            &adapter(),
            &externals,
            &MigrationOptions::new("imported"),
        )
        .unwrap();

        assert_eq!(report.total, 4);
        assert_eq!(report.imported, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.records.len(), 4);
        assert_eq!(report.records[0].id, report.records[2].id);

        let db = store.lock().unwrap();
        assert_eq!(db.stats().unwrap().observation_count, 2);
        let rows = db.list_observations(Some("imported"), 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].memory_session_id, "import-legacy");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let store = store();
        let externals = vec![json!({"heading": "first", "created": 1000})];

        let mut options = MigrationOptions::new("imported");
        options.dry_run = true;
        let report = migrate_batch(&store, &adapter(), &externals, &options).unwrap();

        assert_eq!(report.imported, 1);
        assert!(report.records[0].id.is_none());
        assert_eq!(store.lock().unwrap().stats().unwrap().observation_count, 0);
    }

    #[test]
    fn test_stop_on_first_error_when_configured() {
        let store = store();
        let externals = vec![
            json!({"heading": "bad", "created": "nope"}),
            json!({"heading": "never reached", "created": 1000}),
        ];

        let mut options = MigrationOptions::new("imported");
        options.continue_on_error = false;
        let report = migrate_batch(&store, &adapter(), &externals, &options).unwrap();

        assert_eq!(report.errors, 1);
        assert_eq!(report.imported, 0);
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn test_explicit_memory_session_id() {
        let store = store();
        let mut options = MigrationOptions::new("imported");
        options.memory_session_id = Some("mem-custom".to_string());

        migrate_batch(
            &store,
            &adapter(),
            &[json!({"heading": "x", "created": 1})],
            &options,
        )
        .unwrap();

        let db = store.lock().unwrap();
        let rows = db.list_observations(None, 10).unwrap();
        assert_eq!(rows[0].memory_session_id, "mem-custom");
    }
}
