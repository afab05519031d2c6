use recall_runtime::ServiceDirs;
use recall_runtime::ops::{MigrationOptions, migrate_batch};
use recall_store::Database;
use recall_vector::adapter::{EmbeddingFormat, FactsFormat, SchemaAdapter, TimestampFormat};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub struct MigrateArgs {
    pub source: String,
    pub project: String,
    pub fields: Vec<String>,
    pub timestamp_format: Option<TimestampFormat>,
    pub embedding_format: Option<EmbeddingFormat>,
    pub facts_format: Option<FactsFormat>,
    pub memory_session: Option<String>,
    pub batch_size: usize,
    pub dry_run: bool,
}

pub fn run(dirs: ServiceDirs, args: MigrateArgs) -> anyhow::Result<()> {
    let mut adapter = SchemaAdapter::new("cli", "command-line migration");
    adapter.url = args.source.starts_with("http").then(|| args.source.clone());
    for mapping in &args.fields {
        let (key, path) = mapping
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--field expects KEY=PATH, got '{}'", mapping))?;
        adapter.set_field(key.trim(), path.trim())?;
    }
    if let Some(format) = args.timestamp_format {
        adapter.transforms.timestamp = format;
    }
    if let Some(format) = args.embedding_format {
        adapter.transforms.embedding = format;
    }
    if let Some(format) = args.facts_format {
        adapter.transforms.facts = format;
    }

    let externals = load_records(&args.source)?;
    println!("loaded {} record(s) from {}", externals.len(), args.source);

    let store = Arc::new(Mutex::new(Database::open(&dirs.store_db())?));
    let mut options = MigrationOptions::new(&args.project);
    options.memory_session_id = args.memory_session;
    options.batch_size = args.batch_size;
    options.dry_run = args.dry_run;

    let report = migrate_batch(&store, &adapter, &externals, &options)?;

    let mode = if args.dry_run { " (dry run)" } else { "" };
    println!(
        "migrated{}: {} imported, {} duplicates, {} errors in {}ms",
        mode, report.imported, report.duplicates, report.errors, report.duration_ms
    );
    for record in report.records.iter().filter(|r| r.error.is_some()) {
        eprintln!(
            "record {}: {}",
            record.index,
            record.error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn load_records(source: &str) -> anyhow::Result<Vec<Value>> {
    let raw = if source.starts_with("http://") || source.starts_with("https://") {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            let response = reqwest::get(source).await?;
            anyhow::Ok(response.text().await?)
        })?
    } else {
        std::fs::read_to_string(source)?
    };

    let parsed: Value = serde_json::from_str(&raw)?;
    match parsed {
        Value::Array(records) => Ok(records),
        Value::Object(ref map) => {
            for key in ["records", "observations", "data"] {
                if let Some(Value::Array(records)) = map.get(key) {
                    return Ok(records.clone());
                }
            }
            anyhow::bail!("source JSON is an object without a records array")
        }
        _ => anyhow::bail!("source JSON must be an array of records"),
    }
}
