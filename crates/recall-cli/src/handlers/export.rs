use recall_runtime::ServiceDirs;
use recall_runtime::ops::{ExportFormat, run_export};
use recall_store::Database;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub fn run(
    dirs: ServiceDirs,
    format: ExportFormat,
    output: Option<PathBuf>,
    project: Option<String>,
    no_vectors: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(Mutex::new(Database::open(&dirs.store_db())?));
    let report = run_export(&dirs, &store, format, output, project.as_deref(), no_vectors)?;

    for file in &report.files {
        println!("exported {}", file.display());
    }
    if report.files.is_empty() {
        println!("nothing to export");
    }
    Ok(())
}
