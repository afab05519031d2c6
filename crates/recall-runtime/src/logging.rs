use crate::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Install the worker's tracing subscriber: env-filtered, ANSI-free, teed to
/// stderr and the worker log file (which backs `GET /logs`). Returns the log
/// file path; calling twice is harmless.
pub fn init_tracing(logs_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(logs_dir)?;
    let log_path = logs_dir.join("worker.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Arc::new(file).and(std::io::stderr))
        .try_init();

    Ok(log_path)
}

/// Last `limit` lines of the worker log, oldest first.
pub fn tail_log(log_path: &Path, limit: usize) -> Result<Vec<String>> {
    if !log_path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(log_path)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..].iter().map(|line| line.to_string()).collect())
}
