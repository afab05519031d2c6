pub mod export;
pub mod git_sync;
pub mod migrate;

pub use export::{ExportFormat, ExportReport, run_export};
pub use git_sync::{ReplicationWorkspace, RepoStatus};
pub use migrate::{MigratedRecord, MigrationOptions, MigrationReport, migrate_batch};
