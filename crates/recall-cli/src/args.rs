use clap::{Parser, Subcommand, ValueEnum};
use recall_runtime::ops::ExportFormat;
use recall_vector::adapter::{EmbeddingFormat, FactsFormat, TimestampFormat};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "recall",
    version,
    about = "Local-first memory capture and retrieval for AI coding agents"
)]
pub struct Cli {
    /// Service directory override (defaults to ~/.memory-service)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the worker: hook ingress, session agents, read APIs
    Start {
        /// Listen port (default 37777 or the settings value)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Export database snapshots or a JSON dump
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormatArg::Sqlite)]
        format: ExportFormatArg,
        /// Output directory (defaults to <service-dir>/export)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Restrict the JSON dump to one project
        #[arg(long)]
        project: Option<String>,
        /// Skip the vector database snapshot
        #[arg(long)]
        no_vectors: bool,
    },

    /// Manage the replicated snapshot workspace
    #[command(name = "git-sync")]
    GitSync {
        #[command(subcommand)]
        action: GitSyncAction,
    },

    /// Import externally-shaped observation records through the schema adapter
    Migrate {
        /// File path or http(s) URL of a JSON array of records
        #[arg(long)]
        source: String,
        /// Project the imported observations belong to
        #[arg(long)]
        project: String,
        /// Field mapping KEY=PATH; keys: id, title, subtitle, narrative,
        /// facts, type, project, timestamp, embedding
        #[arg(long = "field", value_name = "KEY=PATH")]
        fields: Vec<String>,
        #[arg(long, value_enum)]
        timestamp_format: Option<TimestampFormatArg>,
        #[arg(long, value_enum)]
        embedding_format: Option<EmbeddingFormatArg>,
        #[arg(long, value_enum)]
        facts_format: Option<FactsFormatArg>,
        /// Memory session the imports are grouped under
        #[arg(long)]
        memory_session: Option<String>,
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
        /// Normalize and count without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Serve the MCP search tools over stdio
    Mcp {
        /// Worker port to proxy reads to
        #[arg(long)]
        port: Option<u16>,
    },

    /// Forward a host hook event from stdin to the worker. Always exits 0.
    Hook {
        platform: String,
        event: String,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Debug, Subcommand)]
pub enum GitSyncAction {
    /// Show workspace state and pending changes
    Status,
    /// Initialize the workspace (and optionally configure the remote)
    Init {
        #[arg(long)]
        remote: Option<String>,
    },
    /// Snapshot the databases, commit, and push (auto-initializes)
    Push {
        /// Include the full relational database
        #[arg(long)]
        full: bool,
    },
    /// Fetch and fast-forward from the remote
    Pull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ExportFormatArg {
    Sqlite,
    Full,
    Json,
}

impl fmt::Display for ExportFormatArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormatArg::Sqlite => write!(f, "sqlite"),
            ExportFormatArg::Full => write!(f, "full"),
            ExportFormatArg::Json => write!(f, "json"),
        }
    }
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(value: ExportFormatArg) -> Self {
        match value {
            ExportFormatArg::Sqlite => ExportFormat::Sqlite,
            ExportFormatArg::Full => ExportFormat::Full,
            ExportFormatArg::Json => ExportFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum TimestampFormatArg {
    EpochMs,
    EpochS,
    Iso8601,
}

impl From<TimestampFormatArg> for TimestampFormat {
    fn from(value: TimestampFormatArg) -> Self {
        match value {
            TimestampFormatArg::EpochMs => TimestampFormat::EpochMs,
            TimestampFormatArg::EpochS => TimestampFormat::EpochS,
            TimestampFormatArg::Iso8601 => TimestampFormat::Iso8601,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum EmbeddingFormatArg {
    Array,
    Base64,
    JsonArray,
    Binary,
}

impl From<EmbeddingFormatArg> for EmbeddingFormat {
    fn from(value: EmbeddingFormatArg) -> Self {
        match value {
            EmbeddingFormatArg::Array => EmbeddingFormat::Array,
            EmbeddingFormatArg::Base64 => EmbeddingFormat::Base64,
            EmbeddingFormatArg::JsonArray => EmbeddingFormat::JsonArray,
            EmbeddingFormatArg::Binary => EmbeddingFormat::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum FactsFormatArg {
    Array,
    Json,
    Csv,
}

impl From<FactsFormatArg> for FactsFormat {
    fn from(value: FactsFormatArg) -> Self {
        match value {
            FactsFormatArg::Array => FactsFormat::Array,
            FactsFormatArg::Json => FactsFormat::Json,
            FactsFormatArg::Csv => FactsFormat::Csv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export() {
        let cli = Cli::try_parse_from(["recall", "export", "--format", "json", "--project", "x"])
            .unwrap();
        match cli.command {
            Command::Export {
                format, project, ..
            } => {
                assert_eq!(format, ExportFormatArg::Json);
                assert_eq!(project.as_deref(), Some("x"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_migrate_fields() {
        let cli = Cli::try_parse_from([
            "recall",
            "migrate",
            "--source",
            "/tmp/records.json",
            "--project",
            "legacy",
            "--field",
            "title=heading",
            "--field",
            "timestamp=meta.created",
            "--timestamp-format",
            "epoch_s",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::Migrate {
                fields,
                timestamp_format,
                dry_run,
                ..
            } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(timestamp_format, Some(TimestampFormatArg::EpochS));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_git_sync_push_full() {
        let cli = Cli::try_parse_from(["recall", "git-sync", "push", "--full"]).unwrap();
        match cli.command {
            Command::GitSync {
                action: GitSyncAction::Push { full },
            } => assert!(full),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
