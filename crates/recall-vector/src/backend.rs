use crate::federation::{FederatedHit, FederationConfig};
use crate::Result;
use async_trait::async_trait;
use recall_types::{ParsedObservation, ParsedSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The worker's single writer connection, shared with this layer for backfill.
pub type SharedStore = Arc<Mutex<recall_store::Database>>;

/// What kind of relational row a vector document points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Observation,
    SessionSummary,
    UserPrompt,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Observation => "observation",
            DocType::SessionSummary => "session_summary",
            DocType::UserPrompt => "user_prompt",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "observation" => Some(DocType::Observation),
            "session_summary" => Some(DocType::SessionSummary),
            "user_prompt" => Some(DocType::UserPrompt),
            _ => None,
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conjunctive metadata filters for a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilters {
    pub project: Option<String>,
    pub doc_type: Option<DocType>,
    pub memory_session_id: Option<String>,
    pub min_epoch: Option<i64>,
    pub max_epoch: Option<i64>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.project.is_none()
            && self.doc_type.is_none()
            && self.memory_session_id.is_none()
            && self.min_epoch.is_none()
            && self.max_epoch.is_none()
    }
}

/// One query result, already deduplicated by owning row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub doc_id: String,
    pub sqlite_id: i64,
    pub doc_type: DocType,
    pub distance: f64,
    pub metadata: Value,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStats {
    pub backend: String,
    pub document_count: u64,
    pub collection: String,
    pub dimensions: Option<usize>,
    pub last_sync_epoch: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInfo {
    pub path: PathBuf,
    pub position: usize,
}

/// Everything the agent needs to index one stored observation.
#[derive(Debug, Clone)]
pub struct ObservationSync {
    pub sqlite_id: i64,
    pub memory_session_id: String,
    pub project: String,
    pub observation: ParsedObservation,
    pub prompt_number: i64,
    pub created_at_epoch: i64,
}

impl From<&recall_store::ObservationRow> for ObservationSync {
    fn from(row: &recall_store::ObservationRow) -> Self {
        ObservationSync {
            sqlite_id: row.id,
            memory_session_id: row.memory_session_id.clone(),
            project: row.project.clone(),
            observation: row.observation.clone(),
            prompt_number: row.prompt_number,
            created_at_epoch: row.created_at_epoch,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SummarySync {
    pub sqlite_id: i64,
    pub memory_session_id: String,
    pub project: String,
    pub summary: ParsedSummary,
    pub created_at_epoch: i64,
}

impl From<&recall_store::SummaryRow> for SummarySync {
    fn from(row: &recall_store::SummaryRow) -> Self {
        SummarySync {
            sqlite_id: row.id,
            memory_session_id: row.memory_session_id.clone(),
            project: row.project.clone(),
            summary: row.summary.clone(),
            created_at_epoch: row.created_at_epoch,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptSync {
    pub sqlite_id: i64,
    pub content_session_id: String,
    pub project: Option<String>,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at_epoch: i64,
}

impl From<&recall_store::UserPromptRow> for PromptSync {
    fn from(row: &recall_store::UserPromptRow) -> Self {
        PromptSync {
            sqlite_id: row.id,
            content_session_id: row.content_session_id.clone(),
            project: row.project.clone(),
            prompt_number: row.prompt_number,
            prompt_text: row.prompt_text.clone(),
            created_at_epoch: row.created_at_epoch,
        }
    }
}

/// The contract every backend variant satisfies.
///
/// Optional operations live on the capability traits below; callers discover
/// them through `federation()` / `maintenance()` instead of downcasting.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create schema/collections as needed. Must tolerate an uninitialized
    /// backing store and being called more than once.
    async fn initialize(&self) -> Result<()>;

    async fn sync_observation(&self, record: &ObservationSync) -> Result<()>;

    async fn sync_summary(&self, record: &SummarySync) -> Result<()>;

    async fn sync_user_prompt(&self, record: &PromptSync) -> Result<()>;

    /// KNN over all documents matching the filters, deduplicated by owning
    /// row (the best-scoring document per `(doc_type, sqlite_id)` wins).
    async fn query(
        &self,
        text: &str,
        limit: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<QueryHit>>;

    /// Scan the store for rows whose documents are absent and sync them.
    /// Idempotent; safe to interrupt and resume.
    async fn ensure_backfilled(&self, store: &SharedStore) -> Result<BackfillReport>;

    async fn stats(&self) -> Result<BackendStats>;

    fn federation(&self) -> Option<&dyn FederationOps> {
        None
    }

    fn maintenance(&self) -> Option<&dyn MaintenanceOps> {
        None
    }
}

/// Optional capability: read-only remote attachments and weighted queries.
#[async_trait]
pub trait FederationOps: Send + Sync {
    /// Register a remote snapshot at position 1..=3. Remotes are read-only.
    fn attach_remote(&self, path: &Path, position: usize) -> Result<()>;

    fn attached_remotes(&self) -> Vec<RemoteInfo>;

    async fn query_federated(
        &self,
        text: &str,
        limit: usize,
        config: &FederationConfig,
    ) -> Result<Vec<FederatedHit>>;
}

/// Optional capability: explicit document removal.
#[async_trait]
pub trait MaintenanceOps: Send + Sync {
    async fn delete_documents(&self, doc_ids: &[String]) -> Result<usize>;
}
