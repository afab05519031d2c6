use recall_types::{ParsedObservation, ParsedSummary, PendingKind, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logical conversation with the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub content_session_id: String,
    pub memory_session_id: Option<String>,
    pub project: String,
    pub status: SessionStatus,
    pub started_at: String,
    pub user_prompt: String,
    pub prompt_counter: i64,
}

/// Result of a store/import: the row id plus whether a new row was created.
/// `imported == false` means the dedup key already existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredId {
    pub id: i64,
    pub imported: bool,
}

/// Input shape for storing one observation.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub session_id: Option<i64>,
    pub content_session_id: Option<String>,
    pub memory_session_id: String,
    pub project: String,
    pub observation: ParsedObservation,
    pub prompt_number: i64,
    pub created_at_epoch: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRow {
    pub id: i64,
    pub session_id: Option<i64>,
    pub content_session_id: Option<String>,
    pub memory_session_id: String,
    pub project: String,
    #[serde(flatten)]
    pub observation: ParsedObservation,
    pub prompt_number: i64,
    pub created_at_epoch: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRow {
    pub id: i64,
    pub session_id: Option<i64>,
    pub memory_session_id: String,
    pub project: String,
    #[serde(flatten)]
    pub summary: ParsedSummary,
    pub created_at_epoch: i64,
}

/// Input shape for storing one user prompt turn.
#[derive(Debug, Clone)]
pub struct NewUserPrompt {
    pub content_session_id: String,
    pub project: Option<String>,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at_epoch: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPromptRow {
    pub id: i64,
    pub content_session_id: String,
    pub project: Option<String>,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at_epoch: i64,
}

/// One queued hook event awaiting the session agent.
#[derive(Debug, Clone)]
pub struct PendingMessageRow {
    pub id: i64,
    pub session_id: i64,
    pub kind: PendingKind,
    pub tool_name: Option<String>,
    pub tool_input: Option<String>,
    pub tool_response: Option<String>,
    pub prompt_number: i64,
    pub cwd: Option<String>,
    pub last_assistant_message: Option<String>,
    pub enqueued_at: String,
    pub processed_at: Option<String>,
}

impl PendingMessageRow {
    pub fn tool_input_json(&self) -> Value {
        self.tool_input
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(Value::Null)
    }

    pub fn tool_response_json(&self) -> Value {
        self.tool_response
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStat {
    pub project: String,
    pub observation_count: i64,
    pub last_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub session_count: i64,
    pub observation_count: i64,
    pub summary_count: i64,
    pub prompt_count: i64,
    pub pending_count: i64,
    pub projects: Vec<ProjectStat>,
}
