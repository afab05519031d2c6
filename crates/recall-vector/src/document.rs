use crate::backend::{DocType, ObservationSync, PromptSync, SummarySync};
use serde_json::{Value, json};

/// One indexable text fragment before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSeed {
    pub doc_id: String,
    pub sqlite_id: i64,
    pub doc_type: DocType,
    pub content: String,
    pub memory_session_id: Option<String>,
    pub project: String,
    pub created_at_epoch: i64,
    pub metadata: Value,
}

// Granulation: each observation field becomes its own document so a single
// fact can match a query without dragging the whole narrative's embedding
// toward the mean. Document ids are deterministic, which makes a re-sync an
// upsert and backfill a set-difference.

/// `obs_<id>_narrative`, `obs_<id>_text`, and `obs_<id>_fact_<n>` for each
/// non-empty field.
pub fn observation_documents(record: &ObservationSync) -> Vec<DocumentSeed> {
    let observation = &record.observation;
    let metadata = json!({
        "type": observation.kind.as_str(),
        "title": observation.title,
        "prompt_number": record.prompt_number,
    });

    let seed = |field: String, content: &str| DocumentSeed {
        doc_id: format!("obs_{}_{}", record.sqlite_id, field),
        sqlite_id: record.sqlite_id,
        doc_type: DocType::Observation,
        content: content.to_string(),
        memory_session_id: Some(record.memory_session_id.clone()),
        project: record.project.clone(),
        created_at_epoch: record.created_at_epoch,
        metadata: metadata.clone(),
    };

    let mut documents = Vec::new();
    if let Some(narrative) = non_empty(observation.narrative.as_deref()) {
        documents.push(seed("narrative".to_string(), narrative));
    }
    if let Some(text) = non_empty(observation.text.as_deref()) {
        documents.push(seed("text".to_string(), text));
    }
    for (index, fact) in observation
        .facts
        .iter()
        .filter(|fact| !fact.trim().is_empty())
        .enumerate()
    {
        documents.push(seed(format!("fact_{}", index), fact));
    }
    documents
}

/// `summary_<id>_<field>` for each non-empty roll-up field.
pub fn summary_documents(record: &SummarySync) -> Vec<DocumentSeed> {
    record
        .summary
        .non_empty_fields()
        .into_iter()
        .map(|(field, content)| DocumentSeed {
            doc_id: format!("summary_{}_{}", record.sqlite_id, field),
            sqlite_id: record.sqlite_id,
            doc_type: DocType::SessionSummary,
            content: content.to_string(),
            memory_session_id: Some(record.memory_session_id.clone()),
            project: record.project.clone(),
            created_at_epoch: record.created_at_epoch,
            metadata: json!({ "field": field }),
        })
        .collect()
}

/// A single `prompt_<id>_text` document per user turn.
pub fn prompt_documents(record: &PromptSync) -> Vec<DocumentSeed> {
    if record.prompt_text.trim().is_empty() {
        return Vec::new();
    }
    vec![DocumentSeed {
        doc_id: format!("prompt_{}_text", record.sqlite_id),
        sqlite_id: record.sqlite_id,
        doc_type: DocType::UserPrompt,
        content: record.prompt_text.clone(),
        memory_session_id: None,
        project: record.project.clone().unwrap_or_else(|| "unknown".to_string()),
        created_at_epoch: record.created_at_epoch,
        metadata: json!({
            "content_session_id": record.content_session_id,
            "prompt_number": record.prompt_number,
        }),
    }]
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
