// End-to-end agent scenarios against an in-memory store, a real embedded
// vector backend with the deterministic test embedder, and scripted
// providers.

use async_trait::async_trait;
use recall_engine::{AgentState, ContextCaps, SessionAgent};
use recall_providers::{ChatMessage, ChatProvider, ChatReply, Error as ProviderError};
use recall_store::Database;
use recall_types::{ObservationType, SessionStatus};
use recall_vector::{
    DisabledBackend, EmbeddedVecBackend, HashEmbedder, SharedStore, VectorBackend,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct ScriptedProvider {
    name: &'static str,
    session_id: Option<&'static str>,
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &'static str, session_id: Option<&'static str>, replies: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            name,
            session_id,
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, _messages: &[ChatMessage]) -> Result<ChatReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "acknowledged".to_string());
        Ok(ChatReply {
            text,
            provider_session_id: self.session_id.map(str::to_string),
        })
    }
}

struct FailingProvider {
    error: fn() -> ProviderError,
    calls: AtomicUsize,
}

impl FailingProvider {
    fn new(error: fn() -> ProviderError) -> Arc<Self> {
        Arc::new(Self {
            error,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _messages: &[ChatMessage]) -> Result<ChatReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }
}

fn shared_store() -> SharedStore {
    Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
}

fn seed_session(store: &SharedStore, prompt: &str) -> recall_store::SessionRow {
    let db = store.lock().unwrap();
    let session = db.create_session("content-abc", "recall", prompt).unwrap();
    drop(db);
    session
}

const OBSERVATION_REPLY: &str = r#"<observation>
  <type>discovery</type>
  <title>Read /tmp/a.ts</title>
  <narrative>The file exports a single constant.</narrative>
  <facts><fact>a.ts exports x</fact></facts>
  <files_read><file>/tmp/a.ts</file></files_read>
</observation>"#;

const SUMMARY_REPLY: &str = r#"<summary>
  <request>inspect a.ts</request>
  <completed>read the file and recorded its export</completed>
</summary>"#;

#[tokio::test]
async fn init_observation_summary_happy_path() {
    let store = shared_store();
    let session = seed_session(&store, "inspect a.ts");
    {
        let db = store.lock().unwrap();
        db.enqueue_observation_message(
            session.id,
            "Read",
            &json!({"file_path": "/tmp/a.ts"}),
            &json!({"content": "export const x = 1"}),
            1,
            Some("/tmp"),
        )
        .unwrap();
        db.enqueue_summary_message(session.id, 1, Some("done")).unwrap();
    }

    let dir = TempDir::new().unwrap();
    let vector: Arc<dyn VectorBackend> = Arc::new(
        EmbeddedVecBackend::new(&dir.path().join("vectors.db"), Arc::new(HashEmbedder::new(16)), 16)
            .unwrap(),
    );
    vector.initialize().await.unwrap();

    let provider = ScriptedProvider::new(
        "claude",
        Some("prov-sess-1"),
        vec!["ok", OBSERVATION_REPLY, SUMMARY_REPLY],
    );

    let agent = SessionAgent::new(
        store.clone(),
        vector.clone(),
        provider.clone(),
        None,
        ContextCaps::default(),
        CancellationToken::new(),
    );
    let outcome = agent.start_session(session.clone()).await.unwrap();

    assert_eq!(outcome.state, AgentState::Done);
    assert_eq!(outcome.observations_stored, 1);
    assert_eq!(outcome.summaries_stored, 1);

    let db = store.lock().unwrap();
    let reloaded = db.get_session(session.id).unwrap().unwrap();
    assert_eq!(reloaded.status, SessionStatus::Completed);
    assert_eq!(reloaded.memory_session_id.as_deref(), Some("prov-sess-1"));

    let observations = db.list_observations(Some("recall"), 10).unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].observation.kind, ObservationType::Discovery);
    assert_eq!(observations[0].observation.files_read, vec!["/tmp/a.ts"]);

    let summary = db.get_summary_for_session("prov-sess-1").unwrap().unwrap();
    assert!(summary.summary.completed.is_some());
    assert_eq!(db.count_pending(session.id).unwrap(), 0);
    drop(db);

    // narrative + fact for the observation, request + completed for the summary
    let stats = vector.stats().await.unwrap();
    assert_eq!(stats.document_count, 4);
}

#[tokio::test]
async fn synthesized_memory_session_id_when_provider_echoes_none() {
    let store = shared_store();
    let session = seed_session(&store, "anything");

    let provider = ScriptedProvider::new("lmstudio", None, vec!["ok"]);
    let agent = SessionAgent::new(
        store.clone(),
        Arc::new(DisabledBackend),
        provider,
        None,
        ContextCaps::default(),
        CancellationToken::new(),
    );
    agent.start_session(session.clone()).await.unwrap();

    let db = store.lock().unwrap();
    let reloaded = db.get_session(session.id).unwrap().unwrap();
    assert_eq!(
        reloaded.memory_session_id.as_deref(),
        Some("lmstudio-content-abc")
    );
}

#[tokio::test]
async fn transient_failure_hands_off_to_fallback() {
    let store = shared_store();
    let session = seed_session(&store, "inspect a.ts");
    {
        let db = store.lock().unwrap();
        db.enqueue_observation_message(
            session.id,
            "Read",
            &json!({"file_path": "/tmp/a.ts"}),
            &json!({"ok": true}),
            1,
            None,
        )
        .unwrap();
    }

    let primary = FailingProvider::new(|| ProviderError::Connect("ECONNREFUSED".to_string()));
    let fallback = ScriptedProvider::new("lmstudio", None, vec!["ok", OBSERVATION_REPLY]);

    let agent = SessionAgent::new(
        store.clone(),
        Arc::new(DisabledBackend),
        primary.clone(),
        Some(fallback.clone()),
        ContextCaps::default(),
        CancellationToken::new(),
    );
    let outcome = agent.start_session(session.clone()).await.unwrap();

    assert_eq!(outcome.state, AgentState::Done);
    assert!(fallback.call_count() >= 1, "fallback was never invoked");

    // no session-level failure
    let db = store.lock().unwrap();
    let reloaded = db.get_session(session.id).unwrap().unwrap();
    assert_ne!(reloaded.status, SessionStatus::Failed);
    assert_eq!(db.list_observations(None, 10).unwrap().len(), 1);
}

#[tokio::test]
async fn provider_4xx_fails_session_without_fallback() {
    let store = shared_store();
    let session = seed_session(&store, "inspect a.ts");

    let primary = FailingProvider::new(|| ProviderError::Status {
        code: 400,
        message: "bad request".to_string(),
    });
    let fallback = ScriptedProvider::new("lmstudio", None, vec![]);

    let agent = SessionAgent::new(
        store.clone(),
        Arc::new(DisabledBackend),
        primary.clone(),
        Some(fallback.clone()),
        ContextCaps::default(),
        CancellationToken::new(),
    );
    let err = agent.start_session(session.clone()).await.unwrap_err();

    assert!(err.to_string().contains("400"));
    assert_eq!(fallback.call_count(), 0, "fallback must not fire on 4xx");

    let db = store.lock().unwrap();
    let reloaded = db.get_session(session.id).unwrap().unwrap();
    assert_eq!(reloaded.status, SessionStatus::Failed);
}

#[tokio::test]
async fn cancelled_token_aborts_without_consuming() {
    let store = shared_store();
    let session = seed_session(&store, "inspect a.ts");
    {
        let db = store.lock().unwrap();
        db.update_memory_session_id(session.id, "mem-pre").unwrap();
        db.enqueue_observation_message(session.id, "Read", &json!({}), &json!({}), 1, None)
            .unwrap();
    }
    let session = {
        let db = store.lock().unwrap();
        db.get_session(session.id).unwrap().unwrap()
    };

    let cancel = CancellationToken::new();
    cancel.cancel();

    let provider = ScriptedProvider::new("claude", None, vec![]);
    let agent = SessionAgent::new(
        store.clone(),
        Arc::new(DisabledBackend),
        provider.clone(),
        None,
        ContextCaps::default(),
        cancel,
    );
    let outcome = agent.start_session(session.clone()).await.unwrap();

    assert_eq!(outcome.state, AgentState::Aborted);
    assert_eq!(provider.call_count(), 0);

    // the pending row is untouched and will be re-consumed next run
    let db = store.lock().unwrap();
    assert_eq!(db.count_pending(session.id).unwrap(), 1);
}

#[tokio::test]
async fn unparseable_reply_contributes_zero_observations_and_continues() {
    let store = shared_store();
    let session = seed_session(&store, "inspect a.ts");
    {
        let db = store.lock().unwrap();
        db.enqueue_observation_message(session.id, "Read", &json!({}), &json!({}), 1, None)
            .unwrap();
        db.enqueue_observation_message(session.id, "Read", &json!({}), &json!({}), 1, None)
            .unwrap();
    }

    let provider = ScriptedProvider::new(
        "claude",
        Some("prov-sess-2"),
        vec!["ok", "not xml at all", OBSERVATION_REPLY],
    );
    let agent = SessionAgent::new(
        store.clone(),
        Arc::new(DisabledBackend),
        provider,
        None,
        ContextCaps::default(),
        CancellationToken::new(),
    );
    let outcome = agent.start_session(session.clone()).await.unwrap();

    assert_eq!(outcome.state, AgentState::Done);
    assert_eq!(outcome.messages_processed, 2);
    assert_eq!(outcome.observations_stored, 1);

    let db = store.lock().unwrap();
    assert_eq!(db.count_pending(session.id).unwrap(), 0);
}
