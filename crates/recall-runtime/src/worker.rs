use crate::hooks;
use crate::manager::{GeneratorExit, SessionManager};
use crate::paths::ServiceDirs;
use crate::reaper::Reaper;
use crate::settings::Settings;
use crate::supervisor::{ObserverRegistry, SessionSpawner};
use crate::{Error, Result};
use recall_engine::{AgentState, SessionAgent};
use recall_providers::{ProviderKind, Spawner, build_provider};
use recall_store::{Database, NewUserPrompt, SessionRow};
use recall_types::{SessionStatus, util};
use recall_vector::{
    CollectionServiceBackend, DisabledBackend, Embedder, EmbeddedVecBackend, HashEmbedder,
    HttpEmbedder, PromptSync, SharedStore, VectorBackend,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

/// Construct the vector backend selected by settings.
pub fn build_vector_backend(
    settings: &Settings,
    dirs: &ServiceDirs,
) -> Result<Arc<dyn VectorBackend>> {
    match settings.vector.backend.as_str() {
        "sqlite-vec" => {
            let embedding = &settings.vector.embedding;
            let embedder: Arc<dyn Embedder> = match embedding.provider.as_str() {
                "hash" => Arc::new(HashEmbedder::new(embedding.dimensions)),
                _ => Arc::new(HttpEmbedder::new(
                    &embedding.base_url,
                    &embedding.model,
                    embedding.api_key.clone(),
                )),
            };
            Ok(Arc::new(EmbeddedVecBackend::new(
                &dirs.vectors_db(),
                embedder,
                embedding.dimensions,
            )?))
        }
        "chroma" => Ok(Arc::new(CollectionServiceBackend::new(
            &settings.vector.collection_command,
            &settings.vector.collection_args,
            &dirs.vector_service_dir(),
            &settings.vector.collection_name,
        )?)),
        "none" => Ok(Arc::new(DisabledBackend)),
        other => Err(Error::Config(format!("unknown vector backend '{}'", other))),
    }
}

/// The single long-lived process that owns all mutable state.
pub struct Worker {
    dirs: ServiceDirs,
    settings: RwLock<Settings>,
    store: SharedStore,
    vector: Arc<dyn VectorBackend>,
    manager: Arc<SessionManager>,
    registry: Arc<ObserverRegistry>,
    reaper: Reaper,
}

impl Worker {
    pub fn build(dirs: ServiceDirs, settings: Settings) -> Result<Arc<Self>> {
        dirs.ensure_layout()?;

        let store = Database::open(&dirs.store_db())?;
        // crash recovery: rows a dead generator left in flight become
        // consumable again
        let reset = store.reset_stuck_messages()?;
        if reset > 0 {
            info!("reset {} stuck pending message(s) from a previous run", reset);
        }
        let store: SharedStore = Arc::new(Mutex::new(store));

        let vector = build_vector_backend(&settings, &dirs)?;
        let registry = Arc::new(ObserverRegistry::new());
        let reaper = Reaper::new(registry.clone());

        Ok(Arc::new(Self {
            dirs,
            settings: RwLock::new(settings),
            store,
            vector,
            manager: SessionManager::new(),
            registry,
            reaper,
        }))
    }

    pub fn dirs(&self) -> &ServiceDirs {
        &self.dirs
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn vector(&self) -> &Arc<dyn VectorBackend> {
        &self.vector
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn registry(&self) -> &Arc<ObserverRegistry> {
        &self.registry
    }

    pub fn settings_snapshot(&self) -> Settings {
        self.settings.read().unwrap().clone()
    }

    /// Swap settings in place and persist them. Context caps and provider
    /// selection apply from the next generator run.
    pub fn update_settings(&self, settings: Settings) -> Result<()> {
        settings.save(&self.dirs.settings_file())?;
        *self.settings.write().unwrap() = settings;
        Ok(())
    }

    /// Startup order: vector schema, best-effort backfill, reaper.
    pub async fn startup(self: &Arc<Self>) {
        if let Err(err) = self.vector.initialize().await {
            warn!("vector backend initialization failed: {}", err);
        }

        let vector = self.vector.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            match vector.ensure_backfilled(&store).await {
                Ok(report) if report.synced > 0 || report.failed > 0 => {
                    info!(
                        "vector backfill: {} synced, {} failed",
                        report.synced, report.failed
                    );
                }
                Ok(_) => {}
                Err(err) => warn!("vector backfill failed: {}", err),
            }
        });

        self.reaper.start();
    }

    pub async fn shutdown(&self) {
        info!("worker shutting down");
        self.registry.kill_all().await;
        self.reaper.stop();
    }

    /// Dispatch one normalized hook event. Always answered with a small JSON
    /// envelope; failures are the caller's to log, never the host's problem.
    pub async fn handle_hook(
        self: &Arc<Self>,
        platform: &str,
        event: &str,
        payload: &Value,
    ) -> Result<Value> {
        match event {
            "session-init" => {
                let session = self.ensure_session(payload)?;
                info!(
                    "[{}] session {} initialized for project '{}'",
                    platform, session.content_session_id, session.project
                );
                Ok(json!({ "session_db_id": session.id, "project": session.project }))
            }
            "context" => {
                let session = self.ensure_session(payload)?;
                let prompt_text = hooks::prompt_text(payload).unwrap_or_default();
                let epoch = util::now_epoch_ms();
                let (prompt_number, stored) = {
                    let store = self.store.lock().unwrap();
                    let prompt_number = store.next_prompt_number(session.id)?;
                    let stored = store.store_user_prompt(&NewUserPrompt {
                        content_session_id: session.content_session_id.clone(),
                        project: Some(session.project.clone()),
                        prompt_number,
                        prompt_text: prompt_text.clone(),
                        created_at_epoch: epoch,
                    })?;
                    (prompt_number, stored)
                };

                let vector = self.vector.clone();
                let record = PromptSync {
                    sqlite_id: stored.id,
                    content_session_id: session.content_session_id.clone(),
                    project: Some(session.project.clone()),
                    prompt_number,
                    prompt_text,
                    created_at_epoch: epoch,
                };
                tokio::spawn(async move {
                    if let Err(err) = vector.sync_user_prompt(&record).await {
                        warn!("vector sync failed for prompt {}: {}", record.sqlite_id, err);
                    }
                });

                Ok(json!({ "prompt_number": prompt_number }))
            }
            "observation" | "file-edit" => {
                let session = self.ensure_session(payload)?;
                let fallback_tool = if event == "file-edit" { "Edit" } else { "unknown" };
                let tool_name =
                    hooks::tool_name(payload).unwrap_or_else(|| fallback_tool.to_string());
                let queued = {
                    let store = self.store.lock().unwrap();
                    store.enqueue_observation_message(
                        session.id,
                        &tool_name,
                        &hooks::tool_input(payload),
                        &hooks::tool_response(payload),
                        session.prompt_counter,
                        hooks::cwd(payload).as_deref(),
                    )?;
                    store.count_pending(session.id)?
                };
                self.spawn_generator(session);
                Ok(json!({ "queued": queued }))
            }
            "summarize" => {
                let session = self.ensure_session(payload)?;
                {
                    let store = self.store.lock().unwrap();
                    store.enqueue_summary_message(
                        session.id,
                        session.prompt_counter,
                        hooks::last_assistant_message(payload).as_deref(),
                    )?;
                }
                self.spawn_generator(session);
                Ok(json!({ "queued": true }))
            }
            other => Err(Error::InvalidOperation(format!(
                "unknown hook event '{}'",
                other
            ))),
        }
    }

    fn ensure_session(&self, payload: &Value) -> Result<SessionRow> {
        let content_session_id = hooks::content_session_id(payload)
            .ok_or_else(|| Error::InvalidOperation("hook payload has no session id".to_string()))?;
        let project = hooks::project(payload);
        let user_prompt = hooks::prompt_text(payload).unwrap_or_default();

        let store = self.store.lock().unwrap();
        Ok(store.create_session(&content_session_id, &project, &user_prompt)?)
    }

    /// Ensure exactly one generator drains this session's queue.
    pub fn spawn_generator(self: &Arc<Self>, session: SessionRow) {
        let settings = self.settings_snapshot();
        let spawner: Arc<dyn Spawner> =
            Arc::new(SessionSpawner::new(self.registry.clone(), session.id));

        let primary_kind = settings.provider_kind();
        let mut primary_spec = settings.provider_spec(primary_kind);
        if primary_kind == ProviderKind::Claude {
            // don't try to resume a synthesized id the CLI never issued
            let synthesized = format!("claude-{}", session.content_session_id);
            primary_spec.resume_session = session
                .memory_session_id
                .clone()
                .filter(|id| *id != synthesized);
        }
        let primary = build_provider(&primary_spec, spawner.clone());
        let fallback = settings
            .fallback_kind()
            .map(|kind| build_provider(&settings.provider_spec(kind), spawner.clone()));
        let caps = settings.context.caps();

        let worker = Arc::clone(self);
        self.manager.ensure_generator(session.id, move |cancel| async move {
            let session_db_id = session.id;
            let agent = SessionAgent::new(
                worker.store.clone(),
                worker.vector.clone(),
                primary,
                fallback,
                caps,
                cancel,
            );

            let result = agent.start_session(session).await;
            let natural = match &result {
                Ok(outcome) => outcome.state != AgentState::Aborted,
                Err(recall_engine::Error::Cancelled) => false,
                Err(_) => true,
            };
            if let Err(err) = &result {
                warn!("generator for session {} failed: {}", session_db_id, err);
            }

            // a session that reached a terminal status releases its children
            let status = {
                let store = worker.store.lock().unwrap();
                store
                    .get_session(session_db_id)
                    .ok()
                    .flatten()
                    .map(|row| row.status)
            };
            if matches!(
                status,
                Some(SessionStatus::Completed) | Some(SessionStatus::Failed)
            ) {
                worker.registry.kill_session_observers(session_db_id).await;
            }

            GeneratorExit { natural }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        // unreachable endpoint: generators fail fast and deterministically
        settings.provider = "lmstudio".to_string();
        settings.providers.lmstudio.base_url = Some("http://127.0.0.1:9".to_string());
        settings.vector.backend = "none".to_string();
        settings
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
        for _ in 0..400 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hook_flow_creates_session_and_queues_work() {
        let temp = TempDir::new().unwrap();
        let worker = Worker::build(ServiceDirs::at(temp.path()), test_settings()).unwrap();

        let init = worker
            .handle_hook(
                "claude",
                "session-init",
                &json!({"session_id": "sess-1", "cwd": "/home/dev/recall", "prompt": "fix it"}),
            )
            .await
            .unwrap();
        let session_db_id = init["session_db_id"].as_i64().unwrap();
        assert_eq!(init["project"], "recall");

        let context = worker
            .handle_hook(
                "claude",
                "context",
                &json!({"session_id": "sess-1", "prompt": "fix it"}),
            )
            .await
            .unwrap();
        assert_eq!(context["prompt_number"], 1);

        worker
            .handle_hook(
                "claude",
                "observation",
                &json!({
                    "session_id": "sess-1",
                    "tool_name": "Read",
                    "tool_input": {"file_path": "/tmp/a.ts"},
                    "tool_response": {"ok": true},
                }),
            )
            .await
            .unwrap();

        // exactly one generator spawned; it fails against the dead endpoint
        assert_eq!(worker.manager().spawn_count(session_db_id), 1);
        wait_for("generator to finish", || {
            !worker.manager().is_running(session_db_id)
        })
        .await;

        let store = worker.store().lock().unwrap();
        let session = store.get_session(session_db_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        // the message was never consumed and survives for a retry
        assert_eq!(store.count_pending(session_db_id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_event_is_rejected() {
        let temp = TempDir::new().unwrap();
        let worker = Worker::build(ServiceDirs::at(temp.path()), test_settings()).unwrap();

        let err = worker
            .handle_hook("claude", "teleport", &json!({"session_id": "sess-1"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown hook event"));
    }

    #[tokio::test]
    async fn test_missing_session_id_is_rejected() {
        let temp = TempDir::new().unwrap();
        let worker = Worker::build(ServiceDirs::at(temp.path()), test_settings()).unwrap();

        let err = worker
            .handle_hook("claude", "session-init", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no session id"));
    }
}
