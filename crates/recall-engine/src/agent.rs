use crate::error::{Error, Result};
use crate::history::{ChatHistory, ContextCaps};
use crate::{parser, prompts};
use recall_providers::{ChatProvider, ChatReply};
use recall_store::{NewObservation, PendingMessageRow, SessionRow};
use recall_types::{PendingKind, util};
use recall_vector::{ObservationSync, SharedStore, SummarySync, VectorBackend};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Agent lifecycle. `Aborted` and `Failed` are terminal from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Initializing,
    RunningInit,
    Draining,
    Summarizing,
    Done,
    Aborted,
    Failed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Initializing => "initializing",
            AgentState::RunningInit => "running_init",
            AgentState::Draining => "draining",
            AgentState::Summarizing => "summarizing",
            AgentState::Done => "done",
            AgentState::Aborted => "aborted",
            AgentState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub state: AgentState,
    pub observations_stored: usize,
    pub summaries_stored: usize,
    pub messages_processed: usize,
}

/// One generator run over a session's pending queue.
///
/// Writes go through the store first (to obtain the row id), then to the
/// vector backend best-effort; a pending row is marked processed only after
/// the store write succeeded, so a crash mid-turn re-tries the row on the
/// next run.
pub struct SessionAgent {
    store: SharedStore,
    vector: Arc<dyn VectorBackend>,
    primary: Arc<dyn ChatProvider>,
    fallback: Option<Arc<dyn ChatProvider>>,
    caps: ContextCaps,
    cancel: CancellationToken,
    state: AgentState,
    on_fallback: bool,
}

impl SessionAgent {
    pub fn new(
        store: SharedStore,
        vector: Arc<dyn VectorBackend>,
        primary: Arc<dyn ChatProvider>,
        fallback: Option<Arc<dyn ChatProvider>>,
        caps: ContextCaps,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            vector,
            primary,
            fallback,
            caps,
            cancel,
            state: AgentState::Initializing,
            on_fallback: false,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Run to completion: establish the memory session id, drain the queue,
    /// summarize on the stop message.
    pub async fn start_session(mut self, session: SessionRow) -> Result<AgentOutcome> {
        let mut outcome = AgentOutcome {
            state: self.state,
            observations_stored: 0,
            summaries_stored: 0,
            messages_processed: 0,
        };

        let mut history = ChatHistory::with_system(prompts::extractor_system_prompt(
            &session.project,
            &session.content_session_id,
            &session.user_prompt,
        ));

        let memory_session_id = match self.establish_memory_session(&session, &mut history).await {
            Ok(id) => id,
            Err(err) => return self.fail(&session, outcome, err),
        };

        self.state = AgentState::Draining;
        loop {
            if self.cancel.is_cancelled() {
                self.state = AgentState::Aborted;
                break;
            }

            let message = {
                let store = self.store.lock().unwrap();
                store.next_pending(session.id)?
            };
            let Some(message) = message else {
                self.state = AgentState::Done;
                break;
            };

            let result = match message.kind {
                PendingKind::Observation => {
                    self.handle_observation(
                        &session,
                        &memory_session_id,
                        &message,
                        &mut history,
                        &mut outcome,
                    )
                    .await
                }
                PendingKind::Summarize => {
                    self.state = AgentState::Summarizing;
                    self.handle_summary(
                        &session,
                        &memory_session_id,
                        &message,
                        &mut history,
                        &mut outcome,
                    )
                    .await
                }
            };

            match result {
                Ok(()) => outcome.messages_processed += 1,
                Err(Error::Cancelled) => {
                    self.state = AgentState::Aborted;
                    break;
                }
                Err(err) => return self.fail(&session, outcome, err),
            }

            if self.state == AgentState::Done {
                break;
            }
        }

        outcome.state = self.state;
        info!(
            "session {} generator finished: {} ({} messages, {} observations)",
            session.id, self.state, outcome.messages_processed, outcome.observations_stored
        );
        Ok(outcome)
    }

    /// The memory session id is persisted before any observation is written.
    async fn establish_memory_session(
        &mut self,
        session: &SessionRow,
        history: &mut ChatHistory,
    ) -> Result<String> {
        if let Some(id) = &session.memory_session_id {
            self.state = AgentState::Draining;
            return Ok(id.clone());
        }

        self.state = AgentState::RunningInit;
        history.push_user(prompts::init_prompt(&session.project, &session.user_prompt));
        self.truncate(history);

        let reply = self.call(history).await?;
        history.push_assistant(reply.text.as_str());

        let memory_session_id = reply.provider_session_id.clone().unwrap_or_else(|| {
            format!(
                "{}-{}",
                self.current_provider().name(),
                session.content_session_id
            )
        });
        {
            let store = self.store.lock().unwrap();
            store.update_memory_session_id(session.id, &memory_session_id)?;
        }
        Ok(memory_session_id)
    }

    async fn handle_observation(
        &mut self,
        session: &SessionRow,
        memory_session_id: &str,
        message: &PendingMessageRow,
        history: &mut ChatHistory,
        outcome: &mut AgentOutcome,
    ) -> Result<()> {
        let prompt = prompts::observation_prompt(
            message.tool_name.as_deref().unwrap_or("unknown"),
            &message.tool_input_json(),
            &message.tool_response_json(),
            message.cwd.as_deref(),
        );
        history.push_user(prompt);
        self.truncate(history);

        let reply = self.call(history).await?;
        history.push_assistant(reply.text.as_str());

        let parsed = parser::parse_observations(&reply.text);
        if parsed.is_empty() {
            debug!(
                "no observations extracted for message {} (reply: {})",
                message.id,
                reply.text.chars().take(200).collect::<String>()
            );
        } else {
            let epoch_base = util::now_epoch_ms();
            let batch: Vec<NewObservation> = parsed
                .into_iter()
                .enumerate()
                .map(|(index, observation)| NewObservation {
                    session_id: Some(session.id),
                    content_session_id: Some(session.content_session_id.clone()),
                    memory_session_id: memory_session_id.to_string(),
                    project: session.project.clone(),
                    observation,
                    prompt_number: message.prompt_number,
                    // distinct instants keep same-titled siblings from one
                    // reply out of each other's dedup key
                    created_at_epoch: epoch_base + index as i64,
                })
                .collect();

            let stored = {
                let store = self.store.lock().unwrap();
                store.store_observations(&batch)?
            };

            for (stored_id, new_obs) in stored.iter().zip(&batch) {
                if !stored_id.imported {
                    continue;
                }
                outcome.observations_stored += 1;
                let record = ObservationSync {
                    sqlite_id: stored_id.id,
                    memory_session_id: new_obs.memory_session_id.clone(),
                    project: new_obs.project.clone(),
                    observation: new_obs.observation.clone(),
                    prompt_number: new_obs.prompt_number,
                    created_at_epoch: new_obs.created_at_epoch,
                };
                // best-effort: backfill reconciles a failed sync later
                if let Err(err) = self.vector.sync_observation(&record).await {
                    warn!("vector sync failed for observation {}: {}", stored_id.id, err);
                }
            }
        }

        let store = self.store.lock().unwrap();
        store.mark_processed(message.id)?;
        Ok(())
    }

    async fn handle_summary(
        &mut self,
        session: &SessionRow,
        memory_session_id: &str,
        message: &PendingMessageRow,
        history: &mut ChatHistory,
        outcome: &mut AgentOutcome,
    ) -> Result<()> {
        let prompt = prompts::summary_prompt(
            &session.user_prompt,
            message.last_assistant_message.as_deref(),
        );
        history.push_user(prompt);
        self.truncate(history);

        let reply = self.call(history).await?;
        history.push_assistant(reply.text.as_str());

        match parser::parse_summary(&reply.text) {
            Some(summary) => {
                let epoch = util::now_epoch_ms();
                let stored = {
                    let store = self.store.lock().unwrap();
                    store.store_summary(
                        Some(session.id),
                        memory_session_id,
                        &session.project,
                        &summary,
                        epoch,
                    )?
                };
                outcome.summaries_stored += 1;
                let record = SummarySync {
                    sqlite_id: stored.id,
                    memory_session_id: memory_session_id.to_string(),
                    project: session.project.clone(),
                    summary,
                    created_at_epoch: epoch,
                };
                if let Err(err) = self.vector.sync_summary(&record).await {
                    warn!("vector sync failed for summary {}: {}", stored.id, err);
                }
            }
            None => {
                warn!(
                    "summary parse produced nothing for session {} (reply: {})",
                    session.id,
                    reply.text.chars().take(200).collect::<String>()
                );
            }
        }

        {
            let store = self.store.lock().unwrap();
            store.mark_processed(message.id)?;
            store.mark_session_completed(session.id)?;
        }
        self.state = AgentState::Done;
        Ok(())
    }

    fn current_provider(&self) -> &Arc<dyn ChatProvider> {
        if self.on_fallback {
            self.fallback.as_ref().unwrap_or(&self.primary)
        } else {
            &self.primary
        }
    }

    /// One LLM turn, racing the cancellation token. A transient connectivity
    /// failure hands the conversation to the fallback provider once;
    /// anything else (4xx included) surfaces.
    async fn call(&mut self, history: &ChatHistory) -> Result<ChatReply> {
        let first_attempt = self.raced_send(history).await;
        match first_attempt {
            Ok(reply) => Ok(reply),
            Err(Error::Provider(err))
                if err.is_transient() && !self.on_fallback && self.fallback.is_some() =>
            {
                warn!(
                    "provider '{}' unreachable ({}); handing session to fallback '{}'",
                    self.primary.name(),
                    err,
                    self.fallback.as_ref().unwrap().name()
                );
                self.on_fallback = true;
                self.raced_send(history).await
            }
            Err(err) => Err(err),
        }
    }

    async fn raced_send(&self, history: &ChatHistory) -> Result<ChatReply> {
        let provider = self.current_provider().clone();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            reply = provider.send(history.messages()) => Ok(reply?),
        }
    }

    fn truncate(&self, history: &mut ChatHistory) {
        let dropped = history.truncate(&self.caps);
        if dropped > 0 {
            debug!("history truncated: dropped {} oldest messages", dropped);
        }
    }

    fn fail(
        mut self,
        session: &SessionRow,
        mut outcome: AgentOutcome,
        err: Error,
    ) -> Result<AgentOutcome> {
        self.state = AgentState::Failed;
        outcome.state = self.state;
        if let Ok(store) = self.store.lock() {
            if let Err(mark_err) = store.mark_session_failed(session.id) {
                warn!("failed to mark session {} failed: {}", session.id, mark_err);
            }
        }
        warn!("session {} failed: {}", session.id, err);
        Err(err)
    }
}
