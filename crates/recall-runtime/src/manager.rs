use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a generator run ended. `natural` covers drained-to-empty, summarized,
/// and failed runs; only a cancelled run is unnatural, because its token
/// must stay cancelled until the owner replaces it deliberately.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorExit {
    pub natural: bool,
}

struct SessionSlot {
    running: bool,
    cancel: CancellationToken,
    spawn_count: u64,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            running: false,
            cancel: CancellationToken::new(),
            spawn_count: 0,
        }
    }
}

/// The dedup guard: at most one generator per session.
///
/// `ensure_generator` either claims the session's slot and spawns, or
/// returns without doing anything because a generator is already in flight.
/// The completion path runs on every exit — natural, cancelled, or failed —
/// clears the slot, and after a natural exit installs a fresh cancellation
/// token so the next run is not born cancelled.
pub struct SessionManager {
    slots: Mutex<HashMap<i64, SessionSlot>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Returns true if a generator was spawned, false if one was already
    /// running for the session.
    pub fn ensure_generator<F, Fut>(self: &Arc<Self>, session_db_id: i64, make: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = GeneratorExit> + Send + 'static,
    {
        let token = {
            let mut slots = self.slots.lock().unwrap();
            let slot = slots.entry(session_db_id).or_insert_with(SessionSlot::new);
            if slot.running {
                return false;
            }
            slot.running = true;
            slot.spawn_count += 1;
            slot.cancel.clone()
        };

        let manager = Arc::clone(self);
        let future = make(token);
        tokio::spawn(async move {
            let exit = future.await;
            manager.on_generator_complete(session_db_id, exit);
        });
        true
    }

    fn on_generator_complete(&self, session_db_id: i64, exit: GeneratorExit) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(&session_db_id) {
            slot.running = false;
            if exit.natural {
                slot.cancel = CancellationToken::new();
            }
            debug!(
                "generator for session {} completed (natural: {})",
                session_db_id, exit.natural
            );
        }
    }

    /// Cancel the in-flight generator, if any. Returns whether a token fired.
    pub fn cancel_session(&self, session_db_id: i64) -> bool {
        let slots = self.slots.lock().unwrap();
        match slots.get(&session_db_id) {
            Some(slot) => {
                slot.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, session_db_id: i64) -> bool {
        self.slots
            .lock()
            .unwrap()
            .get(&session_db_id)
            .is_some_and(|slot| slot.running)
    }

    pub fn spawn_count(&self, session_db_id: i64) -> u64 {
        self.slots
            .lock()
            .unwrap()
            .get(&session_db_id)
            .map_or(0, |slot| slot.spawn_count)
    }

    pub fn cancellation_token(&self, session_db_id: i64) -> Option<CancellationToken> {
        self.slots
            .lock()
            .unwrap()
            .get(&session_db_id)
            .map(|slot| slot.cancel.clone())
    }
}
