use crate::supervisor::{ObserverRegistry, kill_pids};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic task that prunes dead PIDs from the registry and kills observer
/// processes nobody registered (orphans of a crashed worker, leaked spawns).
///
/// `start` twice is a no-op; `stop` is safe to call any number of times. A
/// failing cycle is logged and absorbed; the reaper never takes the worker
/// down with it.
pub struct Reaper {
    registry: Arc<ObserverRegistry>,
    interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    pub fn new(registry: Arc<ObserverRegistry>) -> Self {
        Self::with_interval(registry, REAP_INTERVAL)
    }

    pub fn with_interval(registry: Arc<ObserverRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let interval = self.interval;
        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // consume the immediate first tick so the first reap happens one
            // interval after start
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Reaper::tick(&registry).await;
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// One reap cycle: prune, then kill orphans.
    pub async fn tick(registry: &Arc<ObserverRegistry>) {
        let pruned = registry.prune_dead_pids();
        if pruned > 0 {
            debug!("reaper pruned {} dead pid(s)", pruned);
        }

        let orphans = registry.find_unregistered_observers();
        if !orphans.is_empty() {
            warn!("reaper killing {} orphaned observer(s)", orphans.len());
            kill_pids(&orphans).await;
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_tick_empties_dead_registrations() {
        let registry = Arc::new(ObserverRegistry::new());
        registry.register_observers(1, &[4_190_001, 4_190_002]);

        Reaper::tick(&registry).await;

        assert!(registry.registered_pids(1).is_empty());
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_noop_and_stop_is_idempotent() {
        let registry = Arc::new(ObserverRegistry::new());
        let reaper = Reaper::with_interval(registry, Duration::from_secs(3600));

        reaper.start();
        assert!(reaper.is_running());
        reaper.start();
        assert!(reaper.is_running());

        reaper.stop();
        reaper.stop();
        assert!(!reaper.is_running());

        // restart after stop works
        reaper.start();
        assert!(reaper.is_running());
        reaper.stop();
    }
}
