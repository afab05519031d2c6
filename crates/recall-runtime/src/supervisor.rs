use recall_providers::Spawner;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// How long a soft-terminated observer gets before the hard kill.
const KILL_DEADLINE: Duration = Duration::from_secs(3);
const KILL_POLL: Duration = Duration::from_millis(100);

/// Registry of every child process spawned by extractor sessions.
///
/// An explicit context object, not a process-wide singleton: the worker owns
/// one instance and hands it to providers through the `Spawner` seam. Map
/// mutations are short critical sections; the waiting in a kill happens with
/// the lock released.
pub struct ObserverRegistry {
    observers: Mutex<HashMap<i64, HashSet<u32>>>,
    cmd_marker: String,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::with_marker(recall_providers::OBSERVER_CMD_MARKER)
    }

    pub fn with_marker(cmd_marker: &str) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            cmd_marker: cmd_marker.to_string(),
        }
    }

    /// Union-add PIDs under a session.
    pub fn register_observers(&self, session_db_id: i64, pids: &[u32]) {
        let mut observers = self.observers.lock().unwrap();
        observers
            .entry(session_db_id)
            .or_default()
            .extend(pids.iter().copied());
    }

    pub fn registered_pids(&self, session_db_id: i64) -> HashSet<u32> {
        self.observers
            .lock()
            .unwrap()
            .get(&session_db_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    pub fn total_pids(&self) -> usize {
        self.observers.lock().unwrap().values().map(HashSet::len).sum()
    }

    /// Current OS-level children of this worker process.
    pub fn snapshot_child_pids(&self) -> HashSet<u32> {
        let own_pid = std::process::id();
        process_table()
            .into_iter()
            .filter(|entry| entry.ppid == own_pid)
            .map(|entry| entry.pid)
            .collect()
    }

    /// Soft-terminate, wait up to the deadline, hard-kill survivors, then
    /// drop the session from the map. Missing PIDs are silently ignored.
    pub async fn kill_session_observers(&self, session_db_id: i64) {
        let pids: Vec<u32> = {
            let mut observers = self.observers.lock().unwrap();
            observers
                .remove(&session_db_id)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default()
        };
        if pids.is_empty() {
            return;
        }
        debug!(
            "killing {} observer(s) for session {}",
            pids.len(),
            session_db_id
        );
        kill_pids(&pids).await;
    }

    /// Parallel kill across all sessions; used at worker shutdown.
    pub async fn kill_all(&self) {
        let sessions: Vec<i64> = self.observers.lock().unwrap().keys().copied().collect();
        let kills = sessions
            .into_iter()
            .map(|session_db_id| self.kill_session_observers(session_db_id));
        futures::future::join_all(kills).await;
    }

    /// Drop PIDs that no longer exist; a session left empty is removed.
    /// Returns how many PIDs were pruned.
    pub fn prune_dead_pids(&self) -> usize {
        let mut observers = self.observers.lock().unwrap();
        let mut pruned = 0;
        observers.retain(|_, pids| {
            let before = pids.len();
            pids.retain(|pid| pid_alive(*pid));
            pruned += before - pids.len();
            !pids.is_empty()
        });
        pruned
    }

    /// Processes whose command line matches the extractor child pattern but
    /// which no session registered: orphans of a crashed worker or a leaked
    /// spawn.
    pub fn find_unregistered_observers(&self) -> Vec<u32> {
        let registered: HashSet<u32> = {
            let observers = self.observers.lock().unwrap();
            observers.values().flatten().copied().collect()
        };
        let own_pid = std::process::id();

        process_table()
            .into_iter()
            .filter(|entry| {
                entry.pid != own_pid
                    && !registered.contains(&entry.pid)
                    && entry.cmdline.contains(&self.cmd_marker)
            })
            .map(|entry| entry.pid)
            .collect()
    }
}

/// Per-session spawner handed to providers: registration happens before the
/// provider sees its own child handle.
pub struct SessionSpawner {
    registry: Arc<ObserverRegistry>,
    session_db_id: i64,
}

impl SessionSpawner {
    pub fn new(registry: Arc<ObserverRegistry>, session_db_id: i64) -> Self {
        Self {
            registry,
            session_db_id,
        }
    }
}

impl Spawner for SessionSpawner {
    fn spawned(&self, pid: u32) {
        self.registry.register_observers(self.session_db_id, &[pid]);
    }
}

/// SIGTERM, bounded wait, SIGKILL for survivors. Individual failures are
/// logged and absorbed.
pub async fn kill_pids(pids: &[u32]) {
    for pid in pids {
        terminate(*pid);
    }

    let deadline = tokio::time::Instant::now() + KILL_DEADLINE;
    loop {
        if !pids.iter().any(|pid| pid_alive(*pid)) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(KILL_POLL).await;
    }

    for pid in pids {
        if pid_alive(*pid) {
            warn!("observer {} survived SIGTERM, sending SIGKILL", pid);
            force_kill(*pid);
        }
    }
}

#[derive(Debug, Clone)]
struct ProcessEntry {
    pid: u32,
    ppid: u32,
    cmdline: String,
}

#[cfg(target_os = "linux")]
fn process_table() -> Vec<ProcessEntry> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut table = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // field 4 of /proc/<pid>/stat is ppid; the comm field may contain
        // spaces, so parse from after the closing paren
        let ppid = stat
            .rfind(')')
            .and_then(|end| stat[end + 1..].split_whitespace().nth(1))
            .and_then(|field| field.parse::<u32>().ok())
            .unwrap_or(0);

        let cmdline = std::fs::read(entry.path().join("cmdline"))
            .map(|bytes| {
                bytes
                    .split(|b| *b == 0)
                    .filter(|part| !part.is_empty())
                    .map(|part| String::from_utf8_lossy(part).into_owned())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        table.push(ProcessEntry { pid, ppid, cmdline });
    }
    table
}

#[cfg(not(target_os = "linux"))]
fn process_table() -> Vec<ProcessEntry> {
    Vec::new()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

#[cfg(not(unix))]
fn force_kill(_pid: u32) {}
