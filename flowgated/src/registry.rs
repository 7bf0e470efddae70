//! Path-indexed registry of one-shot handler entries.
//!
//! Two-tier locking: the registry RwLock guards the map shape only, each
//! entry's mutex guards its mutable state. Entry locks may be taken while
//! holding the registry lock; the reverse order never occurs.

use flowgate_core::ipc::envelope::{CommandEnvelope, CommandReply, PingReply};
use flowgate_core::sanitize;
use http::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// The permanent health-check resource. Always present, never expires.
pub const HEALTH_PATH: &str = "/ping";

pub type HealthResponder = Arc<dyn Fn() -> PingReply + Send + Sync>;

/// One registered resource.
pub struct HandlerEntry {
    pub state: Mutex<EntryState>,
    /// Synchronous responder, set only on the health entry.
    pub health: Option<HealthResponder>,
}

#[derive(Debug, Clone)]
pub struct EntryState {
    /// The entry still accepts requests.
    pub enabled: bool,
    /// A request against this entry is in flight.
    pub handling: bool,
    /// A worker returned ok=true; terminal, the entry awaits removal.
    pub handled: bool,
    /// The worker's listen socket.
    pub socket_path: String,
    /// Identifier the worker chose for itself; required for deregistration.
    pub worker_id: String,
    pub allowed_methods: Vec<Method>,
    /// Seconds until expiry; -1 never expires.
    pub timeout: i64,
}

pub struct Registry {
    entries: RwLock<HashMap<String, Arc<HandlerEntry>>>,
}

/// Result of one housekeeping pass.
pub struct SweepOutcome {
    pub removed: Vec<SweptEntry>,
    /// Live entries other than the health entry after the pass.
    pub worker_entries: usize,
}

pub struct SweptEntry {
    pub path: String,
    pub socket_path: String,
    pub worker_id: String,
    pub reason: &'static str,
}

fn default_method_set() -> Vec<Method> {
    vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
    ]
}

fn parse_registrable_method(raw: &str) -> Option<Method> {
    match raw {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        _ => None,
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, path: &str) -> Option<Arc<HandlerEntry>> {
        self.entries.read().await.get(path).cloned()
    }

    /// Install a resource from a REGISTER command.
    ///
    /// The entry is inserted as a busy placeholder before its fields are
    /// filled, so a racing HTTP request sees either no entry (404) or a busy
    /// one (423), never a half-initialized socket path.
    pub async fn register(&self, cmd: &CommandEnvelope) -> CommandReply {
        let mut methods = Vec::with_capacity(cmd.allowed_methods.len());
        for raw in &cmd.allowed_methods {
            let Some(method) = parse_registrable_method(raw) else {
                return CommandReply::fail("invalid method");
            };
            methods.push(method);
        }

        let path = sanitize::strip_invisible_str(cmd.path.trim());
        if path.is_empty() {
            return CommandReply::fail("empty path");
        }

        let entry = {
            let mut entries = self.entries.write().await;
            if entries.contains_key(&path) {
                return CommandReply::fail("path already registered");
            }
            let entry = Arc::new(HandlerEntry {
                state: Mutex::new(EntryState {
                    enabled: true,
                    handling: true,
                    handled: false,
                    socket_path: String::new(),
                    worker_id: String::new(),
                    allowed_methods: Vec::new(),
                    timeout: 0,
                }),
                health: None,
            });
            entries.insert(path, Arc::clone(&entry));
            entry
        };

        let mut state = entry.state.lock().await;
        state.socket_path = cmd.socket_file.clone();
        state.worker_id = cmd.external_process_id.clone();
        state.timeout = cmd.timeout;
        state.allowed_methods = if methods.is_empty() {
            default_method_set()
        } else {
            methods
        };
        // Ready for service.
        state.handling = false;
        drop(state);

        CommandReply::ok()
    }

    /// Remove a resource from a DEREGISTER command. Socket file deletion is
    /// the housekeeping pass's job, not ours.
    pub async fn deregister(&self, cmd: &CommandEnvelope) -> CommandReply {
        let mut entries = self.entries.write().await;
        if cmd.path == HEALTH_PATH {
            return CommandReply::fail("resource not found");
        }
        let Some(entry) = entries.get(&cmd.path) else {
            return CommandReply::fail("resource not found");
        };
        let owner = entry.state.lock().await.worker_id.clone();
        if owner != cmd.external_process_id {
            return CommandReply::fail("wrong resource owner");
        }
        entries.remove(&cmd.path);
        CommandReply::ok()
    }

    /// Install the permanent health entry.
    pub async fn install_health(&self, responder: HealthResponder) {
        let entry = Arc::new(HandlerEntry {
            state: Mutex::new(EntryState {
                enabled: true,
                handling: false,
                handled: false,
                socket_path: String::new(),
                worker_id: String::new(),
                allowed_methods: vec![Method::GET],
                timeout: -1,
            }),
            health: Some(responder),
        });
        self.entries
            .write()
            .await
            .insert(HEALTH_PATH.to_string(), entry);
    }

    /// One tick of the lifetime countdown. Busy and consumed entries are
    /// left alone so an in-flight request can never expire under itself.
    pub async fn decrement_timeouts(&self) {
        let snapshot: Vec<(String, Arc<HandlerEntry>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(path, entry)| (path.clone(), Arc::clone(entry)))
            .collect();
        for (path, entry) in snapshot {
            if path == HEALTH_PATH {
                continue;
            }
            let mut state = entry.state.lock().await;
            if state.handled || state.handling || state.timeout <= 0 {
                continue;
            }
            state.timeout -= 1;
        }
    }

    /// One housekeeping pass: drop consumed and expired entries. Only map
    /// surgery happens under the write lock; the caller unlinks socket
    /// files afterwards.
    pub async fn sweep(&self) -> SweepOutcome {
        let mut entries = self.entries.write().await;
        let mut removed = Vec::new();
        for (path, entry) in entries.iter() {
            if path == HEALTH_PATH {
                continue;
            }
            let state = entry.state.lock().await;
            if state.handling {
                continue;
            }
            let reason = if !state.enabled && state.handled {
                Some("handled")
            } else if state.timeout <= 0 {
                Some("timeout")
            } else {
                None
            };
            if let Some(reason) = reason {
                removed.push(SweptEntry {
                    path: path.clone(),
                    socket_path: state.socket_path.clone(),
                    worker_id: state.worker_id.clone(),
                    reason,
                });
            }
        }
        for swept in &removed {
            entries.remove(&swept.path);
        }
        SweepOutcome {
            worker_entries: entries.len().saturating_sub(1),
            removed,
        }
    }
}
