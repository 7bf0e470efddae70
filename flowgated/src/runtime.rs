use crate::registry::Registry;
use chrono::Local;
use flowgate_core::config::ServerConfig;
use flowgate_core::ipc::envelope::PingReply;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Coarse server lifecycle, echoed in ping replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Starting,
    Listening,
    Shutdown,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Starting => "starting",
            Status::Listening => "listening",
            Status::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Default)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(Status::Starting as u8))
    }

    pub fn set(&self, status: Status) {
        self.0.store(status as u8, Ordering::Relaxed);
    }

    pub fn get(&self) -> Status {
        match self.0.load(Ordering::Relaxed) {
            0 => Status::Starting,
            1 => Status::Listening,
            _ => Status::Shutdown,
        }
    }
}

/// Shared daemon state handed to every task. Cloning is cheap; the
/// cancellation token is the single root signal every loop observes.
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<Registry>,
    pub status: Arc<StatusCell>,
    pub cancel: CancellationToken,
}

impl Runtime {
    /// Build the shared state and install the permanent health entry.
    pub async fn new(config: Arc<ServerConfig>) -> Self {
        let runtime = Self {
            config,
            registry: Arc::new(Registry::new()),
            status: Arc::new(StatusCell::new()),
            cancel: CancellationToken::new(),
        };
        let server_uid = runtime.config.server_uid.clone();
        let status = Arc::clone(&runtime.status);
        runtime
            .registry
            .install_health(Arc::new(move || PingReply {
                message: "pong".to_string(),
                status: status.get().as_str().to_string(),
                now: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                server_uid: server_uid.clone(),
            }))
            .await;
        runtime
    }
}
