//! Background reapers: lifetime countdown, consumed/expired removal, and
//! the drain-to-shutdown trigger.

use crate::runtime::{Runtime, Status};
use anyhow::Result;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info, warn};

const DECREMENT_PERIOD: Duration = Duration::from_secs(1);
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(3);

/// Once per second, count live resources one step closer to expiry.
pub async fn run_timeout_ticker(runtime: Runtime) -> Result<()> {
    let mut ticker = interval_at(Instant::now() + DECREMENT_PERIOD, DECREMENT_PERIOD);
    loop {
        tokio::select! {
            _ = runtime.cancel.cancelled() => {
                debug!("timeout ticker stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                runtime.registry.decrement_timeouts().await;
            }
        }
    }
}

/// Every three seconds, remove consumed and expired entries, unlink their
/// worker sockets, and trigger shutdown once only the health entry remains.
/// On cancellation the command socket file is removed here.
pub async fn run_housekeeping(runtime: Runtime) -> Result<()> {
    info!("housekeeping started");
    let mut ticker = interval_at(Instant::now() + HOUSEKEEPING_PERIOD, HOUSEKEEPING_PERIOD);
    loop {
        tokio::select! {
            _ = runtime.cancel.cancelled() => {
                remove_socket_file(&runtime.config.command_socket);
                info!("housekeeping stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                let outcome = runtime.registry.sweep().await;
                for swept in &outcome.removed {
                    if !swept.socket_path.is_empty() {
                        remove_socket_file(&swept.socket_path);
                    }
                    info!(
                        resource = %swept.path,
                        worker = %swept.worker_id,
                        reason = swept.reason,
                        "resource removed"
                    );
                }
                if outcome.worker_entries == 0 {
                    info!("no resources remaining; shutting down");
                    runtime.status.set(Status::Shutdown);
                    runtime.cancel.cancel();
                }
            }
        }
    }
}

fn remove_socket_file(path: &str) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(file = %path, "socket file removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(file = %path, error = ?err, "failed to remove socket file"),
    }
}
