use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use flowgate_core::config::{load_config, ServerConfig};
use flowgate_core::observability::init_logging;
use flowgated::runtime::{Runtime, Status};
use flowgated::{control, ingress, reaper};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, UnixListener};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "flowgated",
    about = "HTTP front-end brokering one-shot requests to external workers"
)]
struct Cli {
    /// Server listens on this address for HTTP requests.
    #[arg(long)]
    address: Option<String>,

    /// Socket file external processes must use to register resources.
    #[arg(long)]
    command_socket: Option<String>,

    /// Server instance unique identifier (no default, mandatory).
    #[arg(long)]
    server_uid: Option<String>,

    /// How long (in seconds) to wait for an external process reply.
    #[arg(long)]
    timeout_read_external_process: Option<u64>,

    /// Path to an optional configuration file; explicit flags win.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(address) = cli.address {
        config.address = address;
    }
    if let Some(command_socket) = cli.command_socket {
        config.command_socket = command_socket;
    }
    if let Some(server_uid) = cli.server_uid {
        config.server_uid = server_uid;
    }
    if let Some(timeout) = cli.timeout_read_external_process {
        config.timeout_read_external_process = timeout;
    }

    if config.server_uid.trim().is_empty() {
        Cli::command().print_help()?;
        return Ok(());
    }
    config.validate()?;
    init_logging(&config.log_level)?;

    run(Arc::new(config)).await
}

async fn run(config: Arc<ServerConfig>) -> Result<()> {
    let command_listener = bind_command_socket(&config.command_socket)?;
    info!(socket = %config.command_socket, "command socket ready");

    let http_listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("failed to bind http address {}", config.address))?;
    info!(address = %config.address, "http listening");

    let runtime = Runtime::new(config).await;
    runtime.status.set(Status::Listening);

    let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();
    {
        let runtime = runtime.clone();
        tasks.spawn(async move { ("control", control::run(command_listener, runtime).await) });
    }
    {
        let runtime = runtime.clone();
        tasks.spawn(async move { ("http", ingress::run(http_listener, runtime).await) });
    }
    {
        let runtime = runtime.clone();
        tasks.spawn(async move { ("timeout", reaper::run_timeout_ticker(runtime).await) });
    }
    {
        let runtime = runtime.clone();
        tasks.spawn(async move { ("housekeeping", reaper::run_housekeeping(runtime).await) });
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; shutting down");
            runtime.status.set(Status::Shutdown);
            runtime.cancel.cancel();
        }
        _ = sigterm.recv() => {
            info!("termination signal received; shutting down");
            runtime.status.set(Status::Shutdown);
            runtime.cancel.cancel();
        }
        _ = runtime.cancel.cancelled() => {}
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((label, Err(err))) => warn!(task = label, error = ?err, "task failed"),
            Err(err) => warn!(error = ?err, "task join failed"),
        }
    }
    info!("shutdown complete");
    Ok(())
}

/// Bind the control socket, replacing a stale socket file. A pre-existing
/// path that is not a socket aborts startup rather than being clobbered.
fn bind_command_socket(path: &str) -> Result<UnixListener> {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        use std::os::unix::fs::FileTypeExt;
        if meta.file_type().is_socket() {
            let _ = std::fs::remove_file(path);
        } else {
            return Err(anyhow::anyhow!(
                "path '{}' exists and is not a Unix socket",
                path
            ));
        }
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind command socket {}", path))?;
    // This surface accepts registration commands; keep it local-user only.
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}
