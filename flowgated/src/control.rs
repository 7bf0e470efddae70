//! Control plane: REGISTER/DEREGISTER over the command socket.

use crate::runtime::Runtime;
use anyhow::Result;
use flowgate_core::ipc::envelope::{
    CommandEnvelope, CommandReply, COMMAND_DEREGISTER, COMMAND_REGISTER,
};
use flowgate_core::ipc::protocol::{read_document, write_document};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

/// Accept loop on the command socket. Connections are served inline: a
/// command is a single small document, and registration order matters to
/// workers racing their own HTTP requests.
pub async fn run(listener: UnixListener, runtime: Runtime) -> Result<()> {
    loop {
        tokio::select! {
            _ = runtime.cancel.cancelled() => {
                info!(socket = %runtime.config.command_socket, "control socket closing");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = ?err, "control accept failed");
                        continue;
                    }
                };
                if let Err(err) = serve_command(stream, &runtime).await {
                    warn!(error = ?err, "control connection failed");
                }
            }
        }
    }
}

async fn serve_command(mut stream: UnixStream, runtime: &Runtime) -> Result<()> {
    let cmd: CommandEnvelope = match read_document(&mut stream).await {
        // Empty input: the peer connected and left. Close silently.
        Ok(None) => return Ok(()),
        Ok(Some(cmd)) => cmd,
        Err(err) => {
            let reply = CommandReply::fail(err.to_string());
            write_document(&mut stream, &reply).await.ok();
            return Ok(());
        }
    };

    let reply = match cmd.command.as_str() {
        COMMAND_REGISTER => runtime.registry.register(&cmd).await,
        COMMAND_DEREGISTER => runtime.registry.deregister(&cmd).await,
        _ => CommandReply::fail("unknown command"),
    };

    write_document(&mut stream, &reply).await?;
    info!(
        operation = %cmd.command,
        resource = %cmd.path,
        worker = %cmd.external_process_id,
        ok = reply.ok,
        error = reply.error.as_deref().unwrap_or(""),
        "command handled"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::config::ServerConfig;
    use std::sync::Arc;

    fn socket_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "flowgate-control-{tag}-{}.sock",
            std::process::id()
        ))
    }

    async fn start(tag: &str) -> (Runtime, std::path::PathBuf) {
        let path = socket_path(tag);
        let _ = std::fs::remove_file(&path);
        let runtime = Runtime::new(Arc::new(ServerConfig {
            server_uid: "S".to_string(),
            command_socket: path.to_string_lossy().into_owned(),
            ..ServerConfig::default()
        }))
        .await;
        let listener = UnixListener::bind(&path).expect("bind");
        tokio::spawn(run(listener, runtime.clone()));
        (runtime, path)
    }

    async fn roundtrip(path: &std::path::Path, cmd: &CommandEnvelope) -> CommandReply {
        let mut stream = UnixStream::connect(path).await.expect("connect");
        write_document(&mut stream, cmd).await.expect("write");
        read_document(&mut stream)
            .await
            .expect("read")
            .expect("reply")
    }

    #[tokio::test]
    async fn register_then_deregister_through_the_socket() {
        let (runtime, path) = start("roundtrip").await;

        let cmd = CommandEnvelope {
            command: "REGISTER".to_string(),
            path: "/a".to_string(),
            socket_file: "/tmp/w.sock".to_string(),
            external_process_id: "W".to_string(),
            allowed_methods: vec!["POST".to_string()],
            timeout: 10,
        };
        let reply = roundtrip(&path, &cmd).await;
        assert!(reply.ok, "error: {:?}", reply.error);
        assert!(runtime.registry.lookup("/a").await.is_some());

        let cmd = CommandEnvelope {
            command: "DEREGISTER".to_string(),
            path: "/a".to_string(),
            external_process_id: "W".to_string(),
            ..Default::default()
        };
        let reply = roundtrip(&path, &cmd).await;
        assert!(reply.ok);
        assert!(runtime.registry.lookup("/a").await.is_none());

        runtime.cancel.cancel();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let (runtime, path) = start("unknown").await;
        let cmd = CommandEnvelope {
            command: "EXPLODE".to_string(),
            ..Default::default()
        };
        let reply = roundtrip(&path, &cmd).await;
        assert_eq!(reply.error.as_deref(), Some("unknown command"));
        runtime.cancel.cancel();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn empty_connection_is_closed_silently() {
        let (runtime, path) = start("empty").await;
        let stream = UnixStream::connect(&path).await.expect("connect");
        drop(stream);
        // The loop must survive the empty connection and keep serving.
        let cmd = CommandEnvelope {
            command: "REGISTER".to_string(),
            path: "/after".to_string(),
            socket_file: "/tmp/w.sock".to_string(),
            external_process_id: "W".to_string(),
            timeout: 10,
            ..Default::default()
        };
        let reply = roundtrip(&path, &cmd).await;
        assert!(reply.ok);
        runtime.cancel.cancel();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn malformed_document_gets_an_error_reply() {
        use tokio::io::AsyncWriteExt;

        let (runtime, path) = start("malformed").await;
        let mut stream = UnixStream::connect(&path).await.expect("connect");
        stream.write_all(b"not json at all\n").await.expect("write");
        let reply: CommandReply = read_document(&mut stream)
            .await
            .expect("read")
            .expect("reply");
        assert!(!reply.ok);
        runtime.cancel.cancel();
        let _ = std::fs::remove_file(&path);
    }
}
