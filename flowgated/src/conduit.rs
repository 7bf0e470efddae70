//! Per-request worker exchange: one fresh connection, one envelope each way.

use flowgate_core::ipc::envelope::{RequestEnvelope, ResponseEnvelope};
use flowgate_core::ipc::protocol::{read_document, write_document};
use tokio::net::UnixStream;
use tokio::time::{timeout, Duration};

/// Failure site of an exchange. The caller needs the distinction: temp files
/// are only deleted when the worker cannot have seen the envelope yet.
#[derive(Debug)]
pub enum ConduitError {
    Dial(anyhow::Error),
    Write(anyhow::Error),
    Read(anyhow::Error),
}

/// Dial the worker, send the request envelope, wait for its verdict.
///
/// A worker that closes without replying yields a default (ok=false)
/// envelope. The connection is dropped after one exchange either way.
pub async fn exchange(
    socket_path: &str,
    envelope: &RequestEnvelope,
    deadline: Duration,
) -> Result<ResponseEnvelope, ConduitError> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|err| ConduitError::Dial(err.into()))?;

    write_document(&mut stream, envelope)
        .await
        .map_err(ConduitError::Write)?;

    let reply = timeout(deadline, read_document::<_, ResponseEnvelope>(&mut stream))
        .await
        .map_err(|_| ConduitError::Read(anyhow::anyhow!("read deadline exceeded")))?
        .map_err(ConduitError::Read)?;

    Ok(reply.unwrap_or_default())
}
