use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single IPC document. Matches the HTTP body cap so a
/// worker reply can never out-size what the front-end accepts.
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Write one JSON document. The trailing newline terminates the document for
/// line-oriented worker runtimes; reading does not depend on it.
pub async fn write_document<W: AsyncWrite + Unpin, T: serde::Serialize>(
    writer: &mut W,
    data: &T,
) -> Result<()> {
    let mut payload = serde_json::to_vec(data)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one JSON document, accumulating until a complete value parses.
///
/// Returns `Ok(None)` when the peer closes before sending anything (clean
/// EOF). EOF in the middle of a document is an error, as is a document
/// larger than [`MAX_DOCUMENT_BYTES`].
pub async fn read_document<R: AsyncRead + Unpin, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<Option<T>> {
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        if let Some(value) = parse_complete(&buf)? {
            return Ok(Some(value));
        }
        if buf.len() > MAX_DOCUMENT_BYTES {
            return Err(anyhow!("IPC document too large"));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(None);
            }
            return Err(anyhow!("connection closed mid-document"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn parse_complete<T: DeserializeOwned>(buf: &[u8]) -> Result<Option<T>> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<T>();
    match stream.next() {
        Some(Ok(value)) => Ok(Some(value)),
        // The document is still arriving.
        Some(Err(err)) if err.is_eof() => Ok(None),
        Some(Err(err)) => Err(err.into()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::envelope::ResponseEnvelope;

    #[tokio::test]
    async fn document_round_trips() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = ResponseEnvelope {
            ok: true,
            code: 0,
            status: "success".to_string(),
            message: "done".to_string(),
            instance_uid: "W".to_string(),
        };
        write_document(&mut client, &sent).await.expect("write");
        let received: ResponseEnvelope = read_document(&mut server)
            .await
            .expect("read")
            .expect("document");
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn clean_eof_reads_as_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let received: Option<ResponseEnvelope> = read_document(&mut server).await.expect("read");
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn eof_mid_document_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"{\"ok\":tr").await.expect("write");
        drop(client);
        let err = read_document::<_, ResponseEnvelope>(&mut server)
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("mid-document"), "err: {err}");
    }

    #[tokio::test]
    async fn document_split_across_reads_is_assembled() {
        let (mut client, mut server) = tokio::io::duplex(8);
        let reader = tokio::spawn(async move {
            read_document::<_, ResponseEnvelope>(&mut server)
                .await
                .expect("read")
                .expect("document")
        });
        client
            .write_all(b"{\"ok\":false,\"code\":400,\"status\":\"fail\",\"message\":\"m\"}")
            .await
            .expect("write");
        let received = reader.await.expect("join");
        assert_eq!(received.code, 400);
    }
}
