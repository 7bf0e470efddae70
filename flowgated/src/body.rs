//! Request body normalization: content-type dispatch, the 16 MiB cap, and
//! capture of uploaded files for the worker.

use crate::multipart;
use crate::semantics::MediaType;
use flowgate_core::ipc::envelope::EnvelopeBody;
use flowgate_core::sanitize;
use hyper::body::HttpBody as _;
use hyper::Body;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Hard cap applied while draining the body, before any parse.
pub const MAX_BODY_BYTES: usize = 16 << 20;

/// Prefix of temp files handed to workers. Workers own these files once the
/// envelope has been written to their socket.
pub const WORKER_FILE_PREFIX: &str = "flows-http-request-file-";

/// Normalized body of one request.
#[derive(Debug)]
pub struct BodyPayload {
    pub body: Option<EnvelopeBody>,
    /// Sanitized upload filename -> temp file path.
    pub files: HashMap<String, String>,
}

#[derive(Debug)]
pub enum BodyError {
    TooLarge,
    Read,
    InvalidJson,
    InvalidMultipart,
    UnsupportedContentType,
    CreateFile,
    SaveFile(String),
}

impl BodyError {
    /// Message carried in the 400 envelope for this failure.
    pub fn message(&self) -> String {
        match self {
            BodyError::TooLarge => "Request max size is 16 MB".to_string(),
            BodyError::Read => "Failed to read request body".to_string(),
            BodyError::InvalidJson => "Invalid JSON".to_string(),
            BodyError::InvalidMultipart => "Invalid multipart body".to_string(),
            BodyError::UnsupportedContentType => "Unsupported content type".to_string(),
            BodyError::CreateFile => "Failed to create file for external process".to_string(),
            BodyError::SaveFile(filename) => format!("Failed to save file {filename}"),
        }
    }
}

/// Build the envelope payload for one write-method request.
///
/// On error every temp file captured so far for this request has already
/// been deleted; on success ownership of the files passes to the caller.
pub async fn process(body: Body, media: &MediaType) -> Result<BodyPayload, BodyError> {
    match media.essence.as_str() {
        "application/json" => process_json(body).await,
        "application/x-www-form-urlencoded" => process_urlencoded(body).await,
        "multipart/form-data" => process_multipart(body, media).await,
        _ => Err(BodyError::UnsupportedContentType),
    }
}

async fn process_json(body: Body) -> Result<BodyPayload, BodyError> {
    let raw = read_capped(body).await?;
    let raw = sanitize::strip_invisible_bytes(&raw);
    if serde_json::from_slice::<serde::de::IgnoredAny>(&raw).is_err() {
        return Err(BodyError::InvalidJson);
    }
    // The worker receives the textual JSON, not a re-parsed object.
    let text = String::from_utf8(raw).map_err(|_| BodyError::InvalidJson)?;
    Ok(BodyPayload {
        body: Some(EnvelopeBody::Json(text)),
        files: HashMap::new(),
    })
}

async fn process_urlencoded(body: Body) -> Result<BodyPayload, BodyError> {
    let raw = read_capped(body).await?;
    let mut fields: HashMap<String, String> = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(&raw) {
        // First value per key wins; keys are passed through unstripped.
        fields
            .entry(key.into_owned())
            .or_insert_with(|| sanitize::strip_invisible_str(&value));
    }
    Ok(BodyPayload {
        body: form_body(fields),
        files: HashMap::new(),
    })
}

async fn process_multipart(body: Body, media: &MediaType) -> Result<BodyPayload, BodyError> {
    let Some(boundary) = media.params.get("boundary") else {
        return Err(BodyError::InvalidMultipart);
    };
    let raw = read_capped(body).await?;
    let parts = multipart::parse(&raw, boundary).map_err(|_| BodyError::InvalidMultipart)?;

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut files: HashMap<String, String> = HashMap::new();
    for part in parts {
        if let Some(filename) = part.filename {
            let path = match capture_file(part.data).await {
                Ok(path) => path,
                Err(err) => {
                    delete_worker_files(&files);
                    return Err(match err {
                        FileCaptureError::Create => BodyError::CreateFile,
                        FileCaptureError::Save => BodyError::SaveFile(filename),
                    });
                }
            };
            files.insert(
                sanitize::strip_invisible_str(&filename),
                path.display().to_string(),
            );
        } else if let Some(name) = part.name {
            let value = String::from_utf8_lossy(part.data);
            fields
                .entry(name)
                .or_insert_with(|| sanitize::strip_invisible_str(&value));
        }
    }
    Ok(BodyPayload {
        body: form_body(fields),
        files,
    })
}

fn form_body(fields: HashMap<String, String>) -> Option<EnvelopeBody> {
    if fields.is_empty() {
        None
    } else {
        Some(EnvelopeBody::Form(fields))
    }
}

async fn read_capped(mut body: Body) -> Result<Vec<u8>, BodyError> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|_| BodyError::Read)?;
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

enum FileCaptureError {
    Create,
    Save,
}

/// Copy one uploaded part into a uniquely-named temp file the worker will
/// read. A half-written file is removed before reporting the failure.
async fn capture_file(data: &[u8]) -> Result<PathBuf, FileCaptureError> {
    let temp = tempfile::Builder::new()
        .prefix(WORKER_FILE_PREFIX)
        .tempfile()
        .map_err(|_| FileCaptureError::Create)?;
    let path = temp
        .into_temp_path()
        .keep()
        .map_err(|_| FileCaptureError::Create)?;
    if tokio::fs::write(&path, data).await.is_err() {
        let _ = std::fs::remove_file(&path);
        return Err(FileCaptureError::Save);
    }
    Ok(path)
}

/// Delete temp files still owned by the front-end. Used when a failure
/// happens before the worker could have read the envelope.
pub fn delete_worker_files(files: &HashMap<String, String>) {
    for path in files.values() {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(file = %path, error = ?err, "failed to remove worker file");
            }
        }
    }
}
