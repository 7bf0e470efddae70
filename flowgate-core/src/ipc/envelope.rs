use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One HTTP request, normalized for an external worker process.
///
/// Sent as a single JSON document on the worker's listen socket. Header
/// values that are not valid UTF-8 are carried lossily; the body is either
/// the raw JSON text of the request or a flat field map, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<EnvelopeBody>,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<HashMap<String, String>>,
    pub cookies: Vec<Cookie>,
    /// Server instance unique identifier.
    pub instance_uid: String,
}

/// Body payload of a [`RequestEnvelope`].
///
/// `Json` carries the request's raw JSON text as a string so the worker
/// receives exactly what the client sent (post-sanitization). `Form` carries
/// the first value per field for urlencoded and multipart requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeBody {
    Json(String),
    Form(HashMap<String, String>),
}

/// One request cookie, name=value only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Worker verdict for one request.
///
/// `ok = false` maps to HTTP 400 and leaves the resource armed;
/// `ok = true` maps to HTTP 202 and permanently consumes it. Missing fields
/// deserialize to their defaults, so a worker that closes without replying
/// is indistinguishable from an explicit `ok = false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseEnvelope {
    pub ok: bool,
    pub code: i64,
    pub status: String,
    pub message: String,
    /// External process unique identifier.
    pub instance_uid: String,
}

/// Control-plane command sent by a worker on the command socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandEnvelope {
    pub command: String,
    pub path: String,
    pub socket_file: String,
    pub external_process_id: String,
    pub allowed_methods: Vec<String>,
    /// Resource lifetime in seconds; -1 never expires.
    pub timeout: i64,
}

/// Control-plane reply, one per connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Health-check answer for `GET /ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub message: String,
    pub status: String,
    pub now: String,
    pub server_uid: String,
}

pub const COMMAND_REGISTER: &str = "REGISTER";
pub const COMMAND_DEREGISTER: &str = "DEREGISTER";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_omits_absent_body_and_files() {
        let envelope = RequestEnvelope {
            method: "GET".to_string(),
            path: "/a".to_string(),
            headers: HashMap::new(),
            body: None,
            content_type: String::new(),
            files: None,
            cookies: Vec::new(),
            instance_uid: "S".to_string(),
        };
        let json = serde_json::to_string(&envelope).expect("serialize");
        assert!(!json.contains("\"body\""));
        assert!(!json.contains("\"files\""));
    }

    #[test]
    fn envelope_body_round_trips_both_shapes() {
        let json = EnvelopeBody::Json("{\"x\":1}".to_string());
        let raw = serde_json::to_string(&json).expect("serialize");
        assert_eq!(raw, "\"{\\\"x\\\":1}\"");
        assert_eq!(
            serde_json::from_str::<EnvelopeBody>(&raw).expect("parse"),
            json
        );

        let mut fields = HashMap::new();
        fields.insert("a".to_string(), "1".to_string());
        let form = EnvelopeBody::Form(fields);
        let raw = serde_json::to_string(&form).expect("serialize");
        assert_eq!(
            serde_json::from_str::<EnvelopeBody>(&raw).expect("parse"),
            form
        );
    }

    #[test]
    fn response_envelope_defaults_missing_fields() {
        let reply: ResponseEnvelope = serde_json::from_str("{}").expect("parse");
        assert!(!reply.ok);
        assert_eq!(reply.code, 0);
        assert!(reply.status.is_empty());

        let reply: ResponseEnvelope =
            serde_json::from_str("{\"ok\":true,\"code\":0,\"status\":\"success\"}").expect("parse");
        assert!(reply.ok);
    }

    #[test]
    fn command_reply_omits_absent_error() {
        let json = serde_json::to_string(&CommandReply::ok()).expect("serialize");
        assert_eq!(json, "{\"ok\":true}");
        let json = serde_json::to_string(&CommandReply::fail("nope")).expect("serialize");
        assert_eq!(json, "{\"ok\":false,\"error\":\"nope\"}");
    }
}
