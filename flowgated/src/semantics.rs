//! HTTP header interpretation for the ingress gate and envelope assembly.

use anyhow::{anyhow, Result};
use flowgate_core::ipc::envelope::Cookie;
use http::header::{ACCEPT, COOKIE};
use http::HeaderMap;
use std::collections::HashMap;

/// Media types a worker envelope can be built from. A request whose Accept
/// header matches none of these cannot be served.
pub const SUPPORTED_MEDIA_TYPES: &[&str] = &[
    "application/json",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
];

/// Value of the `Accept:` response header on a 415.
pub const ACCEPT_HEADER_VALUE: &str =
    "application/json, application/x-www-form-urlencoded, multipart/form-data";

/// A parsed media type: lowercased `type/subtype` essence plus parameters
/// with lowercased keys. Parameter values keep their case (boundary tokens
/// are case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub essence: String,
    pub params: HashMap<String, String>,
}

pub fn parse_media_type(raw: &str) -> Result<MediaType> {
    let raw = raw.trim();
    let (essence_part, params_part) = match raw.split_once(';') {
        Some((essence, params)) => (essence, Some(params)),
        None => (raw, None),
    };
    let essence = essence_part.trim();
    let (kind, subtype) = essence
        .split_once('/')
        .ok_or_else(|| anyhow!("invalid media type: {raw}"))?;
    if !is_token(kind) || !is_token(subtype) {
        return Err(anyhow!("invalid media type: {raw}"));
    }

    let mut params = HashMap::new();
    if let Some(params_part) = params_part {
        for param in params_part.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let Some((key, value)) = param.split_once('=') else {
                return Err(anyhow!("invalid media type parameter: {param}"));
            };
            let key = key.trim();
            if !is_token(key) {
                return Err(anyhow!("invalid media type parameter: {param}"));
            }
            params.insert(
                key.to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }

    Ok(MediaType {
        essence: essence.to_ascii_lowercase(),
        params,
    })
}

fn is_token(input: &str) -> bool {
    !input.is_empty()
        && input.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~')
        })
}

/// Outcome of evaluating the request's Accept header against the media
/// types a worker envelope can carry back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptVerdict {
    Serveable,
    /// Well-formed but none of the supported types: 415.
    Unsupported,
    /// A media type in the list failed to parse: 400.
    Malformed,
}

pub fn evaluate_accept(headers: &HeaderMap) -> AcceptVerdict {
    let Some(value) = headers.get(ACCEPT) else {
        return AcceptVerdict::Serveable;
    };
    let Ok(raw) = value.to_str() else {
        return AcceptVerdict::Malformed;
    };
    if raw.is_empty() || raw == "*/*" {
        return AcceptVerdict::Serveable;
    }
    for part in raw.split(',') {
        match parse_media_type(part.trim()) {
            Ok(media) => {
                if SUPPORTED_MEDIA_TYPES.contains(&media.essence.as_str()) {
                    return AcceptVerdict::Serveable;
                }
            }
            Err(_) => return AcceptVerdict::Malformed,
        }
    }
    AcceptVerdict::Unsupported
}

/// Flatten a hyper header map into the envelope's name -> values shape.
/// Values that are not valid UTF-8 are carried lossily rather than dropped.
pub fn header_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

/// Parse request cookies (name=value pairs only) from every Cookie header.
pub fn parse_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    let mut out = Vec::new();
    for value in headers.get_all(COOKIE) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            out.push(Cookie {
                name: name.to_string(),
                value: value.trim().trim_matches('"').to_string(),
            });
        }
    }
    out
}
