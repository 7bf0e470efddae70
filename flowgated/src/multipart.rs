//! Hand-rolled multipart/form-data parsing over an in-memory body.
//!
//! The body is already capped before it gets here, so parts borrow from the
//! buffer instead of streaming. Delimiter handling is strict CRLF; trailing
//! transport padding after a boundary line is tolerated.

use anyhow::{anyhow, Result};

/// One decoded part. A part with a `filename` disposition parameter is a
/// file upload, everything else is a text field.
#[derive(Debug, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub data: &'a [u8],
}

pub fn parse<'a>(body: &'a [u8], boundary: &str) -> Result<Vec<Part<'a>>> {
    if boundary.is_empty() {
        return Err(anyhow!("empty multipart boundary"));
    }
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let start = find(body, delimiter).ok_or_else(|| anyhow!("opening boundary not found"))?;
    let mut rest = &body[start + delimiter.len()..];

    let mut closing = Vec::with_capacity(2 + delimiter.len());
    closing.extend_from_slice(b"\r\n");
    closing.extend_from_slice(delimiter);

    let mut parts = Vec::new();
    loop {
        if rest.starts_with(b"--") {
            // Closing delimiter; anything after it is epilogue.
            break;
        }
        rest = strip_boundary_line_end(rest)?;

        let header_len =
            find(rest, b"\r\n\r\n").ok_or_else(|| anyhow!("part headers not terminated"))?;
        let (name, filename) = parse_disposition(&rest[..header_len])?;

        let content = &rest[header_len + 4..];
        let data_len = find(content, &closing).ok_or_else(|| anyhow!("part not terminated"))?;
        parts.push(Part {
            name,
            filename,
            data: &content[..data_len],
        });
        rest = &content[data_len + closing.len()..];
    }
    Ok(parts)
}

fn strip_boundary_line_end(mut input: &[u8]) -> Result<&[u8]> {
    while input.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
        input = &input[1..];
    }
    input
        .strip_prefix(b"\r\n")
        .ok_or_else(|| anyhow!("malformed boundary line"))
}

fn parse_disposition(raw: &[u8]) -> Result<(Option<String>, Option<String>)> {
    let text =
        std::str::from_utf8(raw).map_err(|_| anyhow!("part headers are not valid utf-8"))?;
    for line in text.split("\r\n") {
        let Some((header, value)) = line.split_once(':') else {
            continue;
        };
        if !header.trim().eq_ignore_ascii_case("content-disposition") {
            continue;
        }
        let mut name = None;
        let mut filename = None;
        // First segment is the disposition type itself ("form-data").
        for segment in value.split(';').skip(1) {
            let Some((key, val)) = segment.split_once('=') else {
                continue;
            };
            let val = val.trim().trim_matches('"').to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "name" => name = Some(val),
                "filename" => filename = Some(val),
                _ => {}
            }
        }
        return Ok((name, filename));
    }
    Err(anyhow!("part is missing a content-disposition header"))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
