//! Invisible-unicode stripping for request data.
//!
//! Form values, JSON bodies and filenames cross a trust boundary into the
//! worker; zero-width and BiDi control characters survive display while
//! changing meaning downstream. Both helpers remove exactly the code points
//! matched by `is_invisible` and nothing else.

/// C0 controls, unicode space separators, zero-width characters, BiDi
/// controls, invisible operators and the BOM.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{0000}'..='\u{001F}'
            | '\u{00A0}'
            | '\u{1680}'
            | '\u{180E}'
            | '\u{2000}'..='\u{200A}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
    )
}

pub fn strip_invisible_str(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    input.chars().filter(|c| !is_invisible(*c)).collect()
}

/// Byte-level variant for raw bodies. Invalid UTF-8 sequences are copied
/// through verbatim so binary payloads are not corrupted.
pub fn strip_invisible_bytes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                push_stripped(valid, &mut out);
                break;
            }
            Err(err) => {
                let valid_len = err.valid_up_to();
                let valid = std::str::from_utf8(&rest[..valid_len]).unwrap();
                push_stripped(valid, &mut out);
                rest = &rest[valid_len..];
                // Copy the offending bytes untouched, then continue decoding.
                let bad_len = err.error_len().unwrap_or(rest.len());
                out.extend_from_slice(&rest[..bad_len]);
                rest = &rest[bad_len..];
            }
        }
    }
    out
}

fn push_stripped(valid: &str, out: &mut Vec<u8>) {
    for c in valid.chars() {
        if !is_invisible(c) {
            let mut encoded = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut encoded).as_bytes());
        }
    }
}
