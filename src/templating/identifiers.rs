//! Pure predicates deciding whether a path segment looks like an identifier,
//! plus segment normalisation.

use uuid::Uuid;

/// Non-empty and ASCII digits only: `42`, `007`.
pub fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Any textual UUID form: hyphenated, simple (32 hex), braced or URN.
pub fn is_uuid(segment: &str) -> bool {
    Uuid::try_parse(segment).is_ok()
}

/// At least 8 characters, hex digits only: `5f2b8c1e`, `deadbeefcafe`.
pub fn is_hex_token(segment: &str) -> bool {
    segment.len() >= 8 && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A token mixing ASCII letters and digits, optionally with `-`, `_`, `.`, `~`:
/// `a1b2`, `order-2024x`, `v2`.
pub fn is_alphanumeric_token(segment: &str) -> bool {
    let mut letters = false;
    let mut digits = false;
    for c in segment.chars() {
        match c {
            'a'..='z' | 'A'..='Z' => letters = true,
            '0'..='9' => digits = true,
            '-' | '_' | '.' | '~' => {}
            _ => return false,
        }
    }
    letters && digits
}

/// Lowercase alphanumeric words joined by single hyphens: `my-first-post`.
pub fn is_slug(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .split('-')
            .all(|w| !w.is_empty() && w.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()))
}

/// True when `segment` has any recognised identifier shape.
pub fn looks_like_identifier(segment: &str) -> bool {
    is_numeric(segment) || is_uuid(segment) || is_hex_token(segment) || is_alphanumeric_token(segment)
}

/// Decodes `%XX` escapes. Returns `None` for an incomplete or non-hex escape,
/// or when the decoded bytes are not UTF-8.
pub fn percent_decode(segment: &str) -> Option<String> {
    if !segment.contains('%') {
        return Some(segment.to_string());
    }
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16))?;
            let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16))?;
            out.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Comparison form of a segment: percent-decoded, or the raw text when the
/// encoding is malformed.
pub fn normalize_segment(segment: &str) -> String {
    percent_decode(segment).unwrap_or_else(|| segment.to_string())
}
