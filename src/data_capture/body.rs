//! Body decoding shared by the sniffer and the schema merger.
//!
//! A body is decoded once per exchange. Failure to decode is a normal outcome
//! ([`BodyDecoding::Undecodable`]), never an error: the exchange still takes
//! part in templating and classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::xml;

#[derive(Debug, Clone, PartialEq)]
pub enum BodyDecoding {
    Empty,
    Json(Value),
    /// Text with a readable XML root element.
    Xml(String),
    Text(String),
    /// Declared binary payload (protobuf, octet-stream, media), by length.
    Binary(usize),
    Undecodable(String),
}

/// Per-exchange body outcome as reported on endpoints.
///
/// Ordered so that the maximum over many samples is the most notable one:
/// a single undecodable sample marks the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyStatus {
    Empty,
    Text,
    Binary,
    Structured,
    Undecodable,
}

impl BodyDecoding {
    pub fn status(&self) -> BodyStatus {
        match self {
            BodyDecoding::Empty => BodyStatus::Empty,
            BodyDecoding::Json(_) | BodyDecoding::Xml(_) => BodyStatus::Structured,
            BodyDecoding::Text(_) => BodyStatus::Text,
            BodyDecoding::Binary(_) => BodyStatus::Binary,
            BodyDecoding::Undecodable(_) => BodyStatus::Undecodable,
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match self {
            BodyDecoding::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Decoded text for every textual variant (JSON is re-rendered).
    pub fn text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            BodyDecoding::Xml(s) | BodyDecoding::Text(s) => Some(std::borrow::Cow::Borrowed(s)),
            BodyDecoding::Json(v) => Some(std::borrow::Cow::Owned(v.to_string())),
            _ => None,
        }
    }

    pub fn is_undecodable(&self) -> bool {
        matches!(self, BodyDecoding::Undecodable(_))
    }
}

fn is_binary_content_type(ct: &str) -> bool {
    ct.contains("grpc")
        || ct.contains("protobuf")
        || ct.contains("octet-stream")
        || ct.contains("msgpack")
        || ct.contains("x-thrift")
        || ct.starts_with("image/")
        || ct.starts_with("audio/")
        || ct.starts_with("video/")
        || ct.starts_with("font/")
}

/// Decodes a body from its raw bytes, the capture layer's decoded text (which
/// wins when present) and the declared content type.
///
/// JSON is attempted when the content type says so, or when there is no
/// content type and the text looks like JSON; XML likewise. Anything else that
/// is valid UTF-8 is plain text.
pub fn decode_body(raw: &[u8], decoded: Option<&str>, content_type: Option<&str>) -> BodyDecoding {
    let ct = content_type.map(|c| c.to_ascii_lowercase());
    let ct = ct.as_deref();

    if ct.is_some_and(is_binary_content_type) {
        let len = decoded.map(str::len).unwrap_or(raw.len());
        return if len == 0 {
            BodyDecoding::Empty
        } else {
            BodyDecoding::Binary(len)
        };
    }

    let text = match decoded {
        Some(text) => text,
        None if raw.is_empty() => return BodyDecoding::Empty,
        None => match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => return BodyDecoding::Undecodable(format!("invalid UTF-8: {}", e)),
        },
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return BodyDecoding::Empty;
    }

    let declared_json = ct.is_some_and(|c| c.contains("json"));
    let declared_xml = ct.is_some_and(|c| c.contains("xml"));
    let looks_json = ct.is_none() && (trimmed.starts_with('{') || trimmed.starts_with('['));
    let looks_xml = ct.is_none() && trimmed.starts_with('<');

    if declared_json || looks_json {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => BodyDecoding::Json(value),
            Err(e) => BodyDecoding::Undecodable(format!("invalid JSON: {}", e)),
        };
    }

    if declared_xml || looks_xml {
        return match xml::root_element(trimmed) {
            Some(_) => BodyDecoding::Xml(trimmed.to_string()),
            None => BodyDecoding::Undecodable("invalid XML: no readable root element".to_string()),
        };
    }

    // Undeclared JSON inside text/plain and similar still gets a chance.
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return BodyDecoding::Json(value);
        }
    }

    BodyDecoding::Text(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_declared_and_sniffed_json() {
        assert_eq!(
            decode_body(br#"{"a":1}"#, None, Some("application/json; charset=utf-8")),
            BodyDecoding::Json(json!({"a": 1}))
        );
        assert_eq!(
            decode_body(b"[1,2]", None, None),
            BodyDecoding::Json(json!([1, 2]))
        );
        assert_eq!(
            decode_body(b"", Some(r#"{"b":true}"#), Some("application/vnd.api+json")),
            BodyDecoding::Json(json!({"b": true}))
        );
    }

    #[test]
    fn invalid_encodings_are_undecodable_not_errors() {
        let invalid_utf8 = decode_body(&[0xc3, 0x28, 0xff], None, Some("application/json"));
        assert!(invalid_utf8.is_undecodable());
        assert_eq!(invalid_utf8.status(), BodyStatus::Undecodable);

        assert!(decode_body(b"{\"a\":", None, Some("application/json")).is_undecodable());
        assert!(decode_body(b"<a><b></a", None, Some("text/xml")).is_undecodable());
    }

    #[test]
    fn plain_text_and_forms_stay_text() {
        assert_eq!(
            decode_body(b"[INFO] started", None, Some("text/plain")),
            BodyDecoding::Text("[INFO] started".to_string())
        );
        assert_eq!(
            decode_body(b"a=1&b=2", None, Some("application/x-www-form-urlencoded")).status(),
            BodyStatus::Text
        );
        assert_eq!(decode_body(b"   ", None, None), BodyDecoding::Empty);
        assert_eq!(decode_body(b"", None, Some("application/json")), BodyDecoding::Empty);
    }

    #[test]
    fn binary_payloads_are_not_undecodable() {
        let frame = [0x00, 0x00, 0x00, 0x00, 0x02, 0x08, 0x01];
        assert_eq!(
            decode_body(&frame, None, Some("application/grpc-web+proto")),
            BodyDecoding::Binary(7)
        );
        assert_eq!(
            decode_body(&[0xff, 0xd8], None, Some("image/jpeg")).status(),
            BodyStatus::Binary
        );
    }

    #[test]
    fn xml_bodies_are_structured() {
        let body = decode_body(b"<methodCall><methodName>x</methodName></methodCall>", None, Some("text/xml"));
        assert_eq!(body.status(), BodyStatus::Structured);
        assert!(body.text().is_some());
    }
}
