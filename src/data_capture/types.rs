//! Captured exchange records consumed by the analysis engine.
//!
//! Records are produced by the capture layer and are read-only here: the
//! builder-style `with_*` methods exist for constructing records, the engine
//! itself never mutates one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use super::serde_helpers::base64_bytes;

/// Query parameters keyed by name; repeated keys keep every value in order.
pub type QueryParams = BTreeMap<String, Vec<String>>;

/// Header list with case-insensitive lookup.
///
/// Original casing, order and repeated names are preserved. Serialized as a
/// list of `[name, value]` pairs; a JSON object is also accepted on input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HeadersRepr", into = "HeadersRepr")]
pub struct Headers(Vec<(String, String)>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum HeadersRepr {
    Pairs(Vec<(String, String)>),
    Map(BTreeMap<String, String>),
}

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value of `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of `name`, in capture order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }
}

impl From<HeadersRepr> for Headers {
    fn from(repr: HeadersRepr) -> Self {
        match repr {
            HeadersRepr::Pairs(pairs) => Self(pairs),
            HeadersRepr::Map(map) => Self(map.into_iter().collect()),
        }
    }
}

impl From<Headers> for HeadersRepr {
    fn from(headers: Headers) -> Self {
        HeadersRepr::Pairs(headers.0)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Response half of an exchange; absent when no response was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub body_decoded: Option<String>,
    /// Time between request and response, in milliseconds.
    #[serde(default)]
    pub latency_ms: f64,
}

impl CapturedResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Headers::new(),
            body: Vec::new(),
            body_decoded: None,
            latency_ms: 0.0,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json_body(self, body: &serde_json::Value) -> Self {
        self.with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// One captured request paired with its (possibly absent) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedExchange {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub query: QueryParams,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(default)]
    pub body_decoded: Option<String>,
    #[serde(default)]
    pub response: Option<CapturedResponse>,
    #[serde(default)]
    pub client_addr: Option<IpAddr>,
    /// Identity hint computed by the capture layer, if any.
    #[serde(default)]
    pub client_hint: Option<String>,
}

impl CapturedExchange {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        method: &str,
        host: &str,
        path: &str,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            method: method.to_ascii_uppercase(),
            host: host.to_string(),
            path: path.to_string(),
            query: QueryParams::new(),
            headers: Headers::new(),
            body: Vec::new(),
            body_decoded: None,
            response: None,
            client_addr: None,
            client_hint: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json_body(self, body: &serde_json::Value) -> Self {
        self.with_header("Content-Type", "application/json")
            .with_body(body.to_string())
    }

    pub fn with_response(mut self, response: CapturedResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    /// The request path without any query string.
    pub fn path_only(&self) -> &str {
        match self.path.split_once('?') {
            Some((path, _)) => path,
            None => &self.path,
        }
    }

    /// Query parameter names from the parsed map and from a query string left
    /// on the path.
    pub fn query_param_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.query.keys().cloned().collect();
        if let Some((_, qs)) = self.path.split_once('?') {
            for pair in qs.split('&').filter(|p| !p.is_empty()) {
                let name = pair.split_once('=').map(|(k, _)| k).unwrap_or(pair);
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status_code)
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.response.as_ref().map(|r| r.latency_ms)
    }
}
