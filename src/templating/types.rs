use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::identifiers::{is_numeric, is_slug, is_uuid};
use crate::data_capture::BodyStatus;
use crate::schema::SchemaNode;

/// Inferred kind of a path placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Numeric,
    Uuid,
    Slug,
    Opaque,
}

impl ParamKind {
    /// Narrowest kind covering every observed value; `Opaque` when nothing was
    /// observed or the values disagree.
    pub fn infer<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let values: Vec<&str> = values.into_iter().collect();
        if values.is_empty() {
            ParamKind::Opaque
        } else if values.iter().all(|v| is_numeric(v)) {
            ParamKind::Numeric
        } else if values.iter().all(|v| is_uuid(v)) {
            ParamKind::Uuid
        } else if values.iter().all(|v| is_slug(v)) {
            ParamKind::Slug
        } else {
            ParamKind::Opaque
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathParameter {
    pub name: String,
    /// Zero-based index of the segment this placeholder replaces.
    pub position: usize,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TemplateSegment {
    Literal(String),
    Variable(String),
}

/// Result of templating one path: the generalized segments plus parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTemplate {
    pub method: String,
    pub segments: Vec<TemplateSegment>,
    pub parameters: Vec<PathParameter>,
}

impl TemplateSegment {
    fn rendered(&self) -> String {
        match self {
            TemplateSegment::Literal(l) => l.clone(),
            TemplateSegment::Variable(name) => format!("{{{}}}", name),
        }
    }
}

impl PathTemplate {
    /// `/users/{user_id}/repos` form.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self.segments.iter().map(TemplateSegment::rendered).collect();
        format!("/{}", parts.join("/"))
    }

    /// The first `len` segments rendered with their trailing separator: `/`
    /// for 0, `/users/` for 1 on `/users/{user_id}`. Every template sharing
    /// those segments renders with this prefix.
    pub fn render_prefix(&self, len: usize) -> String {
        let mut out = String::from("/");
        for segment in self.segments.iter().take(len) {
            out.push_str(&segment.rendered());
            out.push('/');
        }
        out
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_literal(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// A generalized endpoint as reported: one per (method, template) pair.
///
/// # Fields Overview
///
/// * `template` - Rendered path with `{name}` placeholders.
/// * `request_schema` / `response_schema` - Absent until a JSON body is seen.
/// * `body` - Most notable body outcome across samples, request or response.
/// * `undecodable_samples` - Samples whose body could not be decoded.
/// * `request_examples` / `response_examples` - Example scalars per field path.
/// * `distinct_paths` - Concrete paths folded into this endpoint, counted up
///   to a fixed cap.
/// * `examples` - The lexicographically smallest of those paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointTemplate {
    pub method: String,
    pub template: String,
    pub parameters: Vec<PathParameter>,
    pub sample_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub request_schema: Option<SchemaNode>,
    pub response_schema: Option<SchemaNode>,
    pub body: BodyStatus,
    pub undecodable_samples: u64,
    pub query_params: BTreeSet<String>,
    pub status_codes: BTreeMap<u16, u64>,
    pub mean_latency_ms: Option<f64>,
    #[serde(default)]
    pub request_examples: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub response_examples: BTreeMap<String, Vec<Value>>,
    pub distinct_paths: usize,
    pub examples: Vec<String>,
}

impl EndpointTemplate {
    pub fn key(&self) -> (String, String) {
        (self.method.clone(), self.template.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_narrowest_kind() {
        assert_eq!(ParamKind::infer(["1", "22"]), ParamKind::Numeric);
        assert_eq!(
            ParamKind::infer(["67e55044-10b1-426f-9247-bb680e5fe0c8"]),
            ParamKind::Uuid
        );
        assert_eq!(ParamKind::infer(["hello-world", "abc1"]), ParamKind::Slug);
        assert_eq!(ParamKind::infer(["1", "ABC9"]), ParamKind::Opaque);
        assert_eq!(ParamKind::infer(Vec::<&str>::new()), ParamKind::Opaque);
    }

    #[test]
    fn renders_placeholders() {
        let template = PathTemplate {
            method: "GET".into(),
            segments: vec![
                TemplateSegment::Literal("users".into()),
                TemplateSegment::Variable("user_id".into()),
            ],
            parameters: vec![PathParameter {
                name: "user_id".into(),
                position: 1,
                kind: ParamKind::Numeric,
            }],
        };
        assert_eq!(template.render(), "/users/{user_id}");
        assert_eq!(template.render_prefix(0), "/");
        assert_eq!(template.render_prefix(1), "/users/");
        assert!(!template.is_literal());
    }
}
