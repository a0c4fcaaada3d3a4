//! Generalization of concrete request paths into endpoint templates.
//!
//! A segment position becomes a placeholder once the paths sharing its prefix
//! (same method, same segment count, same literal segments before it) show at
//! least `min_distinct_paths` different values there, one of which has an
//! identifier shape. Differing plain words (`users` vs `orders`) mark distinct
//! endpoints and stay literal. The bookkeeping lives in [`PathIndex`].

use super::identifiers::looks_like_identifier;
use super::index::PathIndex;
use super::types::{ParamKind, PathParameter, PathTemplate, TemplateSegment};

/// Raw `/`-delimited segments of a path, with any query string removed.
/// `/` yields a single empty segment.
pub fn split_segments(path: &str) -> Vec<String> {
    let path = path.split_once('?').map(|(p, _)| p).unwrap_or(path);
    let path = path.strip_prefix('/').unwrap_or(path);
    path.split('/').map(str::to_string).collect()
}

/// Generalizes `path` against the paths previously observed for `method`.
///
/// `prior` may contain any paths for the method (other segment counts are
/// ignored) and may include `path` itself. Long-running callers keep a
/// [`PathIndex`] instead of replaying their history.
pub fn templatize<'a, I>(method: &str, path: &str, prior: I, min_distinct_paths: usize) -> PathTemplate
where
    I: IntoIterator<Item = &'a str>,
{
    let mut index = PathIndex::new(min_distinct_paths);
    for seen in prior {
        index.insert(method, seen);
    }
    index.insert(method, path);
    index.template(method, path)
}

/// Assembles a template from raw segments, their normalized forms and the
/// kind of every placeholder position.
pub(crate) fn build_template(
    method: &str,
    raw: &[String],
    current: &[String],
    kinds: &[Option<ParamKind>],
) -> PathTemplate {
    let mut segments = Vec::with_capacity(raw.len());
    let mut parameters: Vec<PathParameter> = Vec::new();

    for (position, kind) in kinds.iter().enumerate() {
        let Some(kind) = kind else {
            segments.push(TemplateSegment::Literal(raw[position].clone()));
            continue;
        };

        let preferred = if position > 0 && kinds[position - 1].is_none() {
            placeholder_name(&current[position - 1])
        } else {
            None
        };
        let name = match preferred {
            Some(name) if !parameters.iter().any(|p| p.name == name) => name,
            _ => fallback_name(&parameters),
        };

        parameters.push(PathParameter {
            name: name.clone(),
            position,
            kind: *kind,
        });
        segments.push(TemplateSegment::Variable(name));
    }

    PathTemplate {
        method: method.to_string(),
        segments,
        parameters,
    }
}

fn fallback_name(existing: &[PathParameter]) -> String {
    (1..)
        .map(|n| format!("param{}", n))
        .find(|candidate| !existing.iter().any(|p| &p.name == candidate))
        .unwrap_or_else(|| "param".to_string())
}

/// `users` -> `user_id`; `None` when the segment cannot name a parameter.
fn placeholder_name(preceding: &str) -> Option<String> {
    if preceding.is_empty() || looks_like_identifier(preceding) {
        return None;
    }
    let sanitized: String = preceding
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let sanitized = sanitized.trim_matches('_');
    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}_id", singularize(sanitized)))
}

/// English plural to singular for the common REST collection names.
pub fn singularize(word: &str) -> String {
    const ES_SUFFIXES: [&str; 6] = ["sses", "shes", "ches", "xes", "zes", "uses"];

    if word.len() > 3 {
        if let Some(stem) = word.strip_suffix("ies") {
            return format!("{}y", stem);
        }
    }
    if ES_SUFFIXES.iter().any(|s| word.ends_with(s)) {
        return word[..word.len() - 2].to_string();
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => word.to_string(),
    }
}
