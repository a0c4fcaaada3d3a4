//! Incremental index of observed paths, one segment tree per (method, width).
//!
//! Each tree level holds the distinct values seen at that segment position
//! under one prefix. Once a level has `min_distinct_paths` distinct non-empty
//! values and one of them has an identifier shape, it is promoted: its literal
//! children are folded into a single placeholder child and later values go
//! straight there. Promotion never reverts, so an insert walks one route of at
//! most `width` nodes and the tree only grows with genuinely distinct
//! endpoints.

use log::trace;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use super::identifiers::{is_numeric, is_slug, is_uuid, looks_like_identifier, normalize_segment};
use super::templater::{build_template, split_segments};
use super::types::{ParamKind, PathTemplate};

/// Running answer of [`ParamKind::infer`] over the values folded into a
/// placeholder, without keeping the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KindTally {
    seen: bool,
    numeric: bool,
    uuid: bool,
    slug: bool,
}

impl Default for KindTally {
    fn default() -> Self {
        Self {
            seen: false,
            numeric: true,
            uuid: true,
            slug: true,
        }
    }
}

impl KindTally {
    fn observe(&mut self, value: &str) {
        self.seen = true;
        self.numeric &= is_numeric(value);
        self.uuid &= is_uuid(value);
        self.slug &= is_slug(value);
    }

    fn merge(&mut self, other: KindTally) {
        self.seen |= other.seen;
        self.numeric &= other.numeric;
        self.uuid &= other.uuid;
        self.slug &= other.slug;
    }

    fn kind(&self) -> ParamKind {
        match *self {
            KindTally { seen: false, .. } => ParamKind::Opaque,
            KindTally { numeric: true, .. } => ParamKind::Numeric,
            KindTally { uuid: true, .. } => ParamKind::Uuid,
            KindTally { slug: true, .. } => ParamKind::Slug,
            _ => ParamKind::Opaque,
        }
    }
}

/// One segment position under one prefix.
///
/// # Fields Overview
///
/// - `literals`: children per literal value; after promotion only the empty
///   segment stays here
/// - `placeholder`: the merged child of every non-empty value once promoted
/// - `kinds`: tally of the values routed into `placeholder`
/// - `distinct` / `identifiers`: non-empty literal keys, and how many of them
///   look like identifiers
#[derive(Debug, Default)]
struct Node {
    literals: BTreeMap<String, Node>,
    placeholder: Option<Box<Node>>,
    kinds: KindTally,
    distinct: usize,
    identifiers: usize,
}

impl Node {
    fn should_promote(&self, min_distinct: usize) -> bool {
        self.placeholder.is_none() && self.distinct >= min_distinct.max(2) && self.identifiers > 0
    }

    /// Inserts the remaining `segments` below this node. Returns the depth of
    /// the shallowest position promoted on the way.
    fn insert(&mut self, segments: &[String], depth: usize, min_distinct: usize) -> Option<usize> {
        let (value, rest) = segments.split_first()?;

        let mut promoted = None;
        let child = if value.is_empty() {
            self.literals.entry(String::new()).or_default()
        } else if self.placeholder.is_some() {
            self.kinds.observe(value);
            self.placeholder.get_or_insert_with(Box::default)
        } else {
            if !self.literals.contains_key(value) {
                self.attach(value.clone(), Node::default(), min_distinct);
            }
            if self.should_promote(min_distinct) {
                self.promote(min_distinct);
                promoted = Some(depth);
            }
            match self.placeholder.as_deref_mut() {
                Some(placeholder) => placeholder,
                None => self.literals.entry(value.clone()).or_default(),
            }
        };
        let deeper = child.insert(rest, depth + 1, min_distinct);
        promoted.or(deeper)
    }

    fn attach(&mut self, value: String, child: Node, min_distinct: usize) {
        if !value.is_empty() {
            if let Some(placeholder) = self.placeholder.as_deref_mut() {
                self.kinds.observe(&value);
                placeholder.absorb(child, min_distinct);
                return;
            }
        }
        match self.literals.entry(value) {
            Entry::Occupied(mut existing) => existing.get_mut().absorb(child, min_distinct),
            Entry::Vacant(slot) => {
                if !slot.key().is_empty() {
                    self.distinct += 1;
                    if looks_like_identifier(slot.key()) {
                        self.identifiers += 1;
                    }
                }
                slot.insert(child);
            }
        }
    }

    /// Folds every non-empty literal child into the placeholder.
    fn promote(&mut self, min_distinct: usize) {
        let literals = std::mem::take(&mut self.literals);
        let placeholder = self.placeholder.get_or_insert_with(Box::default);
        for (value, child) in literals {
            if value.is_empty() {
                self.literals.insert(value, child);
            } else {
                self.kinds.observe(&value);
                placeholder.absorb(child, min_distinct);
            }
        }
        self.distinct = 0;
        self.identifiers = 0;
    }

    /// Merges a sibling subtree into this one, promoting where the union
    /// crosses the threshold.
    fn absorb(&mut self, other: Node, min_distinct: usize) {
        self.kinds.merge(other.kinds);
        if let Some(theirs) = other.placeholder {
            match self.placeholder.as_deref_mut() {
                Some(mine) => mine.absorb(*theirs, min_distinct),
                None => {
                    self.placeholder = Some(theirs);
                    self.promote(min_distinct);
                }
            }
        }
        for (value, child) in other.literals {
            self.attach(value, child, min_distinct);
        }
        if self.should_promote(min_distinct) {
            self.promote(min_distinct);
        }
    }

    fn size(&self) -> usize {
        1 + self.literals.values().map(Node::size).sum::<usize>()
            + self.placeholder.as_deref().map_or(0, Node::size)
    }
}

/// Paths observed per (method, segment count), generalized as they arrive.
pub struct PathIndex {
    min_distinct_paths: usize,
    shapes: HashMap<(String, usize), Node>,
}

impl PathIndex {
    pub fn new(min_distinct_paths: usize) -> Self {
        Self {
            min_distinct_paths,
            shapes: HashMap::new(),
        }
    }

    /// Records `path` for `method`.
    ///
    /// Returns the index of the shallowest segment promoted to a placeholder
    /// by this path, if any. Templates of other paths only change below that
    /// prefix.
    pub fn insert(&mut self, method: &str, path: &str) -> Option<usize> {
        let segments: Vec<String> = split_segments(path).iter().map(|s| normalize_segment(s)).collect();
        let root = self.shapes.entry((method.to_string(), segments.len())).or_default();
        let promoted = root.insert(&segments, 0, self.min_distinct_paths);
        if let Some(position) = promoted {
            trace!("{} {} promoted segment {}", method, path, position);
        }
        promoted
    }

    /// Current template of `path`. Segments below a prefix the index has never
    /// seen stay literal.
    pub fn template(&self, method: &str, path: &str) -> PathTemplate {
        let raw = split_segments(path);
        let current: Vec<String> = raw.iter().map(|s| normalize_segment(s)).collect();
        let mut kinds: Vec<Option<ParamKind>> = vec![None; current.len()];

        let mut node = self.shapes.get(&(method.to_string(), current.len()));
        for (position, value) in current.iter().enumerate() {
            let Some(here) = node else {
                break;
            };
            node = match here.placeholder.as_deref() {
                Some(placeholder) if !value.is_empty() => {
                    kinds[position] = Some(here.kinds.kind());
                    Some(placeholder)
                }
                _ => here.literals.get(value),
            };
        }

        let template = build_template(method, &raw, &current, &kinds);
        trace!("templated {} {} -> {}", method, path, template.render());
        template
    }

    /// Nodes held across every tree.
    pub fn node_count(&self) -> usize {
        self.shapes.values().map(Node::size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(paths: &[&str]) -> PathIndex {
        let mut index = PathIndex::new(2);
        for path in paths {
            index.insert("GET", path);
        }
        index
    }

    #[test]
    fn promotion_reports_the_shallowest_position() {
        let mut index = PathIndex::new(2);
        assert_eq!(index.insert("GET", "/users/1/orders/7"), None);
        assert_eq!(index.insert("GET", "/users/1/orders/8"), Some(3));
        assert_eq!(index.insert("GET", "/users/2/orders/9"), Some(1));
        assert_eq!(index.insert("GET", "/users/3/orders/10"), None);
        assert_eq!(
            index.template("GET", "/users/1/orders/7").render(),
            "/users/{user_id}/orders/{order_id}"
        );
    }

    #[test]
    fn many_identifiers_keep_the_tree_small() {
        let mut index = PathIndex::new(2);
        for i in 0..5_000 {
            index.insert("GET", &format!("/users/{}", i));
            index.insert("GET", &format!("/users/{}/repos", i));
        }
        assert!(index.node_count() <= 8, "{} nodes", index.node_count());
        let template = index.template("GET", "/users/77/repos");
        assert_eq!(template.render(), "/users/{user_id}/repos");
        assert_eq!(template.parameters[0].kind, ParamKind::Numeric);
    }

    #[test]
    fn methods_and_widths_are_separate_trees() {
        let index = indexed(&["/users/1", "/users/2"]);
        assert_eq!(index.template("POST", "/users/1").render(), "/users/1");
        assert_eq!(index.template("GET", "/users/1/repos").render(), "/users/1/repos");
    }

    #[test]
    fn unseen_prefix_stays_literal() {
        let index = indexed(&["/users/1", "/users/2"]);
        assert_eq!(index.template("GET", "/orders/5").render(), "/orders/5");
        assert_eq!(index.template("GET", "/users/9").render(), "/users/{user_id}");
    }

    #[test]
    fn merged_subtrees_promote_on_their_union() {
        let mut index = PathIndex::new(3);
        index.insert("GET", "/a/1/x7");
        index.insert("GET", "/a/2/y8");
        assert_eq!(index.template("GET", "/a/1/x7").render(), "/a/1/x7");
        index.insert("GET", "/a/3/z9");
        assert_eq!(index.template("GET", "/a/1/x7").render(), "/a/{a_id}/{param1}");
    }

    #[test]
    fn kinds_follow_every_value_in_the_placeholder() {
        let index = indexed(&["/files/1", "/files/2"]);
        assert_eq!(index.template("GET", "/files/1").parameters[0].kind, ParamKind::Numeric);

        let index = indexed(&["/files/1", "/files/2", "/files/abc-9"]);
        assert_eq!(index.template("GET", "/files/1").parameters[0].kind, ParamKind::Slug);
    }
}
