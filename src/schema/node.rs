//! Recursive payload shape descriptor and its merge.
//!
//! Merging is a lattice join: commutative, associative and idempotent, so the
//! schema of a bucket depends only on the set of values folded into it, never
//! on their order or multiplicity. `Unknown` is the absorbing top element,
//! reached when structural kinds conflict (an object against an array or a
//! non-null scalar). `null` against an object or array only sets `nullable`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Null,
    Boolean,
    Number,
    String,
}

impl ScalarKind {
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(ScalarKind::Null),
            Value::Bool(_) => Some(ScalarKind::Boolean),
            Value::Number(_) => Some(ScalarKind::Number),
            Value::String(_) => Some(ScalarKind::String),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::Null => "null",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Number => "number",
            ScalarKind::String => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub schema: SchemaNode,
    /// Missing from at least one merged sample.
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaNode {
    Object {
        fields: BTreeMap<String, FieldSchema>,
        #[serde(default)]
        nullable: bool,
    },
    Array {
        /// Shared element schema; `None` while only empty arrays were seen.
        items: Option<Box<SchemaNode>>,
        #[serde(default)]
        nullable: bool,
    },
    Scalar {
        types: BTreeSet<ScalarKind>,
    },
    Unknown,
}

/// Folds `value` into `existing` (absent for the first sample).
pub fn merge(existing: Option<SchemaNode>, value: &Value) -> SchemaNode {
    let observed = SchemaNode::from_value(value);
    match existing {
        Some(node) => node.join(observed),
        None => observed,
    }
}

fn join_items(a: Option<Box<SchemaNode>>, b: Option<Box<SchemaNode>>) -> Option<Box<SchemaNode>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Box::new(a.join(*b))),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn only_null(types: &BTreeSet<ScalarKind>) -> bool {
    types.iter().all(|t| *t == ScalarKind::Null)
}

impl SchemaNode {
    /// Shape of a single value: every object key required, array elements joined.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => SchemaNode::Object {
                fields: map
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            FieldSchema {
                                schema: SchemaNode::from_value(v),
                                optional: false,
                            },
                        )
                    })
                    .collect(),
                nullable: false,
            },
            Value::Array(elements) => SchemaNode::Array {
                items: elements
                    .iter()
                    .map(SchemaNode::from_value)
                    .reduce(SchemaNode::join)
                    .map(Box::new),
                nullable: false,
            },
            scalar => SchemaNode::Scalar {
                types: ScalarKind::of(scalar).into_iter().collect(),
            },
        }
    }

    /// Least upper bound of two shapes.
    pub fn join(self, other: SchemaNode) -> SchemaNode {
        use SchemaNode::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (Scalar { types: mut a }, Scalar { types: b }) => {
                a.extend(b);
                Scalar { types: a }
            }
            (
                Object {
                    fields: a,
                    nullable: na,
                },
                Object {
                    fields: b,
                    nullable: nb,
                },
            ) => Object {
                fields: join_fields(a, b),
                nullable: na || nb,
            },
            (
                Array {
                    items: a,
                    nullable: na,
                },
                Array {
                    items: b,
                    nullable: nb,
                },
            ) => Array {
                items: join_items(a, b),
                nullable: na || nb,
            },
            (Object { fields, nullable }, Scalar { types })
            | (Scalar { types }, Object { fields, nullable }) => {
                if only_null(&types) {
                    Object {
                        fields,
                        nullable: nullable || !types.is_empty(),
                    }
                } else {
                    Unknown
                }
            }
            (Array { items, nullable }, Scalar { types })
            | (Scalar { types }, Array { items, nullable }) => {
                if only_null(&types) {
                    Array {
                        items,
                        nullable: nullable || !types.is_empty(),
                    }
                } else {
                    Unknown
                }
            }
            (Object { .. }, Array { .. }) | (Array { .. }, Object { .. }) => Unknown,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SchemaNode::Object { .. } => "object",
            SchemaNode::Array { .. } => "array",
            SchemaNode::Scalar { .. } => "scalar",
            SchemaNode::Unknown => "unknown",
        }
    }

    /// Compact one-line type label, e.g. `object{id,name?}`, `array<number>`,
    /// `string|null`.
    pub fn type_label(&self) -> String {
        match self {
            SchemaNode::Object { fields, nullable } => {
                let names: Vec<String> = fields
                    .iter()
                    .map(|(k, f)| if f.optional { format!("{}?", k) } else { k.clone() })
                    .collect();
                let label = format!("object{{{}}}", names.join(","));
                if *nullable {
                    format!("{}|null", label)
                } else {
                    label
                }
            }
            SchemaNode::Array { items, nullable } => {
                let inner = items
                    .as_ref()
                    .map(|i| i.type_label())
                    .unwrap_or_else(|| "empty".to_string());
                let label = format!("array<{}>", inner);
                if *nullable {
                    format!("{}|null", label)
                } else {
                    label
                }
            }
            SchemaNode::Scalar { types } => {
                let names: Vec<&str> = types.iter().map(ScalarKind::as_str).collect();
                if names.is_empty() {
                    "never".to_string()
                } else {
                    names.join("|")
                }
            }
            SchemaNode::Unknown => "unknown".to_string(),
        }
    }

    /// JSON-Schema-style rendering for exporters.
    pub fn to_json_schema(&self) -> Value {
        fn with_null(base: &str, nullable: bool) -> Value {
            if nullable {
                json!([base, "null"])
            } else {
                json!(base)
            }
        }

        match self {
            SchemaNode::Object { fields, nullable } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for (name, field) in fields {
                    properties.insert(name.clone(), field.schema.to_json_schema());
                    if !field.optional {
                        required.push(Value::String(name.clone()));
                    }
                }
                json!({
                    "type": with_null("object", *nullable),
                    "properties": properties,
                    "required": required,
                })
            }
            SchemaNode::Array { items, nullable } => {
                let mut doc = Map::new();
                doc.insert("type".into(), with_null("array", *nullable));
                if let Some(items) = items {
                    doc.insert("items".into(), items.to_json_schema());
                }
                Value::Object(doc)
            }
            SchemaNode::Scalar { types } => {
                let names: Vec<&str> = types.iter().map(ScalarKind::as_str).collect();
                match names.as_slice() {
                    [single] => json!({ "type": single }),
                    _ => json!({ "type": names }),
                }
            }
            SchemaNode::Unknown => json!({}),
        }
    }
}

/// Fields on one side only become optional.
fn join_fields(
    mut ours: BTreeMap<String, FieldSchema>,
    mut theirs: BTreeMap<String, FieldSchema>,
) -> BTreeMap<String, FieldSchema> {
    let mut joined = BTreeMap::new();
    for (name, mine) in std::mem::take(&mut ours) {
        let field = match theirs.remove(&name) {
            Some(other) => FieldSchema {
                schema: mine.schema.join(other.schema),
                optional: mine.optional || other.optional,
            },
            None => FieldSchema {
                schema: mine.schema,
                optional: true,
            },
        };
        joined.insert(name, field);
    }
    for (name, other) in theirs {
        joined.insert(
            name,
            FieldSchema {
                schema: other.schema,
                optional: true,
            },
        );
    }
    joined
}
