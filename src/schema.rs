//! Payload schema inference.

pub mod examples;
pub mod node;

pub use examples::ExampleStore;
pub use node::{merge, FieldSchema, ScalarKind, SchemaNode};
