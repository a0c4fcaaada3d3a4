//! Path templating: concrete request paths to parameterized endpoint templates.

pub mod identifiers;
pub mod index;
pub mod templater;
pub mod types;

pub use index::PathIndex;
pub use templater::{split_segments, templatize};
pub use types::{EndpointTemplate, ParamKind, PathParameter, PathTemplate, TemplateSegment};
