//! Captured exchange records and their body decoding.

pub mod body;
pub mod serde_helpers;
pub mod types;

pub use body::{decode_body, BodyDecoding, BodyStatus};
pub use types::{CapturedExchange, CapturedResponse, Headers, QueryParams};
