//! Protocol sniffing: REST versus the RPC sub-protocols carried over HTTP.

pub mod sniffer;
pub mod types;
pub mod xml;

pub use sniffer::{classify, classify_input, SniffInput};
pub use types::{Confidence, Protocol, ProtocolClassification};
