use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    Rest,
    JsonRpc,
    Graphql,
    GraphqlWs,
    Soap,
    XmlRpc,
    GrpcWeb,
    SocketIo,
    Unknown,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rest => "REST",
            Protocol::JsonRpc => "JSON_RPC",
            Protocol::Graphql => "GRAPHQL",
            Protocol::GraphqlWs => "GRAPHQL_WS",
            Protocol::Soap => "SOAP",
            Protocol::XmlRpc => "XML_RPC",
            Protocol::GrpcWeb => "GRPC_WEB",
            Protocol::SocketIo => "SOCKET_IO",
            Protocol::Unknown => "UNKNOWN",
        }
    }

    pub fn is_rpc(&self) -> bool {
        !matches!(self, Protocol::Rest | Protocol::Unknown)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// High when a header signal and a body signal agree, medium for one alone.
    pub fn from_signals(header: bool, body: bool) -> Self {
        match (header, body) {
            (true, true) => Confidence::High,
            (true, false) | (false, true) => Confidence::Medium,
            (false, false) => Confidence::Low,
        }
    }
}

/// Outcome of sniffing a single exchange.
///
/// # Fields Overview
///
/// * `protocol` - Detected protocol family.
/// * `confidence` - Strength of the evidence behind `protocol`.
/// * `rpc_method` - Operation name for RPC protocols, when one could be extracted.
/// * `batch` - JSON-RPC batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolClassification {
    pub protocol: Protocol,
    pub confidence: Confidence,
    pub rpc_method: Option<String>,
    pub batch: bool,
}

impl ProtocolClassification {
    pub fn rest() -> Self {
        Self {
            protocol: Protocol::Rest,
            confidence: Confidence::High,
            rpc_method: None,
            batch: false,
        }
    }

    pub fn new(protocol: Protocol, confidence: Confidence, rpc_method: Option<String>) -> Self {
        Self {
            protocol,
            confidence,
            rpc_method,
            batch: false,
        }
    }

    /// Grouping name for RPC buckets.
    pub fn method_or_anonymous(&self) -> &str {
        self.rpc_method.as_deref().unwrap_or("anonymous")
    }
}
