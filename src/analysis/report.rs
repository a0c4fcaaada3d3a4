use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::protocol::{Confidence, Protocol};
use crate::schema::SchemaNode;
use crate::session_management::{FlowCount, FlowMatch, Session, SessionStats};
use crate::templating::EndpointTemplate;

/// Authentication scheme observed on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    Bearer,
    Basic,
    Digest,
    OAuth,
    ApiKey,
    CustomToken,
    SessionCookie,
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthScheme::Bearer => "bearer token",
            AuthScheme::Basic => "basic",
            AuthScheme::Digest => "digest",
            AuthScheme::OAuth => "oauth",
            AuthScheme::ApiKey => "api key",
            AuthScheme::CustomToken => "custom token",
            AuthScheme::SessionCookie => "session cookie",
        };
        f.write_str(name)
    }
}

/// One RPC operation of one protocol, across every call that invoked it.
///
/// # Fields Overview
///
/// * `rpc_method` - Operation name, `anonymous` when none could be extracted.
/// * `confidence` - Highest classification confidence among the calls.
/// * `request_schema` / `response_schema` - Merged argument and result shapes.
/// * `batch_call_count` - Calls that arrived inside a JSON-RPC batch.
/// * `error_count` - Calls answered with HTTP >= 400 or an RPC error member.
/// * `endpoints` - HTTP paths the operation was called on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcGroup {
    pub protocol: Protocol,
    pub rpc_method: String,
    pub confidence: Confidence,
    pub request_schema: Option<SchemaNode>,
    pub response_schema: Option<SchemaNode>,
    #[serde(default)]
    pub request_examples: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub response_examples: BTreeMap<String, Vec<Value>>,
    pub call_count: u64,
    pub batch_call_count: u64,
    pub error_count: u64,
    pub endpoints: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Everything learned about one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub host: String,
    /// False when the run was cancelled before every exchange was folded.
    pub complete: bool,
    pub exchange_count: u64,
    pub undecodable_exchanges: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub protocols: BTreeMap<Protocol, u64>,
    pub endpoints: Vec<EndpointTemplate>,
    pub rpc_groups: Vec<RpcGroup>,
    pub sessions: Vec<Session>,
    pub session_stats: SessionStats,
    /// Known multi-step flows found in closed sessions, by first step time.
    #[serde(default)]
    pub flows: Vec<FlowMatch>,
    #[serde(default)]
    pub flow_counts: BTreeMap<String, FlowCount>,
    pub common_headers: BTreeMap<String, String>,
    pub authentication: Option<AuthScheme>,
}

impl AnalysisReport {
    pub fn empty(host: &str) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            complete: true,
            exchange_count: 0,
            undecodable_exchanges: 0,
            first_seen: None,
            last_seen: None,
            protocols: BTreeMap::new(),
            endpoints: Vec::new(),
            rpc_groups: Vec::new(),
            sessions: Vec::new(),
            session_stats: SessionStats::default(),
            flows: Vec::new(),
            flow_counts: BTreeMap::new(),
            common_headers: BTreeMap::new(),
            authentication: None,
        }
    }

    pub fn endpoint(&self, method: &str, template: &str) -> Option<&EndpointTemplate> {
        self.endpoints
            .iter()
            .find(|e| e.method == method && e.template == template)
    }

    pub fn rpc_group(&self, protocol: Protocol, rpc_method: &str) -> Option<&RpcGroup> {
        self.rpc_groups
            .iter()
            .find(|g| g.protocol == protocol && g.rpc_method == rpc_method)
    }
}

/// Incremental change pushed to streaming consumers after each update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportDelta {
    EndpointUpdated {
        host: String,
        endpoint: EndpointTemplate,
    },
    /// An endpoint was re-keyed under a more general template and folded into it.
    EndpointSuperseded {
        host: String,
        method: String,
        old_template: String,
        new_template: String,
    },
    RpcGroupUpdated {
        host: String,
        group: RpcGroup,
    },
    SessionOpened {
        host: String,
        session: Session,
    },
    SessionUpdated {
        host: String,
        session_id: Uuid,
        exchange_count: usize,
        end_time: DateTime<Utc>,
    },
    SessionClosed {
        host: String,
        session: Session,
    },
    FlowDetected {
        host: String,
        flow: FlowMatch,
    },
}

impl ReportDelta {
    pub fn host(&self) -> &str {
        match self {
            ReportDelta::EndpointUpdated { host, .. }
            | ReportDelta::EndpointSuperseded { host, .. }
            | ReportDelta::RpcGroupUpdated { host, .. }
            | ReportDelta::SessionOpened { host, .. }
            | ReportDelta::SessionUpdated { host, .. }
            | ReportDelta::SessionClosed { host, .. }
            | ReportDelta::FlowDetected { host, .. } => host,
        }
    }
}
