//! Per-host analysis state.
//!
//! A [`HostAccumulator`] owns every bucket of one host: REST endpoints keyed by
//! (method, template), RPC groups keyed by (protocol, method), header tallies
//! and the session reconstructor. Each [`HostAccumulator::ingest`] is one
//! atomic update and returns the deltas it produced.

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use super::headers::{detect_auth, HeaderProfile};
use super::report::{AnalysisReport, AuthScheme, ReportDelta, RpcGroup};
use super::rpc::{extract_calls, RpcCall};
use crate::configuration::Config;
use crate::data_capture::{decode_body, BodyDecoding, BodyStatus, CapturedExchange};
use crate::protocol::{classify_input, Confidence, Protocol, ProtocolClassification, SniffInput};
use crate::schema::{merge, ExampleStore, SchemaNode};
use crate::session_management::{
    count_flows, FlowMatch, FlowMatcher, FlowProgress, FlowStep, Identity, SessionEvent, SessionReconstructor,
    SessionStats,
};
use crate::templating::{EndpointTemplate, PathIndex, PathTemplate};

type EndpointKey = (String, String);
type GroupKey = (Protocol, String);

/// Distinct concrete paths counted per endpoint; the count saturates here.
pub const MAX_TRACKED_PATHS: usize = 4096;

fn path_fingerprint(path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

fn join_schemas(a: Option<SchemaNode>, b: Option<SchemaNode>) -> Option<SchemaNode> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.join(b)),
        (a, b) => a.or(b),
    }
}

fn earliest(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    a.min(b)
}

fn latest(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    a.max(b)
}

struct EndpointState {
    template: PathTemplate,
    sample_count: u64,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    request_schema: Option<SchemaNode>,
    response_schema: Option<SchemaNode>,
    request_examples: ExampleStore,
    response_examples: ExampleStore,
    body: BodyStatus,
    undecodable_samples: u64,
    query_params: BTreeSet<String>,
    status_codes: BTreeMap<u16, u64>,
    latency_total_ms: f64,
    latency_samples: u64,
    representative: String,
    path_examples: BTreeSet<String>,
    max_path_examples: usize,
    path_fingerprints: HashSet<u64>,
}

impl EndpointState {
    fn new(template: PathTemplate, path: &str, at: DateTime<Utc>, max_examples: usize, max_paths: usize) -> Self {
        Self {
            template,
            sample_count: 0,
            first_seen: at,
            last_seen: at,
            request_schema: None,
            response_schema: None,
            request_examples: ExampleStore::new(max_examples),
            response_examples: ExampleStore::new(max_examples),
            body: BodyStatus::Empty,
            undecodable_samples: 0,
            query_params: BTreeSet::new(),
            status_codes: BTreeMap::new(),
            latency_total_ms: 0.0,
            latency_samples: 0,
            representative: path.to_string(),
            path_examples: BTreeSet::new(),
            max_path_examples: max_paths,
            path_fingerprints: HashSet::new(),
        }
    }

    /// Keeps the smallest paths as examples and counts distinct ones up to
    /// [`MAX_TRACKED_PATHS`].
    fn note_path(&mut self, path: &str) {
        if path < self.representative.as_str() {
            self.representative = path.to_string();
        }
        if self.path_fingerprints.len() < MAX_TRACKED_PATHS {
            self.path_fingerprints.insert(path_fingerprint(path));
        }
        let below_largest = self.path_examples.last().map_or(true, |largest| path < largest.as_str());
        if self.path_examples.len() < self.max_path_examples || below_largest {
            self.path_examples.insert(path.to_string());
            while self.path_examples.len() > self.max_path_examples {
                self.path_examples.pop_last();
            }
        }
    }

    fn record(&mut self, exchange: &CapturedExchange, request: &BodyDecoding, response: Option<&BodyDecoding>) {
        self.sample_count += 1;
        self.first_seen = earliest(self.first_seen, exchange.timestamp);
        self.last_seen = latest(self.last_seen, exchange.timestamp);
        self.note_path(exchange.path_only());
        self.query_params.extend(exchange.query_param_names());

        let response_status = response.map_or(BodyStatus::Empty, BodyDecoding::status);
        self.body = self.body.max(request.status()).max(response_status);
        if request.is_undecodable() || response.is_some_and(BodyDecoding::is_undecodable) {
            self.undecodable_samples += 1;
        }

        if let Some(value) = request.json() {
            self.request_schema = Some(merge(self.request_schema.take(), value));
            self.request_examples.record(value);
        }
        if let Some(value) = response.and_then(BodyDecoding::json) {
            self.response_schema = Some(merge(self.response_schema.take(), value));
            self.response_examples.record(value);
        }
        if let Some(response) = &exchange.response {
            *self.status_codes.entry(response.status_code).or_insert(0) += 1;
            self.latency_total_ms += response.latency_ms;
            self.latency_samples += 1;
        }
    }

    /// Folds `other` into `self`: schemas by join, counters by sum.
    fn absorb(&mut self, other: EndpointState) {
        self.sample_count += other.sample_count;
        self.first_seen = earliest(self.first_seen, other.first_seen);
        self.last_seen = latest(self.last_seen, other.last_seen);
        self.request_schema = join_schemas(self.request_schema.take(), other.request_schema);
        self.response_schema = join_schemas(self.response_schema.take(), other.response_schema);
        self.request_examples.absorb(other.request_examples);
        self.response_examples.absorb(other.response_examples);
        self.body = self.body.max(other.body);
        self.undecodable_samples += other.undecodable_samples;
        self.query_params.extend(other.query_params);
        for (code, count) in other.status_codes {
            *self.status_codes.entry(code).or_insert(0) += count;
        }
        self.latency_total_ms += other.latency_total_ms;
        self.latency_samples += other.latency_samples;
        if other.representative < self.representative {
            self.representative = other.representative;
        }
        for fingerprint in other.path_fingerprints {
            if self.path_fingerprints.len() >= MAX_TRACKED_PATHS {
                break;
            }
            self.path_fingerprints.insert(fingerprint);
        }
        self.path_examples.extend(other.path_examples);
        while self.path_examples.len() > self.max_path_examples {
            self.path_examples.pop_last();
        }
    }

    fn to_endpoint(&self) -> EndpointTemplate {
        EndpointTemplate {
            method: self.template.method.clone(),
            template: self.template.render(),
            parameters: self.template.parameters.clone(),
            sample_count: self.sample_count,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            request_schema: self.request_schema.clone(),
            response_schema: self.response_schema.clone(),
            body: self.body,
            undecodable_samples: self.undecodable_samples,
            query_params: self.query_params.clone(),
            status_codes: self.status_codes.clone(),
            mean_latency_ms: (self.latency_samples > 0)
                .then(|| self.latency_total_ms / self.latency_samples as f64),
            request_examples: self.request_examples.to_map(),
            response_examples: self.response_examples.to_map(),
            distinct_paths: self.path_fingerprints.len(),
            examples: self.path_examples.iter().cloned().collect(),
        }
    }
}

struct RpcGroupState {
    protocol: Protocol,
    rpc_method: String,
    confidence: Confidence,
    request_schema: Option<SchemaNode>,
    response_schema: Option<SchemaNode>,
    request_examples: ExampleStore,
    response_examples: ExampleStore,
    call_count: u64,
    batch_call_count: u64,
    error_count: u64,
    endpoints: BTreeSet<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl RpcGroupState {
    fn new(protocol: Protocol, rpc_method: &str, at: DateTime<Utc>, max_examples: usize) -> Self {
        Self {
            protocol,
            rpc_method: rpc_method.to_string(),
            confidence: Confidence::Low,
            request_schema: None,
            response_schema: None,
            request_examples: ExampleStore::new(max_examples),
            response_examples: ExampleStore::new(max_examples),
            call_count: 0,
            batch_call_count: 0,
            error_count: 0,
            endpoints: BTreeSet::new(),
            first_seen: at,
            last_seen: at,
        }
    }

    fn record(&mut self, exchange: &CapturedExchange, confidence: Confidence, call: RpcCall) {
        self.call_count += 1;
        if call.batch {
            self.batch_call_count += 1;
        }
        let http_error = exchange.status_code().is_some_and(|s| s >= 400);
        if call.error || http_error {
            self.error_count += 1;
        }
        self.confidence = self.confidence.max(confidence);
        self.endpoints.insert(exchange.path_only().to_string());
        self.first_seen = earliest(self.first_seen, exchange.timestamp);
        self.last_seen = latest(self.last_seen, exchange.timestamp);

        if let Some(value) = call.request {
            self.request_schema = Some(merge(self.request_schema.take(), &value));
            self.request_examples.record(&value);
        }
        if let Some(value) = call.response {
            self.response_schema = Some(merge(self.response_schema.take(), &value));
            self.response_examples.record(&value);
        }
    }

    fn to_group(&self) -> RpcGroup {
        RpcGroup {
            protocol: self.protocol,
            rpc_method: self.rpc_method.clone(),
            confidence: self.confidence,
            request_schema: self.request_schema.clone(),
            response_schema: self.response_schema.clone(),
            request_examples: self.request_examples.to_map(),
            response_examples: self.response_examples.to_map(),
            call_count: self.call_count,
            batch_call_count: self.batch_call_count,
            error_count: self.error_count,
            endpoints: self.endpoints.clone(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

/// All analysis state of one host.
///
/// # Fields Overview
///
/// - `paths`: REST paths seen per method and width, generalized incrementally
/// - `endpoints`: REST buckets, re-keyed as templates generalize
/// - `rpc_groups`: RPC buckets
/// - `sessions`: per-identity session state machine
/// - `flow_progress`: flow matching state of every open session
/// - `headers`: request header tallies for common-header detection
pub struct HostAccumulator {
    host: String,
    config: Config,
    exchange_count: u64,
    undecodable_exchanges: u64,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    protocols: BTreeMap<Protocol, u64>,
    paths: PathIndex,
    endpoints: BTreeMap<EndpointKey, EndpointState>,
    rpc_groups: BTreeMap<GroupKey, RpcGroupState>,
    sessions: SessionReconstructor,
    flow_matcher: FlowMatcher,
    flow_progress: HashMap<Uuid, FlowProgress>,
    flow_matches: Vec<FlowMatch>,
    headers: HeaderProfile,
    authentication: Option<AuthScheme>,
}

impl HostAccumulator {
    /// `host` is normalised to lowercase.
    pub fn start(host: &str, config: Config) -> Self {
        debug!("starting accumulator for {}", host);
        Self {
            host: host.to_ascii_lowercase(),
            paths: PathIndex::new(config.templating.min_distinct_paths),
            sessions: SessionReconstructor::new(&config.sessions),
            flow_matcher: FlowMatcher::new(&config.flows),
            flow_progress: HashMap::new(),
            flow_matches: Vec::new(),
            config,
            exchange_count: 0,
            undecodable_exchanges: 0,
            first_seen: None,
            last_seen: None,
            protocols: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            rpc_groups: BTreeMap::new(),
            headers: HeaderProfile::default(),
            authentication: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn exchange_count(&self) -> u64 {
        self.exchange_count
    }

    /// Folds one exchange into every bucket it touches.
    pub fn ingest(&mut self, exchange: &CapturedExchange) -> Vec<ReportDelta> {
        self.ingest_tracked(exchange).1
    }

    /// Like [`ingest`](Self::ingest), also returning the exchange's identity.
    pub fn ingest_tracked(&mut self, exchange: &CapturedExchange) -> (Identity, Vec<ReportDelta>) {
        if !exchange.host.eq_ignore_ascii_case(&self.host) {
            warn!("exchange {} for {} folded into {}", exchange.id, exchange.host, self.host);
        }
        let request = decode_body(
            &exchange.body,
            exchange.body_decoded.as_deref(),
            exchange.headers.content_type(),
        );
        let response = exchange
            .response
            .as_ref()
            .map(|r| decode_body(&r.body, r.body_decoded.as_deref(), r.headers.content_type()));
        let input = SniffInput::from_exchange(exchange, &request, response.as_ref());
        let classification = classify_input(&input);
        trace!(
            "{} {} {} classified {} ({:?})",
            exchange.id,
            exchange.method,
            exchange.path,
            classification.protocol,
            classification.confidence
        );

        self.exchange_count += 1;
        *self.protocols.entry(classification.protocol).or_insert(0) += 1;
        self.first_seen = Some(self.first_seen.map_or(exchange.timestamp, |t| earliest(t, exchange.timestamp)));
        self.last_seen = Some(self.last_seen.map_or(exchange.timestamp, |t| latest(t, exchange.timestamp)));
        for decoding in std::iter::once(&request).chain(response.as_ref()) {
            if let BodyDecoding::Undecodable(reason) = decoding {
                warn!("exchange {} has an undecodable body: {}", exchange.id, reason);
            }
        }
        if request.is_undecodable() || response.as_ref().is_some_and(BodyDecoding::is_undecodable) {
            self.undecodable_exchanges += 1;
        }
        self.headers.observe(exchange);
        if self.authentication.is_none() {
            self.authentication = detect_auth(exchange, &self.config.sessions.session_cookie_names);
        }

        let mut deltas = Vec::new();
        if classification.protocol.is_rpc() {
            self.ingest_rpc(exchange, &input, &classification, &mut deltas);
        } else {
            self.ingest_rest(exchange, &request, response.as_ref(), &mut deltas);
        }

        let (identity, events) = self.sessions.observe(exchange);
        let step = FlowStep::from_exchange(exchange);
        for event in events {
            let closed = match &event {
                SessionEvent::Opened(session) => {
                    let mut progress = self.flow_matcher.start();
                    self.flow_matcher.advance(&mut progress, &step);
                    self.flow_progress.insert(session.id, progress);
                    None
                }
                SessionEvent::Updated(session) => {
                    if let Some(progress) = self.flow_progress.get_mut(&session.id) {
                        self.flow_matcher.advance(progress, &step);
                    }
                    None
                }
                SessionEvent::Closed(session) => Some(session.id),
            };
            deltas.push(self.session_delta(event));
            if let Some(id) = closed {
                deltas.extend(self.conclude_flows(id));
            }
        }
        (identity, deltas)
    }

    fn ingest_rest(
        &mut self,
        exchange: &CapturedExchange,
        request: &BodyDecoding,
        response: Option<&BodyDecoding>,
        deltas: &mut Vec<ReportDelta>,
    ) {
        let path = exchange.path_only();
        let promoted = self.paths.insert(&exchange.method, path);
        let template = self.paths.template(&exchange.method, path);
        if let Some(position) = promoted {
            self.rekey(&template, position, deltas);
        }

        let key = (exchange.method.clone(), template.render());
        let max_examples = self.config.schema.max_examples_per_field;
        let max_paths = self.config.report.max_endpoint_examples;
        let state = self.endpoints.entry(key).or_insert_with(|| {
            EndpointState::new(template.clone(), path, exchange.timestamp, max_examples, max_paths)
        });
        state.template = template;
        state.record(exchange, request, response);
        deltas.push(ReportDelta::EndpointUpdated {
            host: self.host.clone(),
            endpoint: state.to_endpoint(),
        });
    }

    /// Re-templates the endpoints that share `current`'s method, width and
    /// first `position` segments, the only ones a promotion at `position` can
    /// change. Any whose template became more general is moved, and folded
    /// when the target exists.
    fn rekey(&mut self, current: &PathTemplate, position: usize, deltas: &mut Vec<ReportDelta>) {
        let method = current.method.as_str();
        let width = current.segment_count();
        let prefix = current.render_prefix(position);

        let candidates: Vec<EndpointKey> = self
            .endpoints
            .range((method.to_string(), prefix.clone())..)
            .take_while(|(k, _)| k.0 == method && k.1.starts_with(&prefix))
            .filter(|(_, s)| s.template.segment_count() == width)
            .map(|(k, _)| k.clone())
            .collect();

        for old_key in candidates {
            let Some(representative) = self.endpoints.get(&old_key).map(|s| s.representative.clone()) else {
                continue;
            };
            let fresh = self.paths.template(method, &representative);
            let new_key = (method.to_string(), fresh.render());
            if new_key == old_key {
                if let Some(state) = self.endpoints.get_mut(&old_key) {
                    state.template = fresh;
                }
                continue;
            }
            let Some(mut moved) = self.endpoints.remove(&old_key) else {
                continue;
            };
            debug!("{} {} superseded by {}", method, old_key.1, new_key.1);
            deltas.push(ReportDelta::EndpointSuperseded {
                host: self.host.clone(),
                method: method.to_string(),
                old_template: old_key.1.clone(),
                new_template: new_key.1.clone(),
            });
            match self.endpoints.remove(&new_key) {
                Some(mut target) => {
                    target.absorb(moved);
                    target.template = fresh;
                    self.endpoints.insert(new_key, target);
                }
                None => {
                    moved.template = fresh;
                    self.endpoints.insert(new_key, moved);
                }
            }
        }
    }

    fn ingest_rpc(
        &mut self,
        exchange: &CapturedExchange,
        input: &SniffInput,
        classification: &ProtocolClassification,
        deltas: &mut Vec<ReportDelta>,
    ) {
        let max_examples = self.config.schema.max_examples_per_field;
        let mut touched = BTreeSet::new();
        for call in extract_calls(input, classification) {
            let key = (classification.protocol, call.method.clone());
            let group = self.rpc_groups.entry(key.clone()).or_insert_with(|| {
                RpcGroupState::new(classification.protocol, &call.method, exchange.timestamp, max_examples)
            });
            group.record(exchange, classification.confidence, call);
            touched.insert(key);
        }
        for key in touched {
            if let Some(group) = self.rpc_groups.get(&key) {
                deltas.push(ReportDelta::RpcGroupUpdated {
                    host: self.host.clone(),
                    group: group.to_group(),
                });
            }
        }
    }

    fn session_delta(&self, event: SessionEvent) -> ReportDelta {
        let host = self.host.clone();
        match event {
            SessionEvent::Opened(session) => ReportDelta::SessionOpened { host, session },
            SessionEvent::Updated(session) => ReportDelta::SessionUpdated {
                host,
                session_id: session.id,
                exchange_count: session.exchange_count(),
                end_time: session.end_time,
            },
            SessionEvent::Closed(session) => ReportDelta::SessionClosed { host, session },
        }
    }

    /// Matches the finished session against the known flows.
    fn conclude_flows(&mut self, session_id: Uuid) -> Vec<ReportDelta> {
        let Some(progress) = self.flow_progress.remove(&session_id) else {
            return Vec::new();
        };
        let found = self.flow_matcher.conclude(progress, session_id);
        let deltas = found
            .iter()
            .map(|flow| ReportDelta::FlowDetected {
                host: self.host.clone(),
                flow: flow.clone(),
            })
            .collect();
        self.flow_matches.extend(found);
        deltas
    }

    /// Closes the open session of `identity` after idle expiry. Returns the
    /// closing delta followed by any flows the session completed.
    pub fn close_session(&mut self, identity: &str) -> Vec<ReportDelta> {
        let Some(session) = self.sessions.close_identity(identity) else {
            return Vec::new();
        };
        let id = session.id;
        let mut deltas = vec![self.session_delta(SessionEvent::Closed(session))];
        deltas.extend(self.conclude_flows(id));
        deltas
    }

    /// Closes every remaining session and assembles the report.
    pub fn finalize(mut self, complete: bool) -> AnalysisReport {
        let common_headers = self.headers.common(self.config.report.common_header_ratio);
        let endpoints = self.endpoints.values().map(EndpointState::to_endpoint).collect();
        let rpc_groups = self.rpc_groups.values().map(RpcGroupState::to_group).collect();
        let sessions = self.sessions.finalize();
        let session_stats = SessionStats::from_sessions(&sessions);
        for session in &sessions {
            if let Some(progress) = self.flow_progress.remove(&session.id) {
                let found = self.flow_matcher.conclude(progress, session.id);
                self.flow_matches.extend(found);
            }
        }
        let mut flows = self.flow_matches;
        flows.sort_by(|a, b| {
            let first = |f: &FlowMatch| f.steps.first().map(|s| s.timestamp);
            first(a)
                .cmp(&first(b))
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        let flow_counts = count_flows(&flows);
        debug!(
            "finalized {}: {} exchange(s), {} session(s)",
            self.host,
            self.exchange_count,
            sessions.len()
        );

        AnalysisReport {
            host: self.host,
            complete,
            exchange_count: self.exchange_count,
            undecodable_exchanges: self.undecodable_exchanges,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            protocols: self.protocols,
            endpoints,
            rpc_groups,
            sessions,
            session_stats,
            flows,
            flow_counts,
            common_headers,
            authentication: self.authentication,
        }
    }
}
