use crate::configuration::SessionConfig;
use crate::data_capture::CapturedExchange;
use crate::session_management::identity::{derive_identity, Identity};
use crate::session_management::session::Session;
use chrono::Duration;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Transition produced by feeding one exchange (or an expiry) to the reconstructor.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened(Session),
    Updated(Session),
    Closed(Session),
}

/// Per-identity session state machine.
///
/// # Fields Overview
///
/// - `idle_threshold`: largest gap that still continues a session
/// - `cookie_names`: cookie names treated as session identifiers
/// - `open`: at most one open session per identity key
/// - `closed`: finalized sessions in closing order
/// - `sequences`: number of sessions opened so far per identity
pub struct SessionReconstructor {
    idle_threshold: Duration,
    cookie_names: Vec<String>,
    open: BTreeMap<String, Session>,
    closed: Vec<Session>,
    sequences: HashMap<String, u64>,
}

impl SessionReconstructor {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            idle_threshold: config.idle_threshold(),
            cookie_names: config.session_cookie_names.clone(),
            open: BTreeMap::new(),
            closed: Vec::new(),
            sequences: HashMap::new(),
        }
    }

    fn identify(&self, exchange: &CapturedExchange) -> Identity {
        derive_identity(exchange, &self.cookie_names)
    }

    /// Appends `exchange` to its identity's open session, or closes the idle
    /// one and opens a fresh session seeded by it.
    pub fn observe(&mut self, exchange: &CapturedExchange) -> (Identity, Vec<SessionEvent>) {
        let identity = self.identify(exchange);
        let timestamp = exchange.timestamp;
        let mut events = Vec::with_capacity(2);

        match self.open.remove(&identity.key) {
            Some(mut session) if session.gap_to(timestamp) <= self.idle_threshold => {
                session.append(&exchange.id, timestamp);
                trace!("session {} continues with {}", session.id, exchange.id);
                events.push(SessionEvent::Updated(session.clone()));
                self.open.insert(identity.key.clone(), session);
                return (identity, events);
            }
            Some(mut session) => {
                debug!(
                    "session {} idle for {}s, closing",
                    session.id,
                    session.gap_to(timestamp).num_seconds()
                );
                session.close();
                events.push(SessionEvent::Closed(session.clone()));
                self.closed.push(session);
            }
            None => {}
        }

        let sequence = self.sequences.entry(identity.key.clone()).or_insert(0);
        let session = Session::open(&identity, *sequence, &exchange.id, timestamp);
        *sequence += 1;
        debug!("session {} opened for {}", session.id, identity.key);
        events.push(SessionEvent::Opened(session.clone()));
        self.open.insert(identity.key.clone(), session);
        (identity, events)
    }

    /// Closes the open session of `identity`, if any.
    pub fn close_identity(&mut self, identity: &str) -> Option<Session> {
        let mut session = self.open.remove(identity)?;
        session.close();
        debug!("session {} closed", session.id);
        self.closed.push(session.clone());
        Some(session)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Closes the remaining open sessions and returns all sessions ordered by
    /// start time.
    pub fn finalize(mut self) -> Vec<Session> {
        let keys: Vec<String> = self.open.keys().cloned().collect();
        for key in keys {
            self.close_identity(&key);
        }
        let mut all = self.closed;
        sort_sessions(&mut all);
        all
    }
}

fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
}

/// Aggregate figures over a set of sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub count: usize,
    pub mean_duration_secs: f64,
    pub max_duration_secs: i64,
    pub mean_exchanges: f64,
    pub max_exchanges: usize,
}

impl SessionStats {
    pub fn from_sessions(sessions: &[Session]) -> Self {
        if sessions.is_empty() {
            return Self::default();
        }
        let count = sessions.len();
        let durations: Vec<i64> = sessions.iter().map(|s| s.duration().num_seconds()).collect();
        let sizes: Vec<usize> = sessions.iter().map(Session::exchange_count).collect();
        Self {
            count,
            mean_duration_secs: durations.iter().sum::<i64>() as f64 / count as f64,
            max_duration_secs: durations.iter().copied().max().unwrap_or(0),
            mean_exchanges: sizes.iter().sum::<usize>() as f64 / count as f64,
            max_exchanges: sizes.iter().copied().max().unwrap_or(0),
        }
    }
}
