use crate::session_management::identity::{Identity, IdentitySource};
use crate::session_management::SessionState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic session ids.
pub const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_4a2e_9b7d_5e30_a8c4_1d2e_3f40_5a6b);

/// A time-bounded run of exchanges from one client identity.
///
/// # Fields Overview
///
/// - `id`: UUIDv5 of identity, start time and per-identity sequence number
/// - `identity`: identity key; a session never mixes identities
/// - `identity_source`: which signal produced the identity
/// - `sequence`: index of this session among the identity's sessions
/// - `exchange_ids`: member exchanges in arrival order
/// - `state`: open until idle expiry or end of stream
/// - `start_time` / `end_time`: earliest and latest member timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub identity: String,
    pub identity_source: IdentitySource,
    pub sequence: u64,
    pub exchange_ids: Vec<String>,
    pub state: SessionState,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Session {
    pub fn open(identity: &Identity, sequence: u64, exchange_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: session_id(&identity.key, timestamp, sequence),
            identity: identity.key.clone(),
            identity_source: identity.source,
            sequence,
            exchange_ids: vec![exchange_id.to_string()],
            state: SessionState::Open,
            start_time: timestamp,
            end_time: timestamp,
        }
    }

    /// Gap since the latest member, zero for out-of-order timestamps.
    pub fn gap_to(&self, timestamp: DateTime<Utc>) -> Duration {
        (timestamp - self.end_time).max(Duration::zero())
    }

    pub fn append(&mut self, exchange_id: &str, timestamp: DateTime<Utc>) {
        self.exchange_ids.push(exchange_id.to_string());
        if timestamp > self.end_time {
            self.end_time = timestamp;
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    pub fn exchange_count(&self) -> usize {
        self.exchange_ids.len()
    }
}

pub fn session_id(identity: &str, start_time: DateTime<Utc>, sequence: u64) -> Uuid {
    let name = format!("{}|{}|{}", identity, start_time.to_rfc3339(), sequence);
    Uuid::new_v5(&SESSION_NAMESPACE, name.as_bytes())
}
