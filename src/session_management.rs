//! Session reconstruction core module.
//!
//! This module groups a client's exchanges into time-bounded sessions: identity
//! derivation, the session record, the per-identity state machine, flow
//! detection over closed sessions, and the idle timers used in streaming mode.

use serde::{Deserialize, Serialize};

/// Submodule matching sessions against known multi-step flows.
pub mod flows;
/// Submodule deriving client identities from exchanges.
pub mod identity;
/// Submodule for tokio-driven idle expiry.
pub mod idle_timer;
/// Submodule for the per-identity session state machine.
pub mod reconstructor;
/// Submodule for session data structures and utilities.
pub mod session;

pub use flows::{count_flows, FlowCount, FlowMatch, FlowMatcher, FlowProgress, FlowStep};
pub use identity::{derive_identity, Identity, IdentitySource};
pub use reconstructor::{SessionEvent, SessionReconstructor, SessionStats};
pub use session::Session;

/// Represents the current state of a session.
///
/// Variants:
/// - `Open`: The session may still receive exchanges.
/// - `Closed`: The session was finalized by idle expiry or end of stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
}
