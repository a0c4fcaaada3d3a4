//! Exchange Repository Trait
//!
//! This module defines the `ExchangeRepository` trait, the read-only input
//! seam of the analysis engine.
//!
//! Implementors of this trait are responsible for:
//! - Listing the hosts present in the capture
//! - Retrieving exchanges, optionally filtered
//!
//! Every method returns a `Result`: an unreachable repository is an error,
//! while an empty capture is an empty `Vec`.

use crate::data_capture::CapturedExchange;
use crate::error_handling::types::RepositoryError;
use crate::storage::types::ExchangeFilter;

/// The `ExchangeRepository` trait defines the interface for exchange sources.
///
/// Implementations must be shareable across analysis tasks.
pub trait ExchangeRepository: Send + Sync {
    /// Distinct hosts present in the capture, sorted.
    fn hosts(&self) -> Result<Vec<String>, RepositoryError>;

    /// Retrieves exchanges, optionally filtered.
    fn exchanges(&self, filter: Option<ExchangeFilter>) -> Result<Vec<CapturedExchange>, RepositoryError>;

    /// Retrieves every exchange addressed to `host`.
    fn exchanges_for_host(&self, host: &str) -> Result<Vec<CapturedExchange>, RepositoryError> {
        self.exchanges(Some(ExchangeFilter::by_host(host)))
    }
}
