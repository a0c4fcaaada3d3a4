//! Storage subsystem
//!
//! This module provides the input abstraction the analysis engine reads
//! captured exchanges from.
//!
//! Components:
//! - `storage_trait`: the ExchangeRepository trait defining a uniform API.
//! - `types`: the exchange filter shared by repositories.
//! - `file_storage`: JSON-lines directory implementation.
//! - `memory_storage`: in-memory implementation for embedding and tests.

pub mod file_storage;
pub mod memory_storage;
pub mod storage_trait;
pub mod types;

pub use file_storage::JsonlRepository;
pub use memory_storage::InMemoryRepository;
pub use storage_trait::ExchangeRepository;
pub use types::ExchangeFilter;
