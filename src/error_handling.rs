//! Error types shared by the engine, its configuration and the repository seam.

pub mod types;

pub use types::{AnalysisError, ConfigError, RepositoryError};
