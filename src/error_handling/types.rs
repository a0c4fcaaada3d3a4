use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlError(String),
    #[error("Value out of range: {0}")]
    NotInRange(String),
    #[error("Invalid flow pattern: {0}")]
    InvalidPattern(String),
}

/// Failures of the injected exchange repository.
///
/// `Unavailable` means the backing store could not be reached at all. Every
/// variant reaches callers wrapped in [`AnalysisError::InputUnavailable`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Repository unavailable: {0}")]
    Unavailable(String),
    #[error("Repository read failed: {0}")]
    ReadFailed(String),
    #[error("Repository IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Input unavailable: {0}")]
    InputUnavailable(RepositoryError),
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),
    #[error("Analysis task failed: {0}")]
    TaskFailed(String),
    #[error("Stream channel closed")]
    ChannelClosed,
}

impl From<RepositoryError> for AnalysisError {
    fn from(err: RepositoryError) -> Self {
        AnalysisError::InputUnavailable(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_failures_surface_as_input_unavailable() {
        let err: AnalysisError = RepositoryError::Unavailable("db offline".into()).into();
        assert!(matches!(err, AnalysisError::InputUnavailable(_)));
        assert_eq!(
            err.to_string(),
            "Input unavailable: Repository unavailable: db offline"
        );
    }
}
