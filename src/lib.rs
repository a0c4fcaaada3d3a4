pub mod analysis;
pub use analysis::{AnalysisOrchestrator, AnalysisReport, HostAccumulator, ReportDelta, StreamingHandle};

pub mod configuration;
pub use configuration::Config;

pub mod data_capture;
pub use data_capture::{CapturedExchange, CapturedResponse};

pub mod error_handling;
pub use error_handling::{AnalysisError, ConfigError, RepositoryError};

pub mod protocol;
pub mod schema;
pub mod session_management;

pub mod storage;
pub use storage::{ExchangeRepository, JsonlRepository};

pub mod templating;
