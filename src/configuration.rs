pub mod config;
pub mod types;

pub use config::{Config, ConfigOverrides};
pub use types::{
    FlowConfig, FlowPatternConfig, FlowStepConfig, ReportConfig, SchemaConfig, SessionConfig, TemplatingConfig,
};
