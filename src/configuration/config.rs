use super::types::*;
use crate::error_handling::types::ConfigError;
use crate::session_management::flows::FlowPattern;
use clap::Args;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine configuration.
///
/// Every threshold the analysis relies on lives here with a documented default,
/// so a missing file, a missing section or a missing key all fall back to the
/// same values. Loaded from TOML:
///
/// ```toml
/// [templating]
/// min_distinct_paths = 2
///
/// [schema]
/// max_examples_per_field = 5
///
/// [sessions]
/// idle_threshold_secs = 1800
/// session_cookie_names = ["sid", "jsessionid"]
///
/// [report]
/// max_endpoint_examples = 3
/// common_header_ratio = 0.8
///
/// [flows]
/// min_match_ratio = 0.7
///
/// [[flows.patterns]]
/// name = "login"
/// steps = [
///     { method = "GET", path = "/login" },
///     { method = "POST", path = "/auth/login" },
/// ]
/// ```
///
/// # Fields Overview
///
/// - `templating`: when a path segment may become a placeholder
/// - `schema`: example retention per schema field
/// - `sessions`: idle gap and identity cookie names
/// - `report`: example and common-header settings of the output report
/// - `flows`: multi-step flows detected in closed sessions
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub templating: TemplatingConfig,
    pub schema: SchemaConfig,
    pub sessions: SessionConfig,
    pub report: ReportConfig,
    pub flows: FlowConfig,
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        debug!("Configuration parsed: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.templating.min_distinct_paths < 2 {
            return Err(ConfigError::NotInRange(format!(
                "templating.min_distinct_paths must be at least 2, got {}",
                self.templating.min_distinct_paths
            )));
        }
        if self.schema.max_examples_per_field == 0 {
            return Err(ConfigError::NotInRange(
                "schema.max_examples_per_field must be at least 1".to_string(),
            ));
        }
        let idle = self.sessions.idle_threshold_secs;
        if idle == 0 || idle > MAX_IDLE_THRESHOLD_SECS {
            return Err(ConfigError::NotInRange(format!(
                "sessions.idle_threshold_secs must be in 1..={}, got {}",
                MAX_IDLE_THRESHOLD_SECS, idle
            )));
        }
        let ratio = self.report.common_header_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::NotInRange(format!(
                "report.common_header_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        let ratio = self.flows.min_match_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::NotInRange(format!(
                "flows.min_match_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        for pattern in &self.flows.patterns {
            FlowPattern::compile(pattern)?;
        }
        Ok(())
    }

    /// Applies command-line overrides on top of the file configuration and
    /// re-validates the result.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(secs) = overrides.idle_threshold_secs {
            self.sessions.idle_threshold_secs = secs;
        }
        if let Some(n) = overrides.min_distinct_paths {
            self.templating.min_distinct_paths = n;
        }
        if let Some(n) = overrides.max_examples_per_field {
            self.schema.max_examples_per_field = n;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Command-line overrides for individual thresholds.
///
/// Flattened into the binary's argument parser; values given here win over the
/// configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Idle gap in seconds that closes a session
    ///
    /// # Command Line
    /// Use `--idle-threshold-secs <SECONDS>` to set this value from the CLI
    #[arg(long)]
    pub idle_threshold_secs: Option<u64>,

    /// Distinct paths required before a segment becomes a placeholder
    #[arg(long)]
    pub min_distinct_paths: Option<usize>,

    /// Example values kept per schema field
    #[arg(long)]
    pub max_examples_per_field: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        overrides: ConfigOverrides,
    }

    fn overrides_under_test() -> Result<ConfigOverrides, clap::Error> {
        TestCli::try_parse_from([
            "apiscope",
            "--idle-threshold-secs",
            "60",
            "--min-distinct-paths",
            "3",
        ])
        .map(|cli| cli.overrides)
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sessions.idle_threshold_secs, 1800);
        assert_eq!(config.templating.min_distinct_paths, 2);
        assert_eq!(config.schema.max_examples_per_field, 5);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [sessions]
            idle_threshold_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.sessions.idle_threshold_secs, 600);
        assert!(config
            .sessions
            .session_cookie_names
            .contains(&"jsessionid".to_string()));
        assert_eq!(config.report.max_endpoint_examples, 3);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[schema]\nmax_examples_per_field = 2").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.schema.max_examples_per_field, 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::from_file(Path::new("/nonexistent/apiscope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_toml_str("[templating]\nmin_distinct_paths = 1").unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));

        let err = Config::from_toml_str("[report]\ncommon_header_ratio = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));

        let err = Config::from_toml_str("[sessions]\nidle_threshold_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_idle_threshold_is_bounded() {
        let err = Config::from_toml_str("[sessions]\nidle_threshold_secs = 100000000000000000").unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));

        let overrides = ConfigOverrides {
            idle_threshold_secs: Some(u64::MAX),
            ..ConfigOverrides::default()
        };
        let err = Config::default().with_overrides(&overrides).unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));

        let one_year = format!("[sessions]\nidle_threshold_secs = {}", MAX_IDLE_THRESHOLD_SECS);
        let config = Config::from_toml_str(&one_year).unwrap();
        assert_eq!(config.sessions.idle_threshold().num_days(), 365);
    }

    #[test]
    fn test_flow_patterns_replace_defaults() {
        let config = Config::from_toml_str(
            r#"
            [[flows.patterns]]
            name = "export"
            steps = [{ method = "POST", path = "/exports" }, { method = "GET", path = "/exports/\\d+" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.flows.patterns.len(), 1);
        assert_eq!(config.flows.patterns[0].steps[1].path, r"/exports/\d+");
        assert_eq!(config.flows.min_match_ratio, 0.7);
        assert_eq!(Config::default().flows.patterns.len(), 5);
    }

    #[test]
    fn test_invalid_flow_patterns_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[flows.patterns]]
            name = "broken"
            steps = [{ method = "GET", path = "/a(" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern(_)));

        let err = Config::from_toml_str("[[flows.patterns]]\nname = \"empty\"\nsteps = []").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern(_)));

        let err = Config::from_toml_str("[flows]\nmin_match_ratio = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));
    }

    #[test]
    fn test_overrides_from_args() {
        let overrides = overrides_under_test().unwrap_or_else(|e| panic!("{}", e));
        let config = Config::default().with_overrides(&overrides).unwrap();

        assert_eq!(config.sessions.idle_threshold_secs, 60);
        assert_eq!(config.templating.min_distinct_paths, 3);
        assert_eq!(config.schema.max_examples_per_field, 5);
    }
}
