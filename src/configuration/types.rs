use serde::{Deserialize, Serialize};

/// Default number of distinct concrete paths required before a segment may be
/// promoted to a placeholder.
pub const DEFAULT_MIN_DISTINCT_PATHS: usize = 2;
/// Default cap on retained example values per schema field.
pub const DEFAULT_MAX_EXAMPLES_PER_FIELD: usize = 5;
/// Default idle gap closing a session: 30 minutes.
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 30 * 60;
/// Largest accepted idle gap: one year.
pub const MAX_IDLE_THRESHOLD_SECS: u64 = 365 * 24 * 60 * 60;
pub const DEFAULT_MAX_ENDPOINT_EXAMPLES: usize = 3;
pub const DEFAULT_COMMON_HEADER_RATIO: f64 = 0.8;
/// Default share of a flow's steps a session must hit, in order, to count as
/// that flow.
pub const DEFAULT_FLOW_MIN_MATCH_RATIO: f64 = 0.7;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatingConfig {
    pub min_distinct_paths: usize,
}

impl Default for TemplatingConfig {
    fn default() -> Self {
        Self {
            min_distinct_paths: DEFAULT_MIN_DISTINCT_PATHS,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub max_examples_per_field: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            max_examples_per_field: DEFAULT_MAX_EXAMPLES_PER_FIELD,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum gap between two exchanges of one identity that keeps them in
    /// the same session.
    pub idle_threshold_secs: u64,
    /// Cookie names (case-insensitive) whose value identifies a client session.
    /// Any cookie whose name contains `session` is also accepted.
    pub session_cookie_names: Vec<String>,
}

impl SessionConfig {
    /// The idle gap, clamped to [`MAX_IDLE_THRESHOLD_SECS`] for configurations
    /// that skipped validation.
    pub fn idle_threshold(&self) -> chrono::TimeDelta {
        i64::try_from(self.idle_threshold_secs.min(MAX_IDLE_THRESHOLD_SECS))
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_threshold_secs.min(MAX_IDLE_THRESHOLD_SECS))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: DEFAULT_IDLE_THRESHOLD_SECS,
            session_cookie_names: [
                "sid",
                "jsessionid",
                "phpsessid",
                "connect.sid",
                "auth",
                "auth_token",
                "access_token",
                "token",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Concrete paths retained per endpoint as examples.
    pub max_endpoint_examples: usize,
    /// Share of exchanges that must carry the same header value for it to be
    /// reported as a common header.
    pub common_header_ratio: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_endpoint_examples: DEFAULT_MAX_ENDPOINT_EXAMPLES,
            common_header_ratio: DEFAULT_COMMON_HEADER_RATIO,
        }
    }
}

/// One step of a flow: an HTTP method and a regular expression the whole path
/// (query string excluded) must match.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FlowStepConfig {
    pub method: String,
    pub path: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FlowPatternConfig {
    pub name: String,
    pub steps: Vec<FlowStepConfig>,
}

impl FlowPatternConfig {
    fn new(name: &str, steps: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            steps: steps
                .iter()
                .map(|(method, path)| FlowStepConfig {
                    method: method.to_string(),
                    path: path.to_string(),
                })
                .collect(),
        }
    }
}

/// Known multi-step flows looked for in every closed session. Configured
/// patterns replace the built-in ones.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub min_match_ratio: f64,
    pub patterns: Vec<FlowPatternConfig>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            min_match_ratio: DEFAULT_FLOW_MIN_MATCH_RATIO,
            patterns: vec![
                FlowPatternConfig::new(
                    "login",
                    &[("GET", "/login"), ("POST", "/auth/login"), ("GET", "/dashboard")],
                ),
                FlowPatternConfig::new(
                    "checkout",
                    &[
                        ("GET", "/cart"),
                        ("GET", "/checkout"),
                        ("POST", "/payment"),
                        ("POST", "/order/confirm"),
                    ],
                ),
                FlowPatternConfig::new(
                    "registration",
                    &[("GET", "/register"), ("POST", "/api/register"), ("GET", "/verify")],
                ),
                FlowPatternConfig::new(
                    "password_reset",
                    &[
                        ("GET", "/forgot-password"),
                        ("POST", "/api/reset-password"),
                        ("GET", "/reset-password"),
                        ("POST", "/api/update-password"),
                    ],
                ),
                FlowPatternConfig::new(
                    "crud",
                    &[
                        ("POST", r"/api/\w+"),
                        ("GET", r"/api/\w+/\d+"),
                        ("PUT", r"/api/\w+/\d+"),
                        ("DELETE", r"/api/\w+/\d+"),
                    ],
                ),
            ],
        }
    }
}
