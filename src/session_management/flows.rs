//! Multi-step flow detection.
//!
//! Each open session carries a [`FlowProgress`]: for every configured pattern,
//! the steps matched so far in order. A step only advances a pattern when it
//! matches the next expected method and path, so unrelated traffic in between
//! is skipped. When the session closes the progress is concluded into
//! [`FlowMatch`]es.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::configuration::{FlowConfig, FlowPatternConfig};
use crate::data_capture::CapturedExchange;
use crate::error_handling::types::ConfigError;

/// One exchange as seen by flow matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    pub exchange_id: String,
    pub method: String,
    pub path: String,
    pub status_code: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

impl FlowStep {
    pub fn from_exchange(exchange: &CapturedExchange) -> Self {
        Self {
            exchange_id: exchange.id.clone(),
            method: exchange.method.clone(),
            path: exchange.path_only().to_string(),
            status_code: exchange.status_code(),
            timestamp: exchange.timestamp,
        }
    }
}

struct StepPattern {
    method: String,
    path: Regex,
}

impl StepPattern {
    fn matches(&self, step: &FlowStep) -> bool {
        step.method.eq_ignore_ascii_case(&self.method) && self.path.is_match(&step.path)
    }
}

/// A compiled flow: named, ordered step patterns.
pub struct FlowPattern {
    pub name: String,
    steps: Vec<StepPattern>,
}

impl FlowPattern {
    /// Compiles every step; paths are matched as a whole.
    pub fn compile(config: &FlowPatternConfig) -> Result<Self, ConfigError> {
        if config.name.is_empty() || config.steps.is_empty() {
            return Err(ConfigError::InvalidPattern(format!(
                "flow '{}' needs a name and at least one step",
                config.name
            )));
        }
        let steps = config
            .steps
            .iter()
            .map(|step| {
                Regex::new(&format!("^(?:{})$", step.path))
                    .map(|path| StepPattern {
                        method: step.method.clone(),
                        path,
                    })
                    .map_err(|e| ConfigError::InvalidPattern(format!("flow '{}': {}", config.name, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: config.name.clone(),
            steps,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A flow recognised in one session.
///
/// # Fields Overview
///
/// - `steps`: the matched exchanges, in pattern order
/// - `expected_steps`: length of the pattern
/// - `success`: no matched step failed and the last one got a non-error status
/// - `duration_ms`: from the first to the last matched step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowMatch {
    pub name: String,
    pub session_id: Uuid,
    pub steps: Vec<FlowStep>,
    pub expected_steps: usize,
    pub success: bool,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCount {
    pub detected: u64,
    pub successful: u64,
}

/// Per-name tallies of `flows`.
pub fn count_flows(flows: &[FlowMatch]) -> BTreeMap<String, FlowCount> {
    let mut counts: BTreeMap<String, FlowCount> = BTreeMap::new();
    for flow in flows {
        let count = counts.entry(flow.name.clone()).or_default();
        count.detected += 1;
        if flow.success {
            count.successful += 1;
        }
    }
    counts
}

/// Matching state of one open session.
#[derive(Debug, Clone, Default)]
pub struct FlowProgress {
    exchanges: usize,
    matched: Vec<Vec<FlowStep>>,
}

pub struct FlowMatcher {
    patterns: Vec<FlowPattern>,
    min_match_ratio: f64,
}

impl FlowMatcher {
    /// Patterns that fail to compile are skipped; [`Config::validate`]
    /// rejects them beforehand.
    ///
    /// [`Config::validate`]: crate::configuration::Config::validate
    pub fn new(config: &FlowConfig) -> Self {
        let patterns = config
            .patterns
            .iter()
            .filter_map(|p| match FlowPattern::compile(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("skipping flow pattern: {}", e);
                    None
                }
            })
            .collect();
        Self {
            patterns,
            min_match_ratio: config.min_match_ratio,
        }
    }

    pub fn start(&self) -> FlowProgress {
        FlowProgress {
            exchanges: 0,
            matched: vec![Vec::new(); self.patterns.len()],
        }
    }

    /// Feeds the next exchange of a session.
    pub fn advance(&self, progress: &mut FlowProgress, step: &FlowStep) {
        progress.exchanges += 1;
        for (pattern, matched) in self.patterns.iter().zip(progress.matched.iter_mut()) {
            if pattern.steps.get(matched.len()).is_some_and(|next| next.matches(step)) {
                matched.push(step.clone());
            }
        }
    }

    /// Flows of a closed session. Single-exchange sessions never form a flow.
    pub fn conclude(&self, progress: FlowProgress, session_id: Uuid) -> Vec<FlowMatch> {
        if progress.exchanges < 2 {
            return Vec::new();
        }
        self.patterns
            .iter()
            .zip(progress.matched)
            .filter(|(pattern, matched)| !matched.is_empty() && matched.len() >= self.required_steps(pattern))
            .map(|(pattern, steps)| {
                let duration_ms = match (steps.first(), steps.last()) {
                    (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
                    _ => 0,
                };
                let flow = FlowMatch {
                    name: pattern.name.clone(),
                    session_id,
                    success: is_successful(&steps),
                    expected_steps: pattern.len(),
                    steps,
                    duration_ms,
                };
                debug!(
                    "flow {} in session {} ({}/{} steps)",
                    flow.name,
                    session_id,
                    flow.steps.len(),
                    flow.expected_steps
                );
                flow
            })
            .collect()
    }

    fn required_steps(&self, pattern: &FlowPattern) -> usize {
        ((pattern.len() as f64 * self.min_match_ratio) - 1e-9).ceil().max(1.0) as usize
    }
}

fn is_successful(steps: &[FlowStep]) -> bool {
    steps.iter().all(|s| s.status_code.map_or(true, |code| code < 400))
        && steps.last().and_then(|s| s.status_code).is_some_and(|code| code < 400)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::FlowStepConfig;
    use crate::data_capture::CapturedResponse;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn step(id: &str, secs: i64, method: &str, path: &str, status: u16) -> FlowStep {
        FlowStep::from_exchange(
            &CapturedExchange::new(id, at(secs), method, "shop.local", path).with_response(CapturedResponse::new(status)),
        )
    }

    fn run(matcher: &FlowMatcher, steps: &[FlowStep]) -> Vec<FlowMatch> {
        let mut progress = matcher.start();
        for s in steps {
            matcher.advance(&mut progress, s);
        }
        matcher.conclude(progress, Uuid::nil())
    }

    #[test]
    fn login_flow_with_noise_in_between() {
        let matcher = FlowMatcher::new(&FlowConfig::default());
        let flows = run(
            &matcher,
            &[
                step("1", 0, "GET", "/login", 200),
                step("2", 1, "GET", "/static/app.js", 200),
                step("3", 2, "POST", "/auth/login", 302),
                step("4", 3, "GET", "/dashboard?tab=home", 200),
            ],
        );
        assert_eq!(flows.len(), 1);
        let login = &flows[0];
        assert_eq!(login.name, "login");
        assert!(login.success);
        assert_eq!(login.expected_steps, 3);
        assert_eq!(
            login.steps.iter().map(|s| s.exchange_id.as_str()).collect::<Vec<_>>(),
            vec!["1", "3", "4"]
        );
        assert_eq!(login.duration_ms, 3_000);
    }

    #[test]
    fn failing_step_marks_flow_unsuccessful() {
        let matcher = FlowMatcher::new(&FlowConfig::default());
        let flows = run(
            &matcher,
            &[
                step("1", 0, "GET", "/cart", 200),
                step("2", 1, "GET", "/checkout", 200),
                step("3", 2, "POST", "/payment", 402),
                step("4", 3, "POST", "/order/confirm", 200),
            ],
        );
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].name, "checkout");
        assert!(!flows[0].success);
        assert_eq!(count_flows(&flows)["checkout"], FlowCount { detected: 1, successful: 0 });
    }

    #[test]
    fn partial_flows_need_the_match_ratio() {
        let matcher = FlowMatcher::new(&FlowConfig::default());
        // 3 of 4 crud steps clears 0.7, 2 of 3 login steps does not.
        let flows = run(
            &matcher,
            &[
                step("1", 0, "POST", "/api/notes", 201),
                step("2", 1, "GET", "/api/notes/7", 200),
                step("3", 2, "PUT", "/api/notes/7", 204),
                step("4", 3, "GET", "/login", 200),
                step("5", 4, "POST", "/auth/login", 200),
            ],
        );
        let names: Vec<&str> = flows.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["crud"]);
        assert!(flows[0].success);
    }

    #[test]
    fn paths_match_whole_and_sessions_need_two_exchanges() {
        let matcher = FlowMatcher::new(&FlowConfig {
            min_match_ratio: 0.5,
            patterns: vec![FlowPatternConfig {
                name: "export".into(),
                steps: vec![
                    FlowStepConfig { method: "post".into(), path: "/exports".into() },
                    FlowStepConfig { method: "GET".into(), path: r"/exports/\d+".into() },
                ],
            }],
        });
        assert!(run(&matcher, &[step("1", 0, "POST", "/exports", 202)]).is_empty());
        assert!(run(
            &matcher,
            &[step("1", 0, "POST", "/exports/all", 202), step("2", 1, "GET", "/exports/x", 200)]
        )
        .is_empty());
        assert_eq!(
            run(&matcher, &[step("1", 0, "POST", "/exports", 202), step("2", 1, "GET", "/other", 200)]).len(),
            1
        );
    }

    #[test]
    fn invalid_patterns_are_rejected_or_skipped() {
        let broken = FlowPatternConfig {
            name: "broken".into(),
            steps: vec![FlowStepConfig { method: "GET".into(), path: "(".into() }],
        };
        assert!(matches!(FlowPattern::compile(&broken), Err(ConfigError::InvalidPattern(_))));
        let matcher = FlowMatcher::new(&FlowConfig {
            min_match_ratio: 0.7,
            patterns: vec![broken],
        });
        assert!(matcher.start().matched.is_empty());
    }
}
