use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_capture::CapturedExchange;

/// Criteria for selecting exchanges from a repository; unset fields match all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFilter {
    pub host: Option<String>,
    /// Inclusive lower bound on the exchange timestamp.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the exchange timestamp.
    pub until: Option<DateTime<Utc>>,
}

impl ExchangeFilter {
    /// Exchanges addressed to `host` (case-insensitive).
    pub fn by_host<S: Into<String>>(host: S) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, exchange: &CapturedExchange) -> bool {
        if let Some(ref host) = self.host {
            if !exchange.host.eq_ignore_ascii_case(host) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if exchange.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if exchange.timestamp > until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filters_by_host_and_window() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let ex = CapturedExchange::new("1", t, "GET", "API.example.com", "/");
        assert!(ExchangeFilter::default().matches(&ex));
        assert!(ExchangeFilter::by_host("api.example.com").matches(&ex));
        assert!(!ExchangeFilter::by_host("other").matches(&ex));

        let window = ExchangeFilter {
            since: Some(t),
            until: Some(t),
            ..Default::default()
        };
        assert!(window.matches(&ex));
        let later = ExchangeFilter {
            since: Some(t + chrono::Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!later.matches(&ex));
    }
}
