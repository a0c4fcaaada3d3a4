//! Host-wide request header tallies and authentication detection.

use std::collections::{BTreeMap, BTreeSet};

use super::report::AuthScheme;
use crate::data_capture::CapturedExchange;

/// Headers never reported as common.
pub const EXCLUDED_HEADERS: [&str; 5] = ["host", "content-length", "connection", "cookie", "authorization"];

const API_KEY_QUERY_PARAMS: [&str; 3] = ["api_key", "apikey", "access_token"];

#[derive(Debug, Default)]
pub struct HeaderProfile {
    exchanges: u64,
    values: BTreeMap<String, BTreeMap<String, u64>>,
}

impl HeaderProfile {
    /// Counts each header name once per exchange, by its first value.
    pub fn observe(&mut self, exchange: &CapturedExchange) {
        self.exchanges += 1;
        let mut seen = BTreeSet::new();
        for (name, value) in exchange.headers.iter() {
            let name = name.to_ascii_lowercase();
            if EXCLUDED_HEADERS.contains(&name.as_str()) || !seen.insert(name.clone()) {
                continue;
            }
            *self
                .values
                .entry(name)
                .or_default()
                .entry(value.to_string())
                .or_insert(0) += 1;
        }
    }

    /// Headers whose most frequent value appears in at least `ratio` of all
    /// observed exchanges. Ties go to the smallest value.
    pub fn common(&self, ratio: f64) -> BTreeMap<String, String> {
        if self.exchanges == 0 {
            return BTreeMap::new();
        }
        let mut common = BTreeMap::new();
        for (name, counts) in &self.values {
            let best = counts
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));
            if let Some((value, count)) = best {
                if *count as f64 / self.exchanges as f64 >= ratio {
                    common.insert(name.clone(), value.clone());
                }
            }
        }
        common
    }
}

/// Authentication scheme carried by one exchange, if any.
pub fn detect_auth(exchange: &CapturedExchange, session_cookie_names: &[String]) -> Option<AuthScheme> {
    if let Some(value) = exchange.headers.get("Authorization") {
        let scheme = value.trim().split(' ').next().unwrap_or_default().to_ascii_lowercase();
        return Some(match scheme.as_str() {
            "bearer" => AuthScheme::Bearer,
            "basic" => AuthScheme::Basic,
            "digest" => AuthScheme::Digest,
            "oauth" => AuthScheme::OAuth,
            _ => AuthScheme::CustomToken,
        });
    }
    if exchange.headers.contains("X-API-Key") {
        return Some(AuthScheme::ApiKey);
    }
    if exchange.headers.contains("X-Auth-Token") {
        return Some(AuthScheme::CustomToken);
    }
    let names = exchange.query_param_names();
    if names
        .iter()
        .any(|n| API_KEY_QUERY_PARAMS.contains(&n.to_ascii_lowercase().as_str()))
    {
        return Some(AuthScheme::ApiKey);
    }
    let has_session_cookie = exchange
        .headers
        .get_all("Cookie")
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .any(|(name, _)| {
            let name = name.trim();
            session_cookie_names.iter().any(|c| c.eq_ignore_ascii_case(name))
                || name.to_ascii_lowercase().contains("session")
        });
    if has_session_cookie {
        return Some(AuthScheme::SessionCookie);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn exchange() -> CapturedExchange {
        CapturedExchange::new("1", Utc.timestamp_opt(0, 0).unwrap(), "GET", "h", "/")
    }

    #[test]
    fn common_headers_need_ratio() {
        let mut profile = HeaderProfile::default();
        for i in 0..10 {
            let agent = if i < 8 { "app/1.0" } else { "curl" };
            profile.observe(
                &exchange()
                    .with_header("User-Agent", agent)
                    .with_header("Host", "h")
                    .with_header("X-Request-Id", &i.to_string()),
            );
        }
        let common = profile.common(0.8);
        assert_eq!(common.get("user-agent").map(String::as_str), Some("app/1.0"));
        assert!(!common.contains_key("host"));
        assert!(!common.contains_key("x-request-id"));
        assert!(profile.common(0.9).is_empty());
    }

    #[test]
    fn auth_schemes() {
        let names = vec!["sid".to_string()];
        let cases = [
            (exchange().with_header("Authorization", "Bearer x"), Some(AuthScheme::Bearer)),
            (exchange().with_header("Authorization", "Basic dTpw"), Some(AuthScheme::Basic)),
            (exchange().with_header("Authorization", "Digest username=u"), Some(AuthScheme::Digest)),
            (exchange().with_header("Authorization", "OAuth oauth_token=t"), Some(AuthScheme::OAuth)),
            (exchange().with_header("X-API-Key", "k"), Some(AuthScheme::ApiKey)),
            (exchange().with_header("X-Auth-Token", "t"), Some(AuthScheme::CustomToken)),
            (exchange().with_query("api_key", "k"), Some(AuthScheme::ApiKey)),
            (exchange().with_header("Cookie", "sid=1"), Some(AuthScheme::SessionCookie)),
            (exchange(), None),
        ];
        for (ex, expected) in cases {
            assert_eq!(detect_auth(&ex, &names), expected);
        }
    }
}
