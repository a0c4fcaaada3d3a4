//! Client identity derivation.
//!
//! Priority: session cookie, bearer token, `X-API-Key`, capture-supplied hint,
//! client address plus User-Agent, and finally a singleton keyed by the
//! exchange id. Secrets only ever appear as fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::data_capture::CapturedExchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    SessionCookie,
    BearerToken,
    ApiKey,
    ClientHint,
    ClientAddress,
    Singleton,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub key: String,
    pub source: IdentitySource,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// First 16 hex chars of the SHA-256 of `secret`.
pub fn fingerprint(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(16);
    encoded
}

fn is_session_cookie(name: &str, configured: &[String]) -> bool {
    configured.iter().any(|c| c.eq_ignore_ascii_case(name))
        || name.to_ascii_lowercase().contains("session")
}

/// `(name, value)` of the first identifying cookie across all Cookie headers.
fn session_cookie<'a>(exchange: &'a CapturedExchange, configured: &[String]) -> Option<(&'a str, &'a str)> {
    exchange
        .headers
        .get_all("Cookie")
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.trim(), value.trim()))
        .find(|(name, value)| !value.is_empty() && is_session_cookie(name, configured))
}

fn bearer_token(exchange: &CapturedExchange) -> Option<&str> {
    let value = exchange.headers.get("Authorization")?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Identity of the client that sent `exchange`.
pub fn derive_identity(exchange: &CapturedExchange, session_cookie_names: &[String]) -> Identity {
    if let Some((name, value)) = session_cookie(exchange, session_cookie_names) {
        return Identity {
            key: format!("cookie:{}:{}", name.to_ascii_lowercase(), fingerprint(value)),
            source: IdentitySource::SessionCookie,
        };
    }
    if let Some(token) = bearer_token(exchange) {
        return Identity {
            key: format!("bearer:{}", fingerprint(token)),
            source: IdentitySource::BearerToken,
        };
    }
    if let Some(api_key) = exchange.headers.get("X-API-Key").map(str::trim).filter(|k| !k.is_empty()) {
        return Identity {
            key: format!("api_key:{}", fingerprint(api_key)),
            source: IdentitySource::ApiKey,
        };
    }
    if let Some(hint) = exchange.client_hint.as_deref().filter(|h| !h.is_empty()) {
        return Identity {
            key: format!("hint:{}", hint),
            source: IdentitySource::ClientHint,
        };
    }
    if let Some(addr) = exchange.client_addr {
        let agent = exchange.headers.get("User-Agent").unwrap_or_default();
        return Identity {
            key: format!("client:{}:{}", addr, fingerprint(agent)),
            source: IdentitySource::ClientAddress,
        };
    }
    Identity {
        key: format!("exchange:{}", exchange.id),
        source: IdentitySource::Singleton,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::net::{IpAddr, Ipv4Addr};

    fn exchange() -> CapturedExchange {
        CapturedExchange::new("e1", Utc.timestamp_opt(1_700_000_000, 0).unwrap(), "GET", "h", "/")
    }

    fn names() -> Vec<String> {
        vec!["sid".to_string()]
    }

    #[test]
    fn fingerprints_are_short_and_stable() {
        let fp = fingerprint("secret");
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, "2bb80d537b1da3e3");
        assert_eq!(fp, fingerprint("secret"));
    }

    #[test]
    fn cookie_beats_bearer() {
        let ex = exchange()
            .with_header("Cookie", "theme=dark; sid=abc123")
            .with_header("Authorization", "Bearer tok");
        let identity = derive_identity(&ex, &names());
        assert_eq!(identity.source, IdentitySource::SessionCookie);
        assert_eq!(identity.key, format!("cookie:sid:{}", fingerprint("abc123")));
        assert!(!identity.key.contains("abc123"));
    }

    #[test]
    fn unconfigured_session_cookie_names_match() {
        let ex = exchange().with_header("Cookie", "MY_SESSION_ID=zzz");
        assert_eq!(derive_identity(&ex, &names()).source, IdentitySource::SessionCookie);
        let ex = exchange().with_header("Cookie", "theme=dark");
        assert_eq!(derive_identity(&ex, &names()).source, IdentitySource::Singleton);
    }

    #[test]
    fn falls_through_priorities() {
        let ex = exchange().with_header("Authorization", "bearer tok");
        assert_eq!(derive_identity(&ex, &names()).source, IdentitySource::BearerToken);

        let ex = exchange().with_header("Authorization", "Basic dTpw").with_header("X-API-Key", "k1");
        assert_eq!(derive_identity(&ex, &names()).source, IdentitySource::ApiKey);

        let mut ex = exchange();
        ex.client_hint = Some("device-7".into());
        assert_eq!(derive_identity(&ex, &names()).key, "hint:device-7");

        let ex = exchange()
            .with_client_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .with_header("User-Agent", "curl/8");
        let identity = derive_identity(&ex, &names());
        assert_eq!(identity.source, IdentitySource::ClientAddress);
        assert!(identity.key.starts_with("client:10.0.0.1:"));

        assert_eq!(derive_identity(&exchange(), &names()).key, "exchange:e1");
    }
}
