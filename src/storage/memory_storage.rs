use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::data_capture::CapturedExchange;
use crate::error_handling::types::RepositoryError;
use crate::storage::storage_trait::ExchangeRepository;
use crate::storage::types::ExchangeFilter;

/// Exchanges held in memory; can be switched offline to exercise
/// unavailability handling.
#[derive(Default)]
pub struct InMemoryRepository {
    exchanges: RwLock<Vec<CapturedExchange>>,
    offline: AtomicBool,
}

impl InMemoryRepository {
    pub fn new(exchanges: Vec<CapturedExchange>) -> Self {
        Self {
            exchanges: RwLock::new(exchanges),
            offline: AtomicBool::new(false),
        }
    }

    pub fn push(&self, exchange: CapturedExchange) -> Result<(), RepositoryError> {
        self.exchanges
            .write()
            .map_err(|_| RepositoryError::Unavailable("repository lock poisoned".to_string()))?
            .push(exchange);
        Ok(())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Result<Vec<CapturedExchange>, RepositoryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("repository offline".to_string()));
        }
        self.exchanges
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| RepositoryError::Unavailable("repository lock poisoned".to_string()))
    }
}

impl ExchangeRepository for InMemoryRepository {
    fn hosts(&self) -> Result<Vec<String>, RepositoryError> {
        let hosts: BTreeSet<String> = self
            .snapshot()?
            .into_iter()
            .map(|e| e.host.to_ascii_lowercase())
            .collect();
        Ok(hosts.into_iter().collect())
    }

    fn exchanges(&self, filter: Option<ExchangeFilter>) -> Result<Vec<CapturedExchange>, RepositoryError> {
        let mut exchanges = self.snapshot()?;
        if let Some(f) = filter {
            exchanges.retain(|e| f.matches(e));
        }
        Ok(exchanges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_offline_is_unavailable() {
        let repo = InMemoryRepository::default();
        repo.push(CapturedExchange::new("1", Utc.timestamp_opt(0, 0).unwrap(), "GET", "h", "/")).unwrap();
        assert_eq!(repo.exchanges_for_host("h").unwrap().len(), 1);
        repo.set_offline(true);
        assert!(matches!(repo.hosts(), Err(RepositoryError::Unavailable(_))));
    }
}
