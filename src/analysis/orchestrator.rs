//! Batch analysis: one deterministic fold per host.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use super::accumulator::HostAccumulator;
use super::report::AnalysisReport;
use crate::configuration::Config;
use crate::data_capture::CapturedExchange;
use crate::error_handling::types::AnalysisError;
use crate::storage::ExchangeRepository;

/// Shared flag checked between exchanges; once raised, batch runs stop early
/// and return a partial report.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sorts `exchanges` by (timestamp, id) and folds them into one report.
///
/// The result only depends on the set of exchanges, not on their order in the
/// input. When `cancel` is raised midway the report holds what was folded so
/// far and has `complete == false`.
pub fn analyze_batch(
    host: &str,
    mut exchanges: Vec<CapturedExchange>,
    config: &Config,
    cancel: Option<&CancellationFlag>,
) -> AnalysisReport {
    exchanges.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    let total = exchanges.len();
    let mut accumulator = HostAccumulator::start(host, config.clone());
    let mut complete = true;

    for exchange in &exchanges {
        if cancel.is_some_and(CancellationFlag::is_cancelled) {
            warn!(
                "analysis of {} cancelled after {}/{} exchange(s)",
                host,
                accumulator.exchange_count(),
                total
            );
            complete = false;
            break;
        }
        accumulator.ingest(exchange);
    }
    accumulator.finalize(complete)
}

/// Reads exchanges from a repository and analyzes them host by host.
///
/// # Fields Overview
///
/// - `repository`: the injected exchange source
/// - `config`: thresholds shared by every host
/// - `cancel`: raised to stop running analyses between exchanges
pub struct AnalysisOrchestrator {
    repository: Arc<dyn ExchangeRepository>,
    config: Arc<Config>,
    cancel: CancellationFlag,
}

impl AnalysisOrchestrator {
    pub fn new(repository: Arc<dyn ExchangeRepository>, config: Config) -> Self {
        Self {
            repository,
            config: Arc::new(config),
            cancel: CancellationFlag::new(),
        }
    }

    /// Handle for cancelling analyses started by this orchestrator.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hosts known to the repository.
    pub fn hosts(&self) -> Result<Vec<String>, AnalysisError> {
        self.repository.hosts().map_err(AnalysisError::InputUnavailable)
    }

    /// Analyzes every exchange of `host`.
    ///
    /// An unreachable repository is an error; a host without exchanges yields
    /// an empty, complete report.
    pub fn analyze_host(&self, host: &str) -> Result<AnalysisReport, AnalysisError> {
        let exchanges = self
            .repository
            .exchanges_for_host(host)
            .map_err(AnalysisError::InputUnavailable)?;
        if exchanges.is_empty() {
            debug!("no exchanges recorded for {}", host);
            return Ok(AnalysisReport::empty(host));
        }
        info!("analyzing {} exchange(s) for {}", exchanges.len(), host);
        Ok(analyze_batch(host, exchanges, &self.config, Some(&self.cancel)))
    }

    /// Analyzes several hosts, one blocking task per host. Reports come back
    /// in the order of `hosts`.
    pub async fn analyze_hosts(&self, hosts: &[String]) -> Result<Vec<AnalysisReport>, AnalysisError> {
        let mut tasks = JoinSet::new();
        for (index, host) in hosts.iter().enumerate() {
            let repository = Arc::clone(&self.repository);
            let config = Arc::clone(&self.config);
            let cancel = self.cancel.clone();
            let host = host.clone();
            tasks.spawn_blocking(move || {
                let worker = AnalysisOrchestrator {
                    repository,
                    config,
                    cancel,
                };
                (index, worker.analyze_host(&host))
            });
        }

        let mut reports: Vec<Option<AnalysisReport>> = vec![None; hosts.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| AnalysisError::TaskFailed(e.to_string()))?;
            reports[index] = Some(result?);
        }
        Ok(reports.into_iter().flatten().collect())
    }

    /// Analyzes every host in the repository.
    pub async fn analyze_all(&self) -> Result<Vec<AnalysisReport>, AnalysisError> {
        let hosts = self.hosts()?;
        info!("{} host(s) to analyze", hosts.len());
        self.analyze_hosts(&hosts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::RepositoryError;
    use crate::storage::InMemoryRepository;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn exchange(id: &str, secs: i64, host: &str, path: &str) -> CapturedExchange {
        CapturedExchange::new(id, at(secs), "GET", host, path).with_header("X-API-Key", "k")
    }

    #[test]
    fn batch_is_sorted_before_folding() {
        let shuffled = vec![
            exchange("3", 120, "a", "/items/3"),
            exchange("1", 0, "a", "/items/1"),
            exchange("2", 60, "a", "/items/2"),
        ];
        let report = analyze_batch("a", shuffled, &Config::default(), None);
        assert!(report.complete);
        assert_eq!(report.exchange_count, 3);
        assert_eq!(report.endpoints.len(), 1);
        assert_eq!(report.endpoints[0].template, "/items/{item_id}");
        assert_eq!(report.sessions[0].exchange_ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn cancelled_batch_is_partial() {
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let report = analyze_batch("a", vec![exchange("1", 0, "a", "/")], &Config::default(), Some(&cancel));
        assert!(!report.complete);
        assert_eq!(report.exchange_count, 0);
    }

    #[test]
    fn unavailable_repository_is_not_an_empty_report() {
        let repository = Arc::new(InMemoryRepository::default());
        let orchestrator = AnalysisOrchestrator::new(repository.clone(), Config::default());

        let report = orchestrator.analyze_host("a").unwrap();
        assert_eq!(report, AnalysisReport::empty("a"));

        repository.set_offline(true);
        let err = orchestrator.analyze_host("a").unwrap_err();
        assert!(matches!(err, AnalysisError::InputUnavailable(RepositoryError::Unavailable(_))));
    }

    #[test]
    fn host_names_are_reported_lowercase() {
        let report = analyze_batch(
            "API.Example",
            vec![exchange("1", 0, "api.example", "/x")],
            &Config::default(),
            None,
        );
        assert_eq!(report.host, "api.example");

        let repository = Arc::new(InMemoryRepository::new(vec![exchange("1", 0, "Api.Example", "/x")]));
        let orchestrator = AnalysisOrchestrator::new(repository, Config::default());
        let report = orchestrator.analyze_host("API.EXAMPLE").unwrap();
        assert_eq!(report.host, "api.example");
        assert_eq!(report.exchange_count, 1);
        assert_eq!(orchestrator.analyze_host("Quiet.Example").unwrap().host, "quiet.example");
    }

    #[tokio::test]
    async fn hosts_are_analyzed_independently() {
        let repository = Arc::new(InMemoryRepository::new(vec![
            exchange("1", 0, "b", "/x"),
            exchange("2", 0, "a", "/y"),
            exchange("3", 5, "a", "/y"),
        ]));
        let orchestrator = AnalysisOrchestrator::new(repository, Config::default());

        let reports = orchestrator.analyze_all().await.unwrap();
        let summary: Vec<(String, u64)> = reports.iter().map(|r| (r.host.clone(), r.exchange_count)).collect();
        assert_eq!(summary, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }
}
