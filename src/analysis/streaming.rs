//! Streaming analysis.
//!
//! Exchanges arrive on an mpsc channel and are folded into per-host
//! accumulators by a single task, so every accumulator has exactly one writer.
//! Deltas go out on a second channel after each update. Sessions left idle for
//! the configured threshold are closed by [`IdleTimers`] without waiting for
//! further traffic.

use log::{debug, info, warn};
use std::collections::BTreeMap;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

use super::accumulator::HostAccumulator;
use super::report::{AnalysisReport, ReportDelta};
use crate::configuration::Config;
use crate::data_capture::CapturedExchange;
use crate::error_handling::types::AnalysisError;
use crate::session_management::idle_timer::{IdleExpiry, IdleTimers};

/// Exchanges buffered between producers and the analysis task.
pub const EXCHANGE_CHANNEL_CAPACITY: usize = 100;

/// Idle timers are kept per host and identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host: String,
    pub identity: String,
}

/// The analysis loop, driven by [`StreamingAnalyzer::run`].
///
/// # Fields Overview
///
/// - `hosts`: one accumulator per host, created on first sight
/// - `timers`: idle countdowns of open sessions
/// - `deltas`: output channel; the loop keeps going when it is dropped
pub struct StreamingAnalyzer {
    config: Config,
    hosts: BTreeMap<String, HostAccumulator>,
    timers: IdleTimers<SessionKey>,
    expiries: Receiver<IdleExpiry<SessionKey>>,
    deltas: Sender<ReportDelta>,
    deltas_open: bool,
}

impl StreamingAnalyzer {
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, deltas: Sender<ReportDelta>) -> Self {
        let (timers, expiries) = IdleTimers::new(config.sessions.idle_timeout());
        Self {
            config,
            hosts: BTreeMap::new(),
            timers,
            expiries,
            deltas,
            deltas_open: true,
        }
    }

    async fn publish(&mut self, deltas: Vec<ReportDelta>) {
        if !self.deltas_open {
            return;
        }
        for delta in deltas {
            if self.deltas.send(delta).await.is_err() {
                warn!("delta consumer went away, continuing without live updates");
                self.deltas_open = false;
                return;
            }
        }
    }

    /// Folds one exchange and re-arms its session's idle timer.
    pub async fn ingest(&mut self, exchange: CapturedExchange) {
        let host = exchange.host.to_ascii_lowercase();
        let config = &self.config;
        let accumulator = self
            .hosts
            .entry(host.clone())
            .or_insert_with(|| HostAccumulator::start(&host, config.clone()));
        let (identity, deltas) = accumulator.ingest_tracked(&exchange);
        self.timers.arm(SessionKey {
            host,
            identity: identity.key,
        });
        self.publish(deltas).await;
    }

    async fn expire(&mut self, expiry: IdleExpiry<SessionKey>) {
        if !self.timers.is_current(&expiry) {
            debug!("stale idle expiry for {:?}", expiry.key);
            return;
        }
        self.timers.disarm(&expiry.key);
        let closed = self
            .hosts
            .get_mut(&expiry.key.host)
            .map(|acc| acc.close_session(&expiry.key.identity))
            .unwrap_or_default();
        if !closed.is_empty() {
            debug!("idle session of {} on {} closed", expiry.key.identity, expiry.key.host);
            self.publish(closed).await;
        }
    }

    /// Runs until `exchanges` is closed, then closes every session and returns
    /// one report per host, sorted by host.
    pub async fn run(mut self, mut exchanges: Receiver<CapturedExchange>) -> Vec<AnalysisReport> {
        info!("streaming analysis started");
        loop {
            tokio::select! {
                received = exchanges.recv() => match received {
                    Some(exchange) => self.ingest(exchange).await,
                    None => break,
                },
                Some(expiry) = self.expiries.recv() => self.expire(expiry).await,
            }
        }
        self.finish()
    }

    fn finish(mut self) -> Vec<AnalysisReport> {
        self.timers.shutdown();
        let reports: Vec<AnalysisReport> = std::mem::take(&mut self.hosts)
            .into_values()
            .map(|acc| acc.finalize(true))
            .collect();
        info!("streaming analysis finished with {} host(s)", reports.len());
        reports
    }
}

/// Producer side of a running streaming analysis.
pub struct StreamingHandle {
    sender: Sender<CapturedExchange>,
    join: JoinHandle<Vec<AnalysisReport>>,
}

impl StreamingHandle {
    /// Spawns the analysis task; deltas are delivered on the returned receiver.
    pub fn spawn(config: Config) -> (Self, Receiver<ReportDelta>) {
        let (sender, exchanges) = mpsc::channel(EXCHANGE_CHANNEL_CAPACITY);
        let (delta_tx, delta_rx) = mpsc::channel(EXCHANGE_CHANNEL_CAPACITY);
        let join = tokio::spawn(async move {
            let analyzer = StreamingAnalyzer::new(config, delta_tx);
            analyzer.run(exchanges).await
        });
        (Self { sender, join }, delta_rx)
    }

    pub async fn submit(&self, exchange: CapturedExchange) -> Result<(), AnalysisError> {
        self.sender
            .send(exchange)
            .await
            .map_err(|_| AnalysisError::ChannelClosed)
    }

    /// A clonable sender for additional producers.
    pub fn sender(&self) -> Sender<CapturedExchange> {
        self.sender.clone()
    }

    /// Closes the input, waits for the remaining exchanges to be folded and
    /// returns the final reports.
    pub async fn shutdown(self) -> Result<Vec<AnalysisReport>, AnalysisError> {
        drop(self.sender);
        self.join
            .await
            .map_err(|e| AnalysisError::TaskFailed(e.to_string()))
    }
}
