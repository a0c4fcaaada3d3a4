//! Analysis subsystem
//!
//! Folds captured exchanges into per-host reports, either as a closed batch
//! (`orchestrator`) or as a live stream (`streaming`).
//!
//! Components:
//! - `accumulator`: the per-host state every exchange is folded into.
//! - `headers`: common-header tallies and authentication detection.
//! - `rpc`: splits RPC exchanges into individual calls.
//! - `report`: output types and incremental deltas.
//! - `digest`: plain-text rendering of a report.

pub mod accumulator;
pub mod digest;
pub mod headers;
pub mod orchestrator;
pub mod report;
pub mod rpc;
pub mod streaming;

pub use accumulator::HostAccumulator;
pub use orchestrator::{analyze_batch, AnalysisOrchestrator, CancellationFlag};
pub use report::{AnalysisReport, AuthScheme, ReportDelta, RpcGroup};
pub use streaming::{SessionKey, StreamingAnalyzer, StreamingHandle};
