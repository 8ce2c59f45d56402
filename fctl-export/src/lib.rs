//! fctl export — control plane client and concurrent export orchestration.
//!
//! - [`remote`] / [`http`] — the remote job seam and its HTTP implementation
//! - [`progress`] — shared progress board and its rendering
//! - [`machine`] — one environment's export state machine
//! - [`orchestrator`] — multi-environment fan-out and join
//! - [`postprocess`] — flatten, consolidate and seed state after an export-all

pub mod error;
pub mod http;
pub mod machine;
pub mod orchestrator;
pub mod postprocess;
pub mod progress;
pub mod remote;
mod runtime;

pub use error::{ExportError, RemoteJobError};
pub use http::HttpRemote;
pub use machine::{ExportMachine, ExportOutcome, ExportTarget};
pub use orchestrator::{
    export_all, export_one, BoardDisplay, EnvSummary, ExportAllRequest, ExportAllSummary,
};
pub use postprocess::PostProcessReport;
pub use progress::{BoardCounts, EnvProgress, ProgressBoard};
pub use remote::{Download, RemoteExport, RemoteJobApi};
pub use runtime::init_tracing;
