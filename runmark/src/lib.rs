#![warn(missing_docs)]
//! # Runmark
//!
//! Run a workload as a child process, sample its resource usage while it
//! runs, and hand back one record describing the run.
//!
//! - **Process isolation**: every workload runs in its own process; a panic or
//!   crash ends up in the record instead of taking the harness down
//! - **Monitors**: CPU, resident memory and GPU memory samplers poll the child
//!   on a fixed interval, each on its own thread
//! - **Writers**: JSON files (atomic replace), terminal progress, or your own
//!   sink, persisted once at completion or live while the workload runs
//! - **Records**: name, timestamp, function metadata, wall-clock elapsed time
//!   and per-monitor statistics
//!
//! ## Quick Start
//!
//! ```ignore
//! use runmark::prelude::*;
//!
//! #[workload]
//! fn train_epoch() -> f64 {
//!     model.train(&data)
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     runmark::run()
//! }
//! ```
//!
//! ## External Commands
//!
//! ```ignore
//! let report = runmark::run_under_benchmark(
//!     CommandWorkload::new("sleep").arg("2"),
//!     OrchestratorConfig::new()
//!         .with_interval(Duration::from_millis(500))
//!         .with_monitor(MonitorSpec::cpu())
//!         .with_writer(WriterSpec::json("target/runmark")),
//! )?;
//! println!("{:.2}s", report.record.elapsed_seconds.unwrap_or_default());
//! ```

// Re-export core types
pub use runmark_core::{
    CancelToken, CommandWorkload, CpuSampler, EXIT_PANIC, EXIT_SETUP_FAILURE, FnSampler,
    GpuSampler, MemorySampler, Monitor, MonitorFailure, MonitorHandle, MonitorKind,
    MonitorOutcome, MonitorStatus, Sample, SampleError, Sampler, StopSignal, Workload,
    WorkloadDef, find_workload, registered_workloads, run_if_worker, sampler_fn,
};

// Re-export the macro
pub use runmark_macros::workload;

// Re-export records and writers
pub use runmark_report::{
    BenchmarkRecord, JsonWriter, MemoryWriter, MonitorStatistics, OrderedMap, OutputFormat,
    PersistMode, RecordError, RecordHandle, RecordSnapshot, RunPhase, StatisticsStatus, Writer,
    WriterError, WriterReport, WorkloadOutcome, format_human_output, generate_json_report,
    parse_json_report,
};

// Re-export the orchestrator
pub use runmark_cli::{
    BenchmarkExecutionError, MonitorSpec, Orchestrator, OrchestratorConfig, RunReport,
    WriterSpec, run_under_benchmark,
};

// Re-export stats
pub use runmark_stats::{SeriesSummary, summarize, time_weighted_mean};

/// Internal re-exports for macro use
#[doc(hidden)]
pub mod internal {
    pub use inventory;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BenchmarkRecord, CommandWorkload, MonitorKind, MonitorSpec, OrchestratorConfig,
        PersistMode, Workload, WriterSpec, run_under_benchmark, workload,
    };
}

/// Run the Runmark CLI harness.
///
/// Call this from your binary's `main()`; it also serves as the entry point
/// of re-executed workload processes:
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     runmark::run()
/// }
/// ```
pub fn run() -> anyhow::Result<()> {
    runmark_cli::run()
}
