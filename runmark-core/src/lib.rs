#![warn(missing_docs)]
//! Runmark Core - Workload and Monitor Runtime
//!
//! This crate provides the pieces that run on either side of the process
//! boundary:
//! - `WorkloadDef` registry populated by `#[runmark::workload]`
//! - `Workload` description (registered function or external command)
//! - `WorkerMain`, the entry point of a re-executed workload process
//! - `Sampler` strategies (CPU, memory, GPU) and the polling `Monitor`
//! - `StopSignal` / `CancelToken` for bounded waits

mod monitor;
mod sampler;
mod signal;
mod worker;
mod workload;

pub use monitor::{
    DEFAULT_MAX_CONSECUTIVE_FAILURES, Monitor, MonitorFailure, MonitorHandle, MonitorOutcome,
    MonitorStatus,
};
pub use sampler::{
    CpuSampler, FnSampler, GpuSampler, MemorySampler, MonitorKind, Sample, SampleError, Sampler,
    sampler_fn,
};
pub use signal::{CancelToken, SignalState, StopSignal};
pub use worker::{EXIT_PANIC, EXIT_SETUP_FAILURE, WorkerMain, run_if_worker};
pub use workload::{CommandWorkload, Workload};

/// A zero-argument function registered via `#[runmark::workload]`
#[derive(Debug, Clone)]
pub struct WorkloadDef {
    /// Registry key, the function's name unless overridden
    pub name: &'static str,
    /// Module path of the function
    pub module_path: &'static str,
    /// Source file path
    pub file: &'static str,
    /// Source line number
    pub line: u32,
    /// Declared type metadata, e.g. `[("return", "Vec<u8>")]`
    pub annotations: &'static [(&'static str, &'static str)],
    /// Wrapper that calls the function and discards its result
    pub run: fn(),
}

inventory::collect!(WorkloadDef);

/// All workloads linked into this binary, sorted by name
pub fn registered_workloads() -> Vec<&'static WorkloadDef> {
    let mut defs: Vec<_> = inventory::iter::<WorkloadDef>.into_iter().collect();
    defs.sort_by_key(|def| def.name);
    defs
}

/// Look up a registered workload by name
pub fn find_workload(name: &str) -> Option<&'static WorkloadDef> {
    inventory::iter::<WorkloadDef>
        .into_iter()
        .find(|def| def.name == name)
}

/// Anchor to prevent LTO from stripping inventory entries
#[used]
#[doc(hidden)]
pub static REGISTRY_ANCHOR: fn() = || {
    for _ in inventory::iter::<WorkloadDef> {}
};
