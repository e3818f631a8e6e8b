//! IPC Message Types

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Handshake sent by the worker before it runs anything
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerHello {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// Registered workload the worker resolved
    pub workload: String,
    /// OS process id of the worker (as seen from inside the child)
    pub pid: u32,
}

impl WorkerHello {
    /// Hello for the current process
    pub fn for_workload(workload: impl Into<String>) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            workload: workload.into(),
            pid: std::process::id(),
        }
    }
}

/// Messages sent from Worker to Orchestrator
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake
    Hello(WorkerHello),

    /// Workload function returned
    Complete {
        /// Time spent inside the workload function, in nanoseconds
        duration_nanos: u64,
    },

    /// Workload could not run or did not return
    Failure {
        /// Error category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
        /// Backtrace, when `RUST_BACKTRACE` captured one
        backtrace: Option<String>,
    },
}

/// Categories of worker-side failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// The workload panicked
    Panic,
    /// No workload with the requested name is registered in this binary
    NotFound,
    /// Worker environment was malformed
    Environment,
}

impl FailureKind {
    /// Stable lowercase label used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Panic => "panic",
            FailureKind::NotFound => "not-found",
            FailureKind::Environment => "environment",
        }
    }
}
