//! Worker Process Entry Point
//!
//! A registered workload runs in a re-executed copy of the current binary.
//! The orchestrator sets `RUNMARK_WORKLOAD` to the workload name and
//! `RUNMARK_IPC_FD` to the inherited write end of the message pipe. The
//! worker announces itself, runs the function once and reports how it ended:
//!
//! ```text
//! worker                      orchestrator
//!   │── Hello{pid, name} ───────▶│
//!   │   (run workload)           │  monitors sample the pid
//!   │── Complete | Failure ─────▶│
//!   ╳ exit                       │  reap
//! ```
//!
//! On non-Unix there is no fd inheritance; reports go nowhere and the exit
//! status alone carries the outcome.

use crate::find_workload;
use runmark_ipc::{FailureKind, FrameWriter, IPC_FD_ENV, WORKLOAD_ENV, WorkerHello, WorkerMessage};
use std::io::Write;
use std::time::Instant;

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Exit status of a worker whose workload could not be found or started
pub const EXIT_SETUP_FAILURE: i32 = 2;

/// Exit status of a worker whose workload panicked
pub const EXIT_PANIC: i32 = 101;

/// Run as a worker and exit if this process is one; otherwise return.
///
/// Call this first thing in `main` of any binary that registers workloads.
pub fn run_if_worker() {
    if let Some(worker) = WorkerMain::from_env() {
        std::process::exit(worker.run());
    }
}

fn open_report_pipe() -> Box<dyn Write> {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        match val.parse::<i32>() {
            // SAFETY: the orchestrator dup2'd the pipe to this fd before exec
            // and nothing else in this process owns it.
            Ok(fd) if fd > 2 => return Box::new(unsafe { std::fs::File::from_raw_fd(fd) }),
            _ => eprintln!("runmark: warning: invalid {IPC_FD_ENV}={val:?}, reports disabled"),
        }
    }
    Box::new(std::io::sink())
}

/// Worker side of a registered-workload run
pub struct WorkerMain {
    workload: String,
    writer: FrameWriter<Box<dyn Write>>,
}

impl WorkerMain {
    /// Build from the environment; `None` outside a worker process
    pub fn from_env() -> Option<Self> {
        let workload = std::env::var(WORKLOAD_ENV).ok()?;
        Some(Self::with_writer(workload, open_report_pipe()))
    }

    /// Worker for `workload` reporting into `sink`
    pub fn with_writer(workload: impl Into<String>, sink: Box<dyn Write>) -> Self {
        Self {
            workload: workload.into(),
            writer: FrameWriter::new(sink),
        }
    }

    fn report(&mut self, message: &WorkerMessage) {
        // A closed pipe means the orchestrator is gone; keep going so the
        // exit status still reflects the workload.
        if let Err(e) = self.writer.send(message) {
            eprintln!("runmark: worker report failed: {e}");
        }
    }

    /// Run the workload once and return the process exit code
    pub fn run(mut self) -> i32 {
        self.report(&WorkerMessage::Hello(WorkerHello::for_workload(
            self.workload.clone(),
        )));

        let Some(def) = find_workload(&self.workload) else {
            let message = format!("workload not found: {}", self.workload);
            eprintln!("runmark: {message}");
            self.report(&WorkerMessage::Failure {
                kind: FailureKind::NotFound,
                message,
                backtrace: None,
            });
            return EXIT_SETUP_FAILURE;
        };

        let start = Instant::now();
        let result = std::panic::catch_unwind(def.run);
        let duration_nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;

        match result {
            Ok(()) => {
                self.report(&WorkerMessage::Complete { duration_nanos });
                0
            }
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };

                let backtrace = std::backtrace::Backtrace::capture();
                let backtrace = match backtrace.status() {
                    std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
                    _ => None,
                };

                self.report(&WorkerMessage::Failure {
                    kind: FailureKind::Panic,
                    message,
                    backtrace,
                });
                EXIT_PANIC
            }
        }
    }
}
