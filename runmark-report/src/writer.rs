//! Writers - Record Persistence Running Beside the Workload
//!
//! Each writer gets its own thread. The orchestrator talks to it through a
//! `WriterHandle`:
//!
//! ```text
//! orchestrator                         writer thread
//!   initialize(pid, handle) ── sync ──▶ (sink created or run aborted)
//!   spawn ───────────────────────────▶ start()
//!                                      [Live] persist(snapshot) every tick
//!   finish() ── Finish ──────────────▶ persist(final snapshot)
//!                                      close()
//!   ◀──────────────────── WriterReport
//! ```
//!
//! `close()` runs exactly once on every path out of the thread, including
//! after a failed `persist` or an aborted run.

use crate::handle::{RecordHandle, RecordSnapshot};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Failures raised by writers
#[derive(Debug, Error)]
pub enum WriterError {
    /// Filesystem operation on the sink failed
    #[error("{action} {}: {source}", .path.display())]
    Io {
        /// What was being done
        action: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Record could not be encoded
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// `persist` called before `initialize`
    #[error("writer used before initialize")]
    NotInitialized,

    /// Writer-specific failure
    #[error("{0}")]
    Sink(String),

    /// Writer thread died
    #[error("writer thread panicked")]
    Panicked,
}

/// When writers persist the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Once, after the record is complete
    #[default]
    OnCompletion,
    /// Periodically while the workload runs, plus once at completion
    Live {
        /// Time between snapshots
        every: Duration,
    },
}

/// A result sink driven by the orchestrator's lifecycle
pub trait Writer: Send {
    /// Short label for logs and reports
    fn kind(&self) -> &str;

    /// Bind to the workload and acquire the sink. Failure aborts the run.
    fn initialize(&mut self, pid: u32, record: RecordHandle) -> Result<(), WriterError>;

    /// Called on the writer thread before the first persist
    fn start(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    /// Write one snapshot of the record
    fn persist(&mut self, snapshot: &RecordSnapshot) -> Result<(), WriterError>;

    /// Release the sink. Must be idempotent.
    fn close(&mut self) -> Result<(), WriterError>;
}

enum WriterEvent {
    Finish,
    Abort,
}

/// What a writer thread did
#[derive(Debug)]
pub struct WriterReport {
    /// Writer label
    pub kind: String,
    /// Successful persists
    pub persisted: usize,
    /// Errors from start, persist or close
    pub failures: Vec<WriterError>,
}

/// A running writer
pub struct WriterHandle {
    kind: String,
    events: Sender<WriterEvent>,
    thread: JoinHandle<WriterReport>,
}

impl WriterHandle {
    /// Initialize `writer` on the calling thread, then start its thread.
    ///
    /// An `initialize` error is returned as-is and nothing is spawned.
    pub fn spawn(
        mut writer: Box<dyn Writer>,
        pid: u32,
        record: RecordHandle,
        mode: PersistMode,
    ) -> Result<Self, WriterError> {
        writer.initialize(pid, record.clone())?;

        let kind = writer.kind().to_string();
        let (events, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("runmark-writer-{}", kind))
            .spawn(move || drive(writer, record, mode, rx))
            .map_err(|source| WriterError::Io {
                action: "spawn writer thread for",
                path: PathBuf::from(&kind),
                source,
            })?;

        tracing::debug!(writer = %kind, pid, ?mode, "writer started");

        Ok(Self {
            kind,
            events,
            thread,
        })
    }

    /// Writer label
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Persist the completed record, close and join
    pub fn finish(self) -> WriterReport {
        self.stop(WriterEvent::Finish)
    }

    /// Close without a final persist, then join
    pub fn abort(self) -> WriterReport {
        self.stop(WriterEvent::Abort)
    }

    fn stop(self, event: WriterEvent) -> WriterReport {
        // A send error means the thread already exited; join still collects it.
        let _ = self.events.send(event);
        match self.thread.join() {
            Ok(report) => report,
            Err(_) => WriterReport {
                kind: self.kind,
                persisted: 0,
                failures: vec![WriterError::Panicked],
            },
        }
    }
}

fn drive(
    mut writer: Box<dyn Writer>,
    record: RecordHandle,
    mode: PersistMode,
    events: mpsc::Receiver<WriterEvent>,
) -> WriterReport {
    let mut report = WriterReport {
        kind: writer.kind().to_string(),
        persisted: 0,
        failures: Vec::new(),
    };

    let persist = |writer: &mut Box<dyn Writer>, report: &mut WriterReport| {
        match writer.persist(&record.snapshot()) {
            Ok(()) => report.persisted += 1,
            Err(e) => {
                tracing::warn!(writer = %report.kind, "persist failed: {}", e);
                report.failures.push(e);
            }
        }
    };

    match writer.start() {
        Ok(()) => loop {
            let event = match mode {
                PersistMode::OnCompletion => events.recv().ok(),
                PersistMode::Live { every } => match events.recv_timeout(every) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => {
                        persist(&mut writer, &mut report);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                },
            };

            if let Some(WriterEvent::Finish) = event {
                persist(&mut writer, &mut report);
            }
            break;
        },
        Err(e) => {
            tracing::warn!(writer = %report.kind, "start failed: {}", e);
            report.failures.push(e);
        }
    }

    if let Err(e) = writer.close() {
        tracing::warn!(writer = %report.kind, "close failed: {}", e);
        report.failures.push(e);
    }

    report
}

/// In-memory writer that keeps every snapshot it is given
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
}

/// Everything a `MemoryWriter` has seen
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    /// Pid passed to `initialize`
    pub pid: Option<u32>,
    /// Snapshots in persist order
    pub snapshots: Vec<RecordSnapshot>,
    /// Times `close` released the sink
    pub closes: usize,
    closed: bool,
}

impl MemoryWriter {
    /// Empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far
    pub fn state(&self) -> MemoryState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Writer for MemoryWriter {
    fn kind(&self) -> &str {
        "memory"
    }

    fn initialize(&mut self, pid: u32, _record: RecordHandle) -> Result<(), WriterError> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).pid = Some(pid);
        Ok(())
    }

    fn persist(&mut self, snapshot: &RecordSnapshot) -> Result<(), WriterError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.pid.is_none() {
            return Err(WriterError::NotInitialized);
        }
        state.snapshots.push(snapshot.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.closed {
            state.closed = true;
            state.closes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::RunPhase;
    use crate::record::{BenchmarkRecord, OrderedMap, WorkloadOutcome};

    fn handle() -> RecordHandle {
        RecordHandle::new(BenchmarkRecord::new("writer_test"))
    }

    /// Fails every persist; counts closes
    struct BrokenWriter {
        closes: Arc<Mutex<usize>>,
    }

    impl Writer for BrokenWriter {
        fn kind(&self) -> &str {
            "broken"
        }

        fn initialize(&mut self, _pid: u32, _record: RecordHandle) -> Result<(), WriterError> {
            Ok(())
        }

        fn persist(&mut self, _snapshot: &RecordSnapshot) -> Result<(), WriterError> {
            Err(WriterError::Sink("disk full".to_string()))
        }

        fn close(&mut self) -> Result<(), WriterError> {
            *self.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_on_completion_persists_final_record_once() {
        let record = handle();
        let memory = MemoryWriter::new();
        let writer = WriterHandle::spawn(
            Box::new(memory.clone()),
            99,
            record.clone(),
            PersistMode::OnCompletion,
        )
        .unwrap();
        assert_eq!(writer.kind(), "memory");

        record
            .set_elapsed(1.0, WorkloadOutcome::from_exit(Some(0), None))
            .unwrap();
        record.finalize(OrderedMap::new()).unwrap();

        let report = writer.finish();
        assert_eq!(report.persisted, 1);
        assert!(report.failures.is_empty());

        let state = memory.state();
        assert_eq!(state.pid, Some(99));
        assert_eq!(state.closes, 1);
        assert_eq!(state.snapshots.len(), 1);
        assert_eq!(state.snapshots[0].phase, RunPhase::Finished);
        assert!(state.snapshots[0].record.is_complete());
    }

    #[test]
    fn test_live_mode_persists_while_running() {
        let memory = MemoryWriter::new();
        let writer = WriterHandle::spawn(
            Box::new(memory.clone()),
            1,
            handle(),
            PersistMode::Live {
                every: Duration::from_millis(5),
            },
        )
        .unwrap();

        std::thread::sleep(Duration::from_millis(60));
        let report = writer.finish();
        assert!(report.persisted >= 2);
        assert_eq!(memory.state().closes, 1);
    }

    #[test]
    fn test_abort_closes_without_persisting() {
        let memory = MemoryWriter::new();
        let writer =
            WriterHandle::spawn(Box::new(memory.clone()), 1, handle(), PersistMode::OnCompletion)
                .unwrap();

        let report = writer.abort();
        assert_eq!(report.persisted, 0);
        let state = memory.state();
        assert!(state.snapshots.is_empty());
        assert_eq!(state.closes, 1);
    }

    #[test]
    fn test_close_runs_after_persist_failure() {
        let closes = Arc::new(Mutex::new(0));
        let writer = WriterHandle::spawn(
            Box::new(BrokenWriter {
                closes: Arc::clone(&closes),
            }),
            1,
            handle(),
            PersistMode::OnCompletion,
        )
        .unwrap();

        let report = writer.finish();
        assert_eq!(report.kind, "broken");
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], WriterError::Sink(_)));
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[test]
    fn test_memory_close_is_idempotent() {
        let mut memory = MemoryWriter::new();
        memory.initialize(1, handle()).unwrap();
        memory.close().unwrap();
        memory.close().unwrap();
        assert_eq!(memory.state().closes, 1);
    }

    #[test]
    fn test_persist_before_initialize_is_rejected() {
        let mut memory = MemoryWriter::new();
        assert!(matches!(
            memory.persist(&handle().snapshot()),
            Err(WriterError::NotInitialized)
        ));
    }
}
