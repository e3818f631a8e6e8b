//! Shared Record Handle
//!
//! The orchestrator owns the only mutable path into a run's
//! `BenchmarkRecord`. Writers running on their own threads get a
//! `RecordHandle` clone and read owned snapshots through it; they never see
//! the record mid-update.

use crate::record::{BenchmarkRecord, MonitorStatistics, OrderedMap, RecordError, WorkloadOutcome};
use runmark_core::{MonitorKind, Sample};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Where the run is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Record built, workload not spawned yet
    Pending,
    /// Workload running
    Running,
    /// Record complete
    Finished,
}

/// Point-in-time copy of the record plus live monitor readings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// The record as it stands
    #[serde(flatten)]
    pub record: BenchmarkRecord,
    /// Lifecycle phase when the copy was taken
    pub phase: RunPhase,
    /// Workload process id, once spawned
    pub pid: Option<u32>,
    /// Newest sample per monitor, attachment order; `null` = no data yet
    pub latest: OrderedMap<Option<Sample>>,
}

struct RecordState {
    record: BenchmarkRecord,
    phase: RunPhase,
    pid: Option<u32>,
    latest_cells: Vec<(MonitorKind, Arc<Mutex<Option<Sample>>>)>,
}

/// Cloneable proxy to one run's record
#[derive(Clone)]
pub struct RecordHandle {
    inner: Arc<RwLock<RecordState>>,
}

impl RecordHandle {
    /// Wrap a freshly built record
    pub fn new(record: BenchmarkRecord) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RecordState {
                record,
                phase: RunPhase::Pending,
                pid: None,
                latest_cells: Vec::new(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RecordState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RecordState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Set function identity; only before the run starts
    pub fn set_function(
        &self,
        name: impl Into<String>,
        annotations: OrderedMap<String>,
    ) -> Result<(), RecordError> {
        let mut state = self.write();
        if state.phase != RunPhase::Pending {
            return Err(RecordError::RunStarted);
        }
        state.record.set_function(name, annotations)
    }

    /// Workload spawned as `pid`
    pub fn mark_running(&self, pid: u32) {
        let mut state = self.write();
        state.phase = RunPhase::Running;
        state.pid = Some(pid);
    }

    /// Expose a monitor's latest-sample cell to snapshot readers
    pub fn attach_latest(&self, kind: MonitorKind, latest: Arc<Mutex<Option<Sample>>>) {
        self.write().latest_cells.push((kind, latest));
    }

    /// Fill elapsed time and workload outcome; write-once
    pub fn set_elapsed(&self, seconds: f64, outcome: WorkloadOutcome) -> Result<(), RecordError> {
        self.write().record.set_elapsed(seconds, outcome)
    }

    /// Fill monitor statistics and mark the record finished; write-once
    pub fn finalize(&self, statistics: OrderedMap<MonitorStatistics>) -> Result<(), RecordError> {
        let mut state = self.write();
        state.record.set_monitor_statistics(statistics)?;
        state.phase = RunPhase::Finished;
        Ok(())
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        self.read().phase
    }

    /// Owned copy of the record alone
    pub fn record(&self) -> BenchmarkRecord {
        self.read().record.clone()
    }

    /// Owned copy of the record, phase and live readings
    pub fn snapshot(&self) -> RecordSnapshot {
        let state = self.read();
        let latest = state
            .latest_cells
            .iter()
            .map(|(kind, cell)| {
                let sample = *cell.lock().unwrap_or_else(|e| e.into_inner());
                (kind.as_str().to_string(), sample)
            })
            .collect();

        RecordSnapshot {
            record: state.record.clone(),
            phase: state.phase,
            pid: state.pid,
            latest,
        }
    }
}

impl std::fmt::Debug for RecordHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("RecordHandle")
            .field("name", &state.record.name)
            .field("phase", &state.phase)
            .finish()
    }
}
