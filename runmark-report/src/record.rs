//! Benchmark Record Data Structures

use chrono::{DateTime, Local, Utc};
use runmark_core::{MonitorOutcome, MonitorStatus, Sample};
use runmark_stats::time_weighted_mean;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Format of `BenchmarkRecord::timestamp`
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Render a local time the way record timestamps are written
pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Violations of the record's write-once rules
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    /// A write-once field was written a second time
    #[error("record field `{0}` was already set")]
    AlreadySet(&'static str),

    /// Elapsed time must be a finite, non-negative number of seconds
    #[error("invalid elapsed time: {0}")]
    InvalidElapsed(f64),

    /// Identity fields are frozen once the workload is running
    #[error("record identity cannot change after the run started")]
    RunStarted,
}

/// String-keyed map that keeps insertion order, in memory and on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> OrderedMap<V> {
    /// Empty map
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace; a replaced key keeps its original position
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up by key
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map with string keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((k, v)) = access.next_entry::<String, V>()? {
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// Whether a monitor's entry can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsStatus {
    /// Sampled until the target exited
    Complete,
    /// Sampling failed or produced nothing
    Degraded,
}

/// Finalized statistics of one monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatistics {
    /// Unit of every value below
    pub unit: String,
    /// Complete, or degraded when sampling failed or produced nothing
    pub status: StatisticsStatus,
    /// Why the entry is degraded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Sampling interval
    pub interval_seconds: f64,
    /// Number of samples taken
    pub samples: usize,
    /// Smallest sample
    pub min: Option<f64>,
    /// Largest sample
    pub max: Option<f64>,
    /// Arithmetic mean of the samples
    pub mean: Option<f64>,
    /// Mean weighted by time between samples
    pub time_weighted_mean: Option<f64>,
    /// Median sample
    pub median: Option<f64>,
    /// Sample standard deviation
    pub std_dev: Option<f64>,
    /// 95th percentile
    pub p95: Option<f64>,
    /// Final sample
    pub last: Option<f64>,
    /// Full series, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<Sample>>,
}

impl MonitorStatistics {
    /// Summarize a joined monitor
    pub fn from_outcome(outcome: &MonitorOutcome, keep_series: bool) -> Self {
        let summary = outcome.stats();
        let points: Vec<(f64, f64)> = outcome.samples.iter().map(|s| (s.t_secs, s.value)).collect();

        let reason = match &outcome.status {
            MonitorStatus::Failed(failure) => Some(failure.to_string()),
            MonitorStatus::Cancelled => Some("monitor was cancelled".to_string()),
            MonitorStatus::Completed if outcome.samples.is_empty() => {
                Some("target exited before the first sample".to_string())
            }
            MonitorStatus::Completed => None,
        };

        Self {
            unit: outcome.kind.unit().to_string(),
            status: if outcome.is_degraded() {
                StatisticsStatus::Degraded
            } else {
                StatisticsStatus::Complete
            },
            reason,
            interval_seconds: outcome.interval.as_secs_f64(),
            samples: outcome.samples.len(),
            min: summary.as_ref().map(|s| s.min),
            max: summary.as_ref().map(|s| s.max),
            mean: summary.as_ref().map(|s| s.mean),
            time_weighted_mean: time_weighted_mean(&points),
            median: summary.as_ref().map(|s| s.median),
            std_dev: summary.as_ref().map(|s| s.std_dev),
            p95: summary.as_ref().map(|s| s.p95),
            last: summary.as_ref().map(|s| s.last),
            series: keep_series.then(|| outcome.samples.clone()),
        }
    }

    /// Whether the entry is marked degraded
    pub fn is_degraded(&self) -> bool {
        self.status == StatisticsStatus::Degraded
    }
}

/// How the workload process ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadOutcome {
    /// Exited with status 0 and reported no failure
    pub success: bool,
    /// Exit status, when the process exited normally
    pub exit_code: Option<i32>,
    /// Terminating signal, when killed by one
    pub signal: Option<i32>,
    /// Time spent inside a registered function, as measured by the worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_seconds: Option<f64>,
    /// Failure reported by the worker (e.g. panic message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkloadOutcome {
    /// Outcome from an exit status alone
    pub fn from_exit(exit_code: Option<i32>, signal: Option<i32>) -> Self {
        Self {
            success: exit_code == Some(0),
            exit_code,
            signal,
            worker_seconds: None,
            error: None,
        }
    }
}

/// The aggregate produced by one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// Record name, the workload's function name unless configured
    pub name: String,
    /// Local start time, `%Y%m%d_%H%M%S`
    pub timestamp: String,
    /// Start time in UTC
    pub started_at: DateTime<Utc>,
    /// Function or program that ran; set before the workload starts
    pub function_name: Option<String>,
    /// Declared metadata of the function; set with `function_name`
    pub function_annotations: Option<OrderedMap<String>>,
    /// Wall-clock seconds from start until the workload was reaped
    pub elapsed_seconds: Option<f64>,
    /// Per-monitor statistics in attachment order
    pub monitor_statistics: Option<OrderedMap<MonitorStatistics>>,
    /// How the workload process ended
    pub outcome: Option<WorkloadOutcome>,
}

impl BenchmarkRecord {
    /// New record stamped with the current time
    pub fn new(name: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            name: name.into(),
            timestamp: format_timestamp(&now),
            started_at: now.with_timezone(&Utc),
            function_name: None,
            function_annotations: None,
            elapsed_seconds: None,
            monitor_statistics: None,
            outcome: None,
        }
    }

    /// Set function identity; write-once
    pub fn set_function(
        &mut self,
        name: impl Into<String>,
        annotations: OrderedMap<String>,
    ) -> Result<(), RecordError> {
        if self.function_name.is_some() {
            return Err(RecordError::AlreadySet("function_name"));
        }
        self.function_name = Some(name.into());
        self.function_annotations = Some(annotations);
        Ok(())
    }

    /// Record how long the child ran and how it ended; write-once
    pub fn set_elapsed(
        &mut self,
        seconds: f64,
        outcome: WorkloadOutcome,
    ) -> Result<(), RecordError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(RecordError::InvalidElapsed(seconds));
        }
        if self.elapsed_seconds.is_some() {
            return Err(RecordError::AlreadySet("elapsed_seconds"));
        }
        self.elapsed_seconds = Some(seconds);
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Attach per-monitor statistics in attachment order; write-once
    pub fn set_monitor_statistics(
        &mut self,
        statistics: OrderedMap<MonitorStatistics>,
    ) -> Result<(), RecordError> {
        if self.monitor_statistics.is_some() {
            return Err(RecordError::AlreadySet("monitor_statistics"));
        }
        self.monitor_statistics = Some(statistics);
        Ok(())
    }

    /// Both post-run fields are filled
    pub fn is_complete(&self) -> bool {
        self.elapsed_seconds.is_some() && self.monitor_statistics.is_some()
    }

    /// Statistics entry for one monitor
    pub fn statistics(&self, monitor: &str) -> Option<&MonitorStatistics> {
        self.monitor_statistics.as_ref()?.get(monitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runmark_core::{MonitorFailure, MonitorKind};
    use std::time::Duration;

    fn outcome(samples: Vec<f64>, status: MonitorStatus) -> MonitorOutcome {
        MonitorOutcome {
            kind: MonitorKind::Memory,
            pid: 42,
            interval: Duration::from_millis(500),
            samples: samples
                .into_iter()
                .enumerate()
                .map(|(i, value)| Sample {
                    t_secs: i as f64 * 0.5,
                    value,
                })
                .collect(),
            status,
        }
    }

    #[test]
    fn test_timestamp_shape() {
        let record = BenchmarkRecord::new("train");
        assert_eq!(record.timestamp.len(), 15);
        assert_eq!(record.timestamp.as_bytes()[8], b'_');
        assert!(!record.is_complete());
    }

    #[test]
    fn test_post_run_fields_are_write_once() {
        let mut record = BenchmarkRecord::new("train");
        record
            .set_elapsed(1.5, WorkloadOutcome::from_exit(Some(0), None))
            .unwrap();
        assert_eq!(
            record.set_elapsed(2.0, WorkloadOutcome::from_exit(Some(0), None)),
            Err(RecordError::AlreadySet("elapsed_seconds"))
        );
        record.set_monitor_statistics(OrderedMap::new()).unwrap();
        assert!(record.set_monitor_statistics(OrderedMap::new()).is_err());
        assert_eq!(record.elapsed_seconds, Some(1.5));
        assert!(record.is_complete());
    }

    #[test]
    fn test_negative_elapsed_rejected() {
        let mut record = BenchmarkRecord::new("train");
        assert_eq!(
            record.set_elapsed(-0.1, WorkloadOutcome::from_exit(Some(0), None)),
            Err(RecordError::InvalidElapsed(-0.1))
        );
        assert!(record.elapsed_seconds.is_none());
    }

    #[test]
    fn test_ordered_map_keeps_insertion_order_through_json() {
        let map: OrderedMap<u32> = [("memory", 1), ("cpu", 2), ("gpu", 3)].into_iter().collect();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"memory":1,"cpu":2,"gpu":3}"#);

        let back: OrderedMap<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["memory", "cpu", "gpu"]);
    }

    #[test]
    fn test_statistics_from_completed_monitor() {
        let stats = MonitorStatistics::from_outcome(
            &outcome(vec![100.0, 300.0, 200.0], MonitorStatus::Completed),
            false,
        );
        assert_eq!(stats.status, StatisticsStatus::Complete);
        assert_eq!(stats.unit, "bytes");
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.max, Some(300.0));
        assert_eq!(stats.last, Some(200.0));
        assert!(stats.series.is_none());
        assert!(stats.reason.is_none());
    }

    #[test]
    fn test_empty_series_is_degraded() {
        let stats =
            MonitorStatistics::from_outcome(&outcome(vec![], MonitorStatus::Completed), true);
        assert!(stats.is_degraded());
        assert_eq!(stats.samples, 0);
        assert!(stats.mean.is_none());
        assert_eq!(stats.series, Some(vec![]));
    }

    #[test]
    fn test_failed_monitor_keeps_partial_series() {
        let failure = MonitorFailure {
            kind: MonitorKind::Memory,
            attempts: 3,
            last_error: "permission denied".to_string(),
        };
        let stats = MonitorStatistics::from_outcome(
            &outcome(vec![5.0], MonitorStatus::Failed(failure)),
            false,
        );
        assert!(stats.is_degraded());
        assert_eq!(stats.samples, 1);
        assert!(stats.reason.unwrap().contains("permission denied"));
    }
}
