//! Monitor - Polling Loop Around One Sampler
//!
//! A monitor is bound to the workload pid at attach time and polls its
//! sampler on a fixed schedule from a dedicated thread:
//!
//! ```text
//! t = 0        interval      2*interval           target exits
//!   │             │              │                     │
//!   sample ─wait─ sample ─wait─ sample ─ ... ─ wake ─ sample → ProcessGone → done
//! ```
//!
//! Ticks are scheduled against the start instant, so a slow sample does not
//! push every later tick back. The only normal stop condition is the sampler
//! reporting `ProcessGone`; the orchestrator's `StopSignal` merely cuts the
//! current wait short (target exited) or aborts the loop (cancelled).

use crate::sampler::{MonitorKind, Sample, SampleError, Sampler};
use crate::signal::{SignalState, StopSignal};
use runmark_stats::{SeriesSummary, summarize};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Consecutive non-`ProcessGone` failures tolerated before a monitor gives up
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Monitor aborted after exhausting its retry budget
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{kind} monitor failed after {attempts} consecutive attempts: {last_error}")]
pub struct MonitorFailure {
    /// Monitor that failed
    pub kind: MonitorKind,
    /// Consecutive failed attempts
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: String,
}

/// How a monitor's polling loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorStatus {
    /// Target exited; series is complete
    Completed,
    /// Sampling broke; series holds whatever was read before
    Failed(MonitorFailure),
    /// Run was aborted
    Cancelled,
}

/// Unstarted monitor, bound to one pid
pub struct Monitor {
    pid: u32,
    interval: Duration,
    max_failures: u32,
    sampler: Box<dyn Sampler>,
}

impl Monitor {
    /// Bind `sampler` to `pid`, polling every `interval`
    pub fn new(pid: u32, interval: Duration, sampler: Box<dyn Sampler>) -> Self {
        Self {
            pid,
            interval,
            max_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            sampler,
        }
    }

    /// Override the retry budget (minimum 1)
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    /// Statistic this monitor produces
    pub fn kind(&self) -> MonitorKind {
        self.sampler.kind()
    }

    /// Start polling on a dedicated thread
    pub fn start(self, signal: StopSignal) -> std::io::Result<MonitorHandle> {
        let kind = self.kind();
        let latest = Arc::new(Mutex::new(None));
        let thread = {
            let latest = Arc::clone(&latest);
            thread::Builder::new()
                .name(format!("runmark-monitor-{}", kind))
                .spawn(move || self.poll(&signal, &latest))?
        };

        Ok(MonitorHandle {
            kind,
            latest,
            thread,
        })
    }

    fn poll(mut self, signal: &StopSignal, latest: &Mutex<Option<Sample>>) -> MonitorOutcome {
        let kind = self.kind();
        let origin = Instant::now();
        let mut samples = Vec::new();
        let mut failures = 0u32;
        let mut tick = 0u32;

        tracing::debug!(%kind, pid = self.pid, interval = ?self.interval, "monitor started");

        let status = loop {
            // Once the target has exited, this tick is the last one.
            let final_tick = signal.state() == SignalState::TargetExited;

            match self.sampler.sample(self.pid) {
                Ok(value) => {
                    failures = 0;
                    let sample = Sample {
                        t_secs: origin.elapsed().as_secs_f64(),
                        value: value.max(0.0),
                    };
                    samples.push(sample);
                    *latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(sample);
                }
                Err(SampleError::ProcessGone { .. }) => break MonitorStatus::Completed,
                Err(SampleError::Unavailable(reason)) => {
                    failures += 1;
                    tracing::debug!(%kind, attempt = failures, %reason, "sample unavailable");
                    if failures >= self.max_failures {
                        break MonitorStatus::Failed(MonitorFailure {
                            kind: kind.clone(),
                            attempts: failures,
                            last_error: reason,
                        });
                    }
                }
            }

            if final_tick {
                break MonitorStatus::Completed;
            }

            tick += 1;
            let next = origin + self.interval * tick;
            if signal.wait_until(next) == SignalState::Cancelled {
                break MonitorStatus::Cancelled;
            }
        };

        match &status {
            MonitorStatus::Failed(failure) => tracing::warn!("{}", failure),
            _ => tracing::debug!(%kind, samples = samples.len(), "monitor stopped"),
        }

        MonitorOutcome {
            kind,
            pid: self.pid,
            interval: self.interval,
            samples,
            status,
        }
    }
}

/// A running monitor
pub struct MonitorHandle {
    kind: MonitorKind,
    latest: Arc<Mutex<Option<Sample>>>,
    thread: JoinHandle<MonitorOutcome>,
}

impl MonitorHandle {
    /// Statistic this monitor produces
    pub fn kind(&self) -> &MonitorKind {
        &self.kind
    }

    /// Most recent sample; `None` until the first successful poll
    pub fn latest(&self) -> Option<Sample> {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shared cell holding the most recent sample, for live readers
    pub fn latest_cell(&self) -> Arc<Mutex<Option<Sample>>> {
        Arc::clone(&self.latest)
    }

    /// Block until the polling loop has exited and take its series
    pub fn join(self) -> MonitorOutcome {
        let kind = self.kind;
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(_) => MonitorOutcome {
                kind: kind.clone(),
                pid: 0,
                interval: Duration::ZERO,
                samples: Vec::new(),
                status: MonitorStatus::Failed(MonitorFailure {
                    kind,
                    attempts: 0,
                    last_error: "monitor thread panicked".to_string(),
                }),
            },
        }
    }
}

/// Finished monitor: its complete series and how it ended
#[derive(Debug, Clone)]
pub struct MonitorOutcome {
    /// Statistic produced
    pub kind: MonitorKind,
    /// Observed process
    pub pid: u32,
    /// Polling period
    pub interval: Duration,
    /// Time-ordered series
    pub samples: Vec<Sample>,
    /// How the loop ended
    pub status: MonitorStatus,
}

impl MonitorOutcome {
    /// Summary of the series; `None` when nothing was sampled
    pub fn stats(&self) -> Option<SeriesSummary> {
        let values: Vec<f64> = self.samples.iter().map(|s| s.value).collect();
        summarize(&values)
    }

    /// Failed, or completed without a single sample
    pub fn is_degraded(&self) -> bool {
        !matches!(self.status, MonitorStatus::Completed) || self.samples.is_empty()
    }

    /// The failure, if the monitor gave up
    pub fn failure(&self) -> Option<&MonitorFailure> {
        match &self.status {
            MonitorStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::sampler_fn;
    use std::collections::VecDeque;

    /// Replays a fixed script, then reports the process gone
    fn scripted(
        script: Vec<Result<f64, SampleError>>,
    ) -> Box<dyn Sampler> {
        let mut script: VecDeque<_> = script.into();
        Box::new(sampler_fn("scripted", move |pid| {
            script
                .pop_front()
                .unwrap_or(Err(SampleError::ProcessGone { pid }))
        }))
    }

    fn unavailable() -> Result<f64, SampleError> {
        Err(SampleError::Unavailable("counter busy".to_string()))
    }

    #[test]
    fn test_process_gone_completes_series() {
        let monitor = Monitor::new(1, Duration::from_millis(1), scripted(vec![Ok(1.0), Ok(3.0)]));
        let outcome = monitor.start(StopSignal::new()).unwrap().join();

        assert_eq!(outcome.status, MonitorStatus::Completed);
        assert_eq!(outcome.samples.len(), 2);
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.stats().unwrap().max, 3.0);
    }

    #[test]
    fn test_timestamps_are_non_decreasing() {
        let script = (0..20).map(|i| Ok(i as f64)).collect();
        let outcome = Monitor::new(1, Duration::from_millis(1), scripted(script))
            .start(StopSignal::new())
            .unwrap()
            .join();

        assert_eq!(outcome.samples.len(), 20);
        assert!(outcome.samples.windows(2).all(|w| w[0].t_secs <= w[1].t_secs));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let script = vec![Ok(1.0), unavailable(), unavailable(), Ok(2.0)];
        let outcome = Monitor::new(1, Duration::from_millis(1), scripted(script))
            .start(StopSignal::new())
            .unwrap()
            .join();

        assert_eq!(outcome.status, MonitorStatus::Completed);
        assert_eq!(outcome.samples.len(), 2);
    }

    #[test]
    fn test_exhausted_retries_mark_monitor_failed() {
        let script = vec![Ok(5.0), unavailable(), unavailable(), unavailable(), Ok(9.0)];
        let outcome = Monitor::new(1, Duration::from_millis(1), scripted(script))
            .start(StopSignal::new())
            .unwrap()
            .join();

        let failure = outcome.failure().expect("monitor should fail");
        assert_eq!(failure.attempts, DEFAULT_MAX_CONSECUTIVE_FAILURES);
        assert_eq!(outcome.samples.len(), 1);
        assert!(outcome.is_degraded());
    }

    #[test]
    fn test_negative_readings_are_clamped() {
        let outcome = Monitor::new(1, Duration::from_millis(1), scripted(vec![Ok(-4.0)]))
            .start(StopSignal::new())
            .unwrap()
            .join();
        assert_eq!(outcome.samples[0].value, 0.0);
    }

    #[test]
    fn test_cancel_stops_endless_sampler() {
        let sampler = Box::new(sampler_fn("forever", |_| Ok(1.0)));
        let signal = StopSignal::new();
        let handle = Monitor::new(1, Duration::from_secs(60), sampler)
            .start(signal.clone())
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.latest().map(|s| s.value), Some(1.0));
        signal.cancel();

        let outcome = handle.join();
        assert_eq!(outcome.status, MonitorStatus::Cancelled);
        assert_eq!(outcome.samples.len(), 1);
    }

    #[test]
    fn test_target_exit_takes_one_final_sample() {
        let sampler = Box::new(sampler_fn("never_gone", |_| Ok(2.0)));
        let signal = StopSignal::new();
        let handle = Monitor::new(1, Duration::from_secs(60), sampler)
            .start(signal.clone())
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        signal.notify_target_exited();

        let outcome = handle.join();
        assert_eq!(outcome.status, MonitorStatus::Completed);
        assert_eq!(outcome.samples.len(), 2);
    }

    #[test]
    fn test_latest_is_empty_before_first_sample() {
        let sampler = Box::new(sampler_fn("slow", |pid| {
            std::thread::sleep(Duration::from_millis(50));
            Err(SampleError::ProcessGone { pid })
        }));
        let handle = Monitor::new(1, Duration::from_millis(10), sampler)
            .start(StopSignal::new())
            .unwrap();

        assert!(handle.latest().is_none());
        let outcome = handle.join();
        assert!(outcome.samples.is_empty());
        assert!(outcome.stats().is_none());
        assert!(outcome.is_degraded());
    }
}
