//! Terminal Progress Writer
//!
//! A writer that renders a spinner on stderr while a workload runs. Each
//! persisted snapshot replaces the message with the newest monitor readings,
//! so the spinner always persists live, whatever mode the other writers use.

use crate::orchestrator::WriterSpec;
use indicatif::{ProgressBar, ProgressStyle};
use runmark_core::MonitorKind;
use runmark_report::{
    PersistMode, RecordHandle, RecordSnapshot, RunPhase, Writer, WriterError, format_value,
};
use std::time::Duration;

/// How often the spinner message is refreshed
pub const PROGRESS_REFRESH: Duration = Duration::from_millis(250);

/// Spinner showing live monitor values
#[derive(Default)]
pub struct ProgressWriter {
    bar: Option<ProgressBar>,
    label: String,
}

impl ProgressWriter {
    /// Spinner without a bar yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer spec that refreshes the spinner every `PROGRESS_REFRESH`
    pub fn spec() -> WriterSpec {
        WriterSpec::new("progress", || Box::new(ProgressWriter::new())).with_persist(
            PersistMode::Live {
                every: PROGRESS_REFRESH,
            },
        )
    }
}

/// One-line summary of the newest readings
pub fn progress_message(label: &str, snapshot: &RecordSnapshot) -> String {
    let readings: Vec<String> = snapshot
        .latest
        .iter()
        .map(|(monitor, sample)| match sample {
            Some(sample) => {
                let unit = MonitorKind::from(monitor).unit();
                format!("{}: {}", monitor, format_value(sample.value, unit))
            }
            None => format!("{}: -", monitor),
        })
        .collect();

    match snapshot.phase {
        RunPhase::Finished => format!("{} done", label),
        _ if readings.is_empty() => label.to_string(),
        _ => format!("{}  {}", label, readings.join("  ")),
    }
}

impl Writer for ProgressWriter {
    fn kind(&self) -> &str {
        "progress"
    }

    fn initialize(&mut self, pid: u32, record: RecordHandle) -> Result<(), WriterError> {
        let record = record.record();
        self.label = format!("{} (pid {})", record.name, pid);

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(self.label.clone());
        self.bar = Some(bar);
        Ok(())
    }

    fn start(&mut self) -> Result<(), WriterError> {
        if let Some(bar) = &self.bar {
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        Ok(())
    }

    fn persist(&mut self, snapshot: &RecordSnapshot) -> Result<(), WriterError> {
        let bar = self.bar.as_ref().ok_or(WriterError::NotInitialized)?;
        bar.set_message(progress_message(&self.label, snapshot));
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{MonitorSpec, OrchestratorConfig, run_under_benchmark};
    use runmark_core::{CommandWorkload, Sample};
    use runmark_report::{BenchmarkRecord, MemoryWriter};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_message_shows_latest_readings() {
        let handle = RecordHandle::new(BenchmarkRecord::new("train"));
        handle.attach_latest(
            MonitorKind::Memory,
            Arc::new(Mutex::new(Some(Sample {
                t_secs: 1.0,
                value: 2048.0,
            }))),
        );
        handle.attach_latest(MonitorKind::Cpu, Arc::new(Mutex::new(None)));
        handle.mark_running(12);

        let message = progress_message("train", &handle.snapshot());
        assert_eq!(message, "train  memory: 2.00 KiB  cpu: -");
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut writer = ProgressWriter::new();
        writer
            .initialize(1, RecordHandle::new(BenchmarkRecord::new("x")))
            .unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(matches!(
            writer.persist(&RecordHandle::new(BenchmarkRecord::new("x")).snapshot()),
            Err(WriterError::NotInitialized)
        ));
    }

    #[test]
    fn test_spinner_sees_running_snapshots_under_default_config() {
        let spec = ProgressWriter::spec();
        let mode = spec.persist_mode().expect("progress sets its own mode");
        assert_eq!(
            mode,
            PersistMode::Live {
                every: PROGRESS_REFRESH
            }
        );

        // A collector on the spinner's schedule, next to the spinner itself.
        let seen = MemoryWriter::new();
        let config = OrchestratorConfig::new()
            .with_monitor(MonitorSpec::memory())
            .with_writer(spec)
            .with_writer(WriterSpec::shared(seen.clone()).with_persist(mode));
        assert_eq!(config.persist, PersistMode::OnCompletion);

        let report = run_under_benchmark(CommandWorkload::new("sleep").arg("0.8"), config).unwrap();
        assert!(report.is_clean());

        let state = seen.state();
        let running: Vec<_> = state
            .snapshots
            .iter()
            .filter(|s| s.phase == RunPhase::Running)
            .collect();
        assert!(!running.is_empty());
        assert!(
            progress_message("sleep", running[running.len() - 1]).starts_with("sleep  memory: ")
        );
    }
}
