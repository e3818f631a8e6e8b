//! JSON Output
//!
//! `JsonWriter` persists the record as one JSON document per run. Every
//! persist goes to a fresh temporary file in the target directory which is
//! then renamed over the destination, so readers only ever see a complete
//! document and a failed run leaves no partial file behind.

use crate::handle::{RecordHandle, RecordSnapshot};
use crate::record::BenchmarkRecord;
use crate::writer::{Writer, WriterError};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default destination file name template. The timestamp has one-second
/// resolution; the pid keeps same-second runs of one name apart.
pub const DEFAULT_FILE_NAME: &str = "{name}_{timestamp}_{pid}.json";

/// Encode a record as JSON
pub fn generate_json_report(record: &BenchmarkRecord, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(record)
    } else {
        serde_json::to_string(record)
    }
}

/// Decode a record previously written by `JsonWriter`
pub fn parse_json_report(json: &str) -> Result<BenchmarkRecord, serde_json::Error> {
    serde_json::from_str(json)
}

/// Keep file names portable: anything outside `[A-Za-z0-9._-]` becomes `_`
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Expand `{name}`, `{function}`, `{timestamp}` and `{pid}` in a file name template
pub fn render_file_name(template: &str, record: &BenchmarkRecord, pid: u32) -> String {
    template
        .replace("{name}", &sanitize(&record.name))
        .replace(
            "{function}",
            &sanitize(record.function_name.as_deref().unwrap_or("unknown")),
        )
        .replace("{timestamp}", &record.timestamp)
        .replace("{pid}", &pid.to_string())
}

fn write_document(file: &mut std::fs::File, json: &str) -> std::io::Result<()> {
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.sync_all()
}

/// Writes the record as a JSON file
#[derive(Debug)]
pub struct JsonWriter {
    directory: PathBuf,
    file_name: String,
    pretty: bool,
    target: Option<PathBuf>,
    closed: bool,
}

impl JsonWriter {
    /// Write into `directory` using the default file name
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            pretty: true,
            target: None,
            closed: false,
        }
    }

    /// Override the file name template
    pub fn with_file_name(mut self, template: impl Into<String>) -> Self {
        self.file_name = template.into();
        self
    }

    /// Pretty-print (default) or compact output
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Destination path, known after `initialize`
    pub fn target(&self) -> Option<&Path> {
        self.target.as_deref()
    }

    fn io_error(action: &'static str, path: &Path, source: std::io::Error) -> WriterError {
        WriterError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Writer for JsonWriter {
    fn kind(&self) -> &str {
        "json"
    }

    fn initialize(&mut self, pid: u32, record: RecordHandle) -> Result<(), WriterError> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| Self::io_error("create directory", &self.directory, e))?;

        // Prove the directory takes new files before the workload runs.
        tempfile::NamedTempFile::new_in(&self.directory)
            .map_err(|e| Self::io_error("create file in", &self.directory, e))?;

        let target = self
            .directory
            .join(render_file_name(&self.file_name, &record.record(), pid));
        tracing::debug!(pid, target = %target.display(), "json writer initialized");
        self.target = Some(target);
        Ok(())
    }

    fn persist(&mut self, snapshot: &RecordSnapshot) -> Result<(), WriterError> {
        let target = self.target.as_ref().ok_or(WriterError::NotInitialized)?;
        if self.closed {
            return Err(WriterError::Sink("json writer is closed".to_string()));
        }

        let json = generate_json_report(&snapshot.record, self.pretty)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".runmark-")
            .suffix(".json.tmp")
            .tempfile_in(&self.directory)
            .map_err(|e| Self::io_error("create temporary file in", &self.directory, e))?;
        write_document(tmp.as_file_mut(), &json)
            .map_err(|e| Self::io_error("write", tmp.path(), e))?;
        tmp.persist(target)
            .map_err(|e| Self::io_error("rename onto", target, e.error))?;

        Ok(())
    }

    fn close(&mut self) -> Result<(), WriterError> {
        if !self.closed {
            self.closed = true;
            if let Some(target) = &self.target {
                tracing::debug!(target = %target.display(), "json writer closed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MonitorStatistics, OrderedMap, StatisticsStatus, WorkloadOutcome};
    use tempfile::TempDir;

    fn finished_handle() -> RecordHandle {
        let handle = RecordHandle::new(BenchmarkRecord::new("json test"));
        handle
            .set_function("train", [("return", "u64".to_string())].into_iter().collect())
            .unwrap();
        handle.mark_running(4242);
        handle
            .set_elapsed(2.01, WorkloadOutcome::from_exit(Some(0), None))
            .unwrap();
        let mut stats = OrderedMap::new();
        stats.insert(
            "cpu",
            MonitorStatistics {
                unit: "percent".to_string(),
                status: StatisticsStatus::Complete,
                reason: None,
                interval_seconds: 0.5,
                samples: 4,
                min: Some(0.0),
                max: Some(101.5),
                mean: Some(50.0),
                time_weighted_mean: Some(48.0),
                median: Some(49.0),
                std_dev: Some(3.5),
                p95: Some(100.0),
                last: Some(0.0),
                series: None,
            },
        );
        handle.finalize(stats).unwrap();
        handle
    }

    #[test]
    fn test_persist_writes_parseable_record() {
        let dir = TempDir::new().unwrap();
        let handle = finished_handle();
        let mut writer = JsonWriter::new(dir.path()).with_file_name("{function}.json");
        writer.initialize(4242, handle.clone()).unwrap();
        writer.persist(&handle.snapshot()).unwrap();
        writer.close().unwrap();

        let target = dir.path().join("train.json");
        assert_eq!(writer.target(), Some(target.as_path()));

        let back = parse_json_report(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(back, handle.record());

        // Only the final file remains; temporaries were renamed away.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_unwritable_directory_fails_initialize() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let mut writer = JsonWriter::new(blocker.join("out"));
        let err = writer
            .initialize(1, RecordHandle::new(BenchmarkRecord::new("x")))
            .unwrap_err();
        assert!(matches!(err, WriterError::Io { .. }));
        assert!(writer.target().is_none());
    }

    #[test]
    fn test_close_twice_is_close_once() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonWriter::new(dir.path());
        writer
            .initialize(1, RecordHandle::new(BenchmarkRecord::new("x")))
            .unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.persist(&finished_handle().snapshot()).is_err());
    }

    #[test]
    fn test_persist_before_initialize() {
        let mut writer = JsonWriter::new("unused");
        assert!(matches!(
            writer.persist(&finished_handle().snapshot()),
            Err(WriterError::NotInitialized)
        ));
    }

    #[test]
    fn test_file_name_template() {
        let record = BenchmarkRecord::new("my bench/v2");
        let name = render_file_name(DEFAULT_FILE_NAME, &record, 77);
        assert_eq!(name, format!("my_bench_v2_{}_77.json", record.timestamp));
    }

    #[test]
    fn test_same_second_runs_do_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let handle = finished_handle();

        let mut targets = Vec::new();
        for pid in [100, 101] {
            let mut writer = JsonWriter::new(dir.path());
            writer.initialize(pid, handle.clone()).unwrap();
            writer.persist(&handle.snapshot()).unwrap();
            writer.close().unwrap();
            targets.push(writer.target().unwrap().to_path_buf());
        }

        assert_ne!(targets[0], targets[1]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_compact_output_is_single_line() {
        let json = generate_json_report(&finished_handle().record(), false).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"monitor_statistics\":{\"cpu\""));
    }
}
