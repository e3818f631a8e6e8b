#![warn(missing_docs)]
//! Runmark Report - Benchmark Records and Writers
//!
//! Everything that holds or emits a run's result:
//! - `BenchmarkRecord`, the aggregate a run produces
//! - `RecordHandle`, the thread-safe proxy writers read it through
//! - `Writer` trait, the writer thread runtime and the in-memory collector
//! - JSON file writer (atomic replace)
//! - Human-readable terminal formatting

mod handle;
mod human;
mod json;
mod record;
mod writer;

pub use handle::{RecordHandle, RecordSnapshot, RunPhase};
pub use human::{format_bytes, format_human_output, format_value};
pub use json::{
    DEFAULT_FILE_NAME, JsonWriter, generate_json_report, parse_json_report, render_file_name,
};
pub use record::{
    BenchmarkRecord, MonitorStatistics, OrderedMap, RecordError, StatisticsStatus,
    TIMESTAMP_FORMAT, WorkloadOutcome, format_timestamp,
};
pub use writer::{
    MemoryState, MemoryWriter, PersistMode, Writer, WriterError, WriterHandle, WriterReport,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON record per workload
    Json,
    /// Human-readable terminal output
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Human));
        assert!("html".parse::<OutputFormat>().is_err());
    }
}
