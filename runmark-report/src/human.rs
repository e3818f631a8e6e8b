//! Output Formatting
//!
//! Terminal-friendly rendering of finished records: one block per workload
//! with status, wall-clock time and a line per monitor.

use crate::record::{BenchmarkRecord, MonitorStatistics};

/// Render a value in its monitor unit
pub fn format_value(value: f64, unit: &str) -> String {
    match unit {
        "bytes" => format_bytes(value),
        "percent" => format!("{:.1}%", value),
        _ => format!("{:.3}", value),
    }
}

/// Binary-prefixed byte count
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

fn format_statistics(name: &str, stats: &MonitorStatistics) -> String {
    let mut line = format!("      {:<8}", name);
    let fmt = |v: Option<f64>| {
        v.map(|v| format_value(v, &stats.unit))
            .unwrap_or_else(|| "-".to_string())
    };

    line.push_str(&format!(
        "mean: {}  max: {}  p95: {}  samples: {}",
        fmt(stats.mean),
        fmt(stats.max),
        fmt(stats.p95),
        stats.samples
    ));
    if stats.is_degraded() {
        line.push_str("  [degraded]");
    }
    line.push('\n');

    if let Some(reason) = &stats.reason {
        line.push_str(&format!("               {}\n", reason));
    }
    line
}

/// Format records for human-readable terminal display
pub fn format_human_output(records: &[BenchmarkRecord]) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("Runmark Results\n");
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    for record in records {
        let success = record.outcome.as_ref().is_none_or(|o| o.success);
        let status_icon = if success { "✓" } else { "✗" };

        output.push_str(&format!("  {} {}", status_icon, record.name));
        if let Some(function) = &record.function_name {
            if function != &record.name {
                output.push_str(&format!(" ({})", function));
            }
        }
        output.push('\n');

        if let Some(elapsed) = record.elapsed_seconds {
            output.push_str(&format!("      elapsed: {:.3} s\n", elapsed));
        }

        if let Some(outcome) = &record.outcome {
            if let Some(error) = &outcome.error {
                output.push_str(&format!("      error: {}\n", error));
            } else if !outcome.success {
                match (outcome.exit_code, outcome.signal) {
                    (_, Some(signal)) => {
                        output.push_str(&format!("      killed by signal {}\n", signal))
                    }
                    (Some(code), None) => {
                        output.push_str(&format!("      exited with status {}\n", code))
                    }
                    (None, None) => output.push_str("      exited abnormally\n"),
                }
            }
        }

        if let Some(stats) = &record.monitor_statistics {
            for (name, entry) in stats.iter() {
                output.push_str(&format_statistics(name, entry));
            }
        }

        output.push('\n');
    }

    // Summary
    let failed = records
        .iter()
        .filter(|r| r.outcome.as_ref().is_some_and(|o| !o.success))
        .count();
    output.push_str(&"-".repeat(60));
    output.push('\n');
    output.push_str(&format!(
        "Summary: {} run, {} succeeded, {} failed\n",
        records.len(),
        records.len() - failed,
        failed
    ));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{OrderedMap, StatisticsStatus, WorkloadOutcome};

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512.0), "512 B");
        assert_eq!(format_bytes(1536.0), "1.50 KiB");
        assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0 * 1024.0), "3.00 GiB");
    }

    #[test]
    fn test_failed_run_and_degraded_monitor_are_visible() {
        let mut record = BenchmarkRecord::new("crash");
        record
            .set_elapsed(
                0.01,
                WorkloadOutcome {
                    success: false,
                    exit_code: Some(101),
                    signal: None,
                    worker_seconds: None,
                    error: Some("boom".to_string()),
                },
            )
            .unwrap();
        let mut stats = OrderedMap::new();
        stats.insert(
            "memory",
            MonitorStatistics {
                unit: "bytes".to_string(),
                status: StatisticsStatus::Degraded,
                reason: Some("target exited before the first sample".to_string()),
                interval_seconds: 0.5,
                samples: 0,
                min: None,
                max: None,
                mean: None,
                time_weighted_mean: None,
                median: None,
                std_dev: None,
                p95: None,
                last: None,
                series: None,
            },
        );
        record.set_monitor_statistics(stats).unwrap();

        let output = format_human_output(&[record]);
        assert!(output.contains("✗ crash"));
        assert!(output.contains("error: boom"));
        assert!(output.contains("[degraded]"));
        assert!(output.contains("1 run, 0 succeeded, 1 failed"));
    }
}
