//! Configuration loading from runmark.toml
//!
//! Runmark configuration can be specified in a `runmark.toml` file in the project root.
//! The configuration is automatically discovered by walking up from the current directory.

use crate::orchestrator::{MonitorSpec, OrchestratorConfig, WriterSpec};
use anyhow::Context;
use runmark_core::MonitorKind;
use runmark_report::{JsonWriter, PersistMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = "runmark.toml";

/// Runmark configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunmarkConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// When writers persist the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PersistSetting {
    /// Once, after the record is complete (default)
    #[default]
    OnCompletion,
    /// Every `live_interval` while the workload runs
    Live,
}

impl std::str::FromStr for PersistSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on-completion" | "completion" => Ok(PersistSetting::OnCompletion),
            "live" => Ok(PersistSetting::Live),
            other => Err(format!("Unknown persist mode: {}", other)),
        }
    }
}

/// Runner configuration for workload execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Sampling interval (e.g., "500ms", "1s")
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Timeout for a single workload (e.g., "60s", "5m"); none when absent
    #[serde(default)]
    pub timeout: Option<String>,
    /// Monitors to attach, in order: "cpu", "memory", "gpu"
    #[serde(default = "default_monitors")]
    pub monitors: Vec<String>,
    /// Persist mode: "on-completion" or "live"
    #[serde(default)]
    pub persist: PersistSetting,
    /// Snapshot interval in live mode
    #[serde(default = "default_live_interval")]
    pub live_interval: String,
    /// Consecutive sampling failures before a monitor gives up
    #[serde(default = "default_max_sample_failures")]
    pub max_sample_failures: u32,
    /// Keep the full sample series in each record
    #[serde(default)]
    pub keep_series: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: None,
            monitors: default_monitors(),
            persist: PersistSetting::default(),
            live_interval: default_live_interval(),
            max_sample_failures: default_max_sample_failures(),
            keep_series: false,
        }
    }
}

fn default_interval() -> String {
    "500ms".to_string()
}
fn default_monitors() -> Vec<String> {
    vec!["cpu".to_string(), "memory".to_string()]
}
fn default_live_interval() -> String {
    "1s".to_string()
}
fn default_max_sample_failures() -> u32 {
    runmark_core::DEFAULT_MAX_CONSECUTIVE_FAILURES
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
    /// Directory for JSON records
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// File name template; `{name}`, `{function}`, `{timestamp}` and `{pid}` expand
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Pretty-print JSON records
    #[serde(default = "default_indent")]
    pub indent: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            directory: default_output_dir(),
            file_name: default_file_name(),
            indent: default_indent(),
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}
fn default_output_dir() -> String {
    "target/runmark".to_string()
}
fn default_file_name() -> String {
    runmark_report::DEFAULT_FILE_NAME.to_string()
}
fn default_indent() -> bool {
    true
}

impl RunmarkConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!("ignoring {}: {:#}", config_path.display(), e);
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Build an orchestrator configuration: monitors and JSON writer from
    /// this file, no overrides applied.
    pub fn to_orchestrator_config(&self) -> anyhow::Result<OrchestratorConfig> {
        let runner = &self.runner;
        let mut config = OrchestratorConfig::new()
            .with_interval(Self::parse_duration(&runner.interval).context("runner.interval")?)
            .with_max_sample_failures(runner.max_sample_failures)
            .with_series(runner.keep_series)
            .with_persist(match runner.persist {
                PersistSetting::OnCompletion => PersistMode::OnCompletion,
                PersistSetting::Live => PersistMode::Live {
                    every: Self::parse_duration(&runner.live_interval)
                        .context("runner.live_interval")?,
                },
            });

        if let Some(timeout) = &runner.timeout {
            config = config.with_timeout(Self::parse_duration(timeout).context("runner.timeout")?);
        }

        for name in &runner.monitors {
            config = config.with_monitor(Self::monitor_spec(name)?);
        }

        Ok(config)
    }

    /// JSON writer configured by `[output]`
    pub fn json_writer(&self) -> WriterSpec {
        let output = self.output.clone();
        WriterSpec::new("json", move || {
            Box::new(
                JsonWriter::new(&output.directory)
                    .with_file_name(output.file_name.clone())
                    .pretty(output.indent),
            )
        })
    }

    /// Built-in monitor by name
    pub fn monitor_spec(name: &str) -> anyhow::Result<MonitorSpec> {
        let kind = MonitorKind::from(name);
        MonitorSpec::builtin(&kind)
            .ok_or_else(|| anyhow::anyhow!("Unknown monitor: {} (expected cpu, memory or gpu)", name))
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Runmark Configuration

[runner]
# Sampling interval for every monitor
interval = "500ms"
# Kill a workload that runs longer than this (uncomment to enable)
# timeout = "60s"
# Monitors to attach, in order: cpu, memory, gpu
monitors = ["cpu", "memory"]
# When writers persist: "on-completion" or "live"
persist = "on-completion"
# Snapshot interval in live mode
live_interval = "1s"
# Consecutive sampling failures before a monitor gives up
max_sample_failures = 3
# Keep the full sample series in each record
keep_series = false

[output]
# Default output format: human, json
format = "human"
# Directory for JSON records
directory = "target/runmark"
# File name template: {name}, {function}, {timestamp}, {pid}
file_name = "{name}_{timestamp}_{pid}.json"
# Pretty-print JSON records
indent = true
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_nanos((value * multiplier as f64) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunmarkConfig::default();
        assert_eq!(config.runner.interval, "500ms");
        assert_eq!(config.runner.monitors, vec!["cpu", "memory"]);
        assert_eq!(config.runner.persist, PersistSetting::OnCompletion);
        assert_eq!(config.output.directory, "target/runmark");
    }

    #[test]
    fn test_parse_duration() {
        let ms = Duration::from_millis;
        assert_eq!(RunmarkConfig::parse_duration("3s").unwrap(), ms(3000));
        assert_eq!(RunmarkConfig::parse_duration("500ms").unwrap(), ms(500));
        assert_eq!(RunmarkConfig::parse_duration("100us").unwrap(), Duration::from_micros(100));
        assert_eq!(RunmarkConfig::parse_duration("2m").unwrap(), ms(120_000));
        assert_eq!(RunmarkConfig::parse_duration("1.5s").unwrap(), ms(1500));
        assert_eq!(RunmarkConfig::parse_duration("2").unwrap(), ms(2000));
        assert!(RunmarkConfig::parse_duration("fast").is_err());
        assert!(RunmarkConfig::parse_duration("5h").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            interval = "250ms"
            monitors = ["memory", "gpu"]
            persist = "live"

            [output]
            indent = false
        "#;

        let config: RunmarkConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.interval, "250ms");
        assert_eq!(config.runner.persist, PersistSetting::Live);
        assert!(!config.output.indent);
        // Defaults should still apply
        assert_eq!(config.output.format, "human");
        assert_eq!(config.runner.max_sample_failures, 3);
    }

    #[test]
    fn test_to_orchestrator_config_keeps_monitor_order() {
        let mut config = RunmarkConfig::default();
        config.runner.monitors = vec!["memory".to_string(), "cpu".to_string()];
        config.runner.timeout = Some("30s".to_string());

        let orchestrator = config.to_orchestrator_config().unwrap();
        let kinds: Vec<_> = orchestrator.monitors.iter().map(|m| m.kind().clone()).collect();
        assert_eq!(kinds, vec![MonitorKind::Memory, MonitorKind::Cpu]);
        assert_eq!(orchestrator.interval, Duration::from_millis(500));
        assert_eq!(orchestrator.timeout, Some(Duration::from_secs(30)));
        assert_eq!(orchestrator.persist, PersistMode::OnCompletion);
    }

    #[test]
    fn test_unknown_monitor_rejected() {
        let mut config = RunmarkConfig::default();
        config.runner.monitors = vec!["disk".to_string()];
        assert!(config.to_orchestrator_config().is_err());
    }

    #[test]
    fn test_default_toml_parses() {
        let default_toml = RunmarkConfig::default_toml();
        let config: RunmarkConfig = toml::from_str(&default_toml).unwrap();
        assert_eq!(config.runner.interval, "500ms");
        assert!(config.to_orchestrator_config().is_ok());
    }
}
