//! Resource Samplers
//!
//! A sampler reads one metric for a process id. Units are fixed per kind:
//!
//! | kind   | unit    | notes                                            |
//! |--------|---------|--------------------------------------------------|
//! | cpu    | percent | share of one core, so the range is `[0, 100 * cores]` |
//! | memory | bytes   | resident set size                                |
//! | gpu    | bytes   | device memory held by the process (NVIDIA only)  |
//!
//! Every sampler reports `SampleError::ProcessGone` once the pid no longer
//! resolves to a live process; monitors treat that as their stop condition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use sysinfo::{Pid, Process, ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;

/// One point of a monitor series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the monitor started polling (monotonic clock)
    pub t_secs: f64,
    /// Metric value in the kind's unit
    pub value: f64,
}

/// Which statistic a monitor produces
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MonitorKind {
    /// CPU utilization
    Cpu,
    /// Resident memory
    Memory,
    /// GPU device memory
    Gpu,
    /// User-provided sampler
    Custom(String),
}

impl MonitorKind {
    /// Stable label, also the key in `monitor_statistics`
    pub fn as_str(&self) -> &str {
        match self {
            MonitorKind::Cpu => "cpu",
            MonitorKind::Memory => "memory",
            MonitorKind::Gpu => "gpu",
            MonitorKind::Custom(name) => name,
        }
    }

    /// Unit of the values this kind produces
    pub fn unit(&self) -> &'static str {
        match self {
            MonitorKind::Cpu => "percent",
            MonitorKind::Memory | MonitorKind::Gpu => "bytes",
            MonitorKind::Custom(_) => "value",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MonitorKind {
    fn from(label: String) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "cpu" => MonitorKind::Cpu,
            "memory" | "mem" | "ram" => MonitorKind::Memory,
            "gpu" => MonitorKind::Gpu,
            _ => MonitorKind::Custom(label),
        }
    }
}

impl From<&str> for MonitorKind {
    fn from(label: &str) -> Self {
        MonitorKind::from(label.to_string())
    }
}

impl From<MonitorKind> for String {
    fn from(kind: MonitorKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Why a sample could not be taken
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SampleError {
    /// The process exited (or was reaped); the series is over
    #[error("process {pid} is no longer running")]
    ProcessGone { pid: u32 },

    /// The metric could not be read right now
    #[error("sample unavailable: {0}")]
    Unavailable(String),
}

/// Strategy that reads one resource metric for a process id
pub trait Sampler: Send {
    /// Statistic produced by this sampler
    fn kind(&self) -> MonitorKind;

    /// Read the metric for `pid`
    fn sample(&mut self, pid: u32) -> Result<f64, SampleError>;
}

/// Refresh one pid and return it if it is still a live process.
///
/// Zombies count as gone: the workload has exited even if nobody reaped it.
fn refresh_live(system: &mut System, pid: u32) -> Result<&Process, SampleError> {
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

    match system.process(sys_pid) {
        Some(process) if !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) => {
            Ok(process)
        }
        _ => Err(SampleError::ProcessGone { pid }),
    }
}

/// CPU utilization through `sysinfo`.
///
/// The first reading for a pid is 0: utilization is a delta between two
/// refreshes.
pub struct CpuSampler {
    system: System,
}

impl CpuSampler {
    /// Create a sampler with an empty process table
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for CpuSampler {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Cpu
    }

    fn sample(&mut self, pid: u32) -> Result<f64, SampleError> {
        let process = refresh_live(&mut self.system, pid)?;
        Ok(f64::from(process.cpu_usage()).max(0.0))
    }
}

/// Resident memory through `sysinfo`
pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    /// Create a sampler with an empty process table
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for MemorySampler {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Memory
    }

    fn sample(&mut self, pid: u32) -> Result<f64, SampleError> {
        let process = refresh_live(&mut self.system, pid)?;
        Ok(process.memory() as f64)
    }
}

/// GPU memory via `nvidia-smi --query-compute-apps`.
///
/// A live process that holds no GPU context reads as 0 bytes. A missing or
/// failing `nvidia-smi` is `Unavailable`, so the monitor degrades after its
/// retry budget instead of silently reporting zeros.
pub struct GpuSampler {
    system: System,
    program: String,
}

impl GpuSampler {
    /// Query the `nvidia-smi` found on `PATH`
    pub fn new() -> Self {
        Self::with_program("nvidia-smi")
    }

    /// Query a specific `nvidia-smi`-compatible executable
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            system: System::new(),
            program: program.into(),
        }
    }

    fn query(&self) -> Result<String, SampleError> {
        let output = Command::new(&self.program)
            .args([
                "--query-compute-apps=pid,used_memory",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .map_err(|e| SampleError::Unavailable(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(SampleError::Unavailable(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| SampleError::Unavailable(format!("non-UTF-8 output: {}", e)))
    }
}

impl Default for GpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for GpuSampler {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Gpu
    }

    fn sample(&mut self, pid: u32) -> Result<f64, SampleError> {
        refresh_live(&mut self.system, pid)?;
        let csv = self.query()?;
        parse_compute_apps(&csv, pid).map(|bytes| bytes as f64)
    }
}

/// Sum the `used_memory` (MiB) of every compute context owned by `pid`.
fn parse_compute_apps(csv: &str, pid: u32) -> Result<u64, SampleError> {
    let mut mib = 0u64;
    for line in csv.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split(',').map(str::trim);
        let (Some(row_pid), Some(used)) = (fields.next(), fields.next()) else {
            return Err(SampleError::Unavailable(format!("malformed row: {line:?}")));
        };

        let row_pid: u32 = row_pid
            .parse()
            .map_err(|_| SampleError::Unavailable(format!("bad pid in row: {line:?}")))?;
        if row_pid != pid {
            continue;
        }

        // "[N/A]" shows up on drivers that hide per-process accounting
        match used.parse::<u64>() {
            Ok(value) => mib += value,
            Err(_) => {
                return Err(SampleError::Unavailable(format!(
                    "used_memory not reported: {used:?}"
                )));
            }
        }
    }
    Ok(mib * 1024 * 1024)
}

/// Sampler backed by a closure, for custom metrics
pub struct FnSampler<F> {
    kind: MonitorKind,
    read: F,
}

/// Build a sampler from a closure
pub fn sampler_fn<F>(kind: impl Into<MonitorKind>, read: F) -> FnSampler<F>
where
    F: FnMut(u32) -> Result<f64, SampleError> + Send,
{
    FnSampler {
        kind: kind.into(),
        read,
    }
}

impl<F> Sampler for FnSampler<F>
where
    F: FnMut(u32) -> Result<f64, SampleError> + Send,
{
    fn kind(&self) -> MonitorKind {
        self.kind.clone()
    }

    fn sample(&mut self, pid: u32) -> Result<f64, SampleError> {
        (self.read)(pid)
    }
}
