//! Orchestrator
//!
//! Runs one workload as a child process with monitors and writers attached:
//!
//! ```text
//! start ── spawn child ── start monitors ── initialize/start writers
//!                               │                    │
//!              poll try_wait ◀──┘                    │  (Live: persist snapshots)
//!                   │ exit                           │
//!   elapsed = exit - start, wake monitors            │
//!   join monitors ── fill record ── finish writers ──┘
//! ```
//!
//! Registered workloads re-execute the current binary in worker mode and
//! report over a pipe dup'd to fd 3 in the child; external commands are
//! observed through their exit status only.

use runmark_core::{
    CancelToken, CpuSampler, GpuSampler, MemorySampler, Monitor, MonitorFailure, MonitorHandle,
    MonitorKind, Sampler, StopSignal, Workload,
};
use runmark_ipc::{FrameError, FrameReader, PROTOCOL_VERSION, WorkerMessage};
use runmark_report::{
    BenchmarkRecord, JsonWriter, MonitorStatistics, OrderedMap, PersistMode, RecordError,
    RecordHandle, Writer, WriterError, WriterHandle, WriterReport, WorkloadOutcome,
};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::io::{FromRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::process::{CommandExt, ExitStatusExt};

/// How often the child is polled for exit
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default time between SIGTERM and SIGKILL
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Default sampling interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// A run that could not produce a complete record
#[derive(Debug, Error)]
pub enum BenchmarkExecutionError {
    /// Configuration rejected before anything was spawned
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The workload process could not be started
    #[error("failed to spawn workload `{program}`: {source}")]
    SpawnFailure {
        /// Program or workload name
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A monitor thread or the report reader could not be started
    #[error("failed to attach {what}: {source}")]
    Attach {
        /// What was being attached
        what: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A writer failed to initialize
    #[error("writer `{writer}` failed: {source}")]
    Writer {
        /// Writer label
        writer: String,
        /// Underlying writer error
        #[source]
        source: WriterError,
    },

    /// Waiting on the child failed
    #[error("failed to wait for workload: {0}")]
    Wait(#[source] std::io::Error),

    /// The worker binary has no workload by that name
    #[error("workload not found in worker binary: {0}")]
    WorkloadNotFound(String),

    /// The worker sent something unexpected
    #[error("worker protocol error: expected {expected}, got {got}")]
    Protocol {
        /// What the orchestrator expected
        expected: String,
        /// What arrived instead
        got: String,
    },

    /// The workload outlived the configured timeout
    #[error("workload exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// The run was cancelled through its token
    #[error("run was cancelled")]
    Cancelled,

    /// A record field was written twice or out of order
    #[error("record invariant violated: {0}")]
    Record(#[from] RecordError),

    /// A helper thread panicked
    #[error("internal error: {0}")]
    Internal(String),
}

type SamplerFactory = Arc<dyn Fn() -> Box<dyn Sampler> + Send + Sync>;
type WriterFactory = Arc<dyn Fn() -> Box<dyn Writer> + Send + Sync>;

/// A monitor to attach to every run
#[derive(Clone)]
pub struct MonitorSpec {
    kind: MonitorKind,
    factory: SamplerFactory,
}

impl MonitorSpec {
    /// CPU utilization, percent of one core
    pub fn cpu() -> Self {
        Self::custom(MonitorKind::Cpu, || Box::new(CpuSampler::new()))
    }

    /// Resident memory, bytes
    pub fn memory() -> Self {
        Self::custom(MonitorKind::Memory, || Box::new(MemorySampler::new()))
    }

    /// GPU memory held by the process, bytes
    pub fn gpu() -> Self {
        Self::custom(MonitorKind::Gpu, || Box::new(GpuSampler::new()))
    }

    /// Built-in monitor for `kind`; `None` for custom kinds
    pub fn builtin(kind: &MonitorKind) -> Option<Self> {
        match kind {
            MonitorKind::Cpu => Some(Self::cpu()),
            MonitorKind::Memory => Some(Self::memory()),
            MonitorKind::Gpu => Some(Self::gpu()),
            MonitorKind::Custom(_) => None,
        }
    }

    /// Monitor built from a sampler factory, called once per run
    pub fn custom<F>(kind: impl Into<MonitorKind>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Sampler> + Send + Sync + 'static,
    {
        Self {
            kind: kind.into(),
            factory: Arc::new(factory),
        }
    }

    /// Statistic this monitor produces
    pub fn kind(&self) -> &MonitorKind {
        &self.kind
    }
}

impl std::fmt::Debug for MonitorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MonitorSpec").field(&self.kind).finish()
    }
}

/// A writer to attach to every run
#[derive(Clone)]
pub struct WriterSpec {
    label: String,
    factory: WriterFactory,
    persist: Option<PersistMode>,
}

impl WriterSpec {
    /// Writer built from a factory, called once per run
    pub fn new<F>(label: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Writer> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            factory: Arc::new(factory),
            persist: None,
        }
    }

    /// Persist on this schedule instead of the run-wide one
    pub fn with_persist(mut self, persist: PersistMode) -> Self {
        self.persist = Some(persist);
        self
    }

    /// This writer's own persist mode, if it overrides the run-wide one
    pub fn persist_mode(&self) -> Option<PersistMode> {
        self.persist
    }

    /// JSON file per run in `directory`
    pub fn json(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self::new("json", move || Box::new(JsonWriter::new(directory.clone())))
    }

    /// Reuse clones of one writer; useful when clones share state
    pub fn shared<W>(writer: W) -> Self
    where
        W: Writer + Clone + Sync + 'static,
    {
        let label = writer.kind().to_string();
        Self::new(label, move || Box::new(writer.clone()))
    }

    /// Label used in logs
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for WriterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterSpec")
            .field("label", &self.label)
            .field("persist", &self.persist)
            .finish()
    }
}

/// Everything that shapes a run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Record name; defaults to the workload's function name
    pub name: Option<String>,
    /// Sampling interval shared by all monitors
    pub interval: Duration,
    /// Kill the workload after this long
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,
    /// When writers persist, unless a writer sets its own mode
    pub persist: PersistMode,
    /// Retry budget per monitor
    pub max_sample_failures: u32,
    /// Keep full series in the record
    pub keep_series: bool,
    /// Monitors, in attachment order
    pub monitors: Vec<MonitorSpec>,
    /// Writers, in attachment order
    pub writers: Vec<WriterSpec>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name: None,
            interval: DEFAULT_INTERVAL,
            timeout: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            persist: PersistMode::default(),
            max_sample_failures: runmark_core::DEFAULT_MAX_CONSECUTIVE_FAILURES,
            keep_series: false,
            monitors: Vec::new(),
            writers: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults: 500ms interval, no timeout, no monitors or writers
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the record name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the sampling interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set a timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the SIGTERM to SIGKILL grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Set the persist mode
    pub fn with_persist(mut self, persist: PersistMode) -> Self {
        self.persist = persist;
        self
    }

    /// Set the monitor retry budget
    pub fn with_max_sample_failures(mut self, n: u32) -> Self {
        self.max_sample_failures = n;
        self
    }

    /// Keep full series in the record
    pub fn with_series(mut self, keep: bool) -> Self {
        self.keep_series = keep;
        self
    }

    /// Attach a monitor
    pub fn with_monitor(mut self, monitor: MonitorSpec) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Attach a writer
    pub fn with_writer(mut self, writer: WriterSpec) -> Self {
        self.writers.push(writer);
        self
    }

    /// Reject configurations no run could satisfy
    pub fn validate(&self) -> Result<(), BenchmarkExecutionError> {
        let invalid = |msg: String| Err(BenchmarkExecutionError::InvalidConfig(msg));

        if self.interval.is_zero() {
            return invalid("sampling interval must be positive".to_string());
        }
        if let PersistMode::Live { every } = self.persist {
            if every.is_zero() {
                return invalid("live persist interval must be positive".to_string());
            }
        }
        for writer in &self.writers {
            if let Some(PersistMode::Live { every }) = writer.persist {
                if every.is_zero() {
                    return invalid(format!(
                        "live persist interval of writer `{}` must be positive",
                        writer.label
                    ));
                }
            }
        }
        if self.max_sample_failures == 0 {
            return invalid("max_sample_failures must be at least 1".to_string());
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return invalid("timeout must be positive".to_string());
        }

        for (i, monitor) in self.monitors.iter().enumerate() {
            if self.monitors[..i].iter().any(|m| m.kind == monitor.kind) {
                return invalid(format!("monitor `{}` attached twice", monitor.kind));
            }
        }

        Ok(())
    }
}

/// A completed run
#[derive(Debug)]
pub struct RunReport {
    /// The finished record
    pub record: BenchmarkRecord,
    /// Monitors that gave up; their entries are marked degraded
    pub monitor_failures: Vec<MonitorFailure>,
    /// Per-writer results, attachment order
    pub writers: Vec<WriterReport>,
}

impl RunReport {
    /// Every persist/close failure, labelled by writer
    pub fn writer_failures(&self) -> impl Iterator<Item = (&str, &WriterError)> {
        self.writers
            .iter()
            .flat_map(|w| w.failures.iter().map(move |e| (w.kind.as_str(), e)))
    }

    /// No monitor or writer reported a problem
    pub fn is_clean(&self) -> bool {
        self.monitor_failures.is_empty() && self.writer_failures().next().is_none()
    }
}

/// What the worker told us over the report pipe
#[derive(Debug, Default)]
struct WorkerReport {
    messages: Vec<WorkerMessage>,
    stream_error: Option<FrameError>,
}

/// A spawned workload
struct Spawned {
    child: Child,
    reader: Option<JoinHandle<WorkerReport>>,
}

/// Runs workloads under a fixed configuration
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Validate `config` and build an orchestrator
    pub fn new(config: OrchestratorConfig) -> Result<Self, BenchmarkExecutionError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `workload` to completion
    pub fn run(&self, workload: &Workload) -> Result<RunReport, BenchmarkExecutionError> {
        self.run_with_cancel(workload, &CancelToken::new())
    }

    /// Run `workload`, aborting if `cancel` fires
    pub fn run_with_cancel(
        &self,
        workload: &Workload,
        cancel: &CancelToken,
    ) -> Result<RunReport, BenchmarkExecutionError> {
        let config = &self.config;
        let start = Instant::now();

        let function_name = workload.function_name();
        let name = config.name.clone().unwrap_or_else(|| function_name.clone());
        let record = RecordHandle::new(BenchmarkRecord::new(name.clone()));
        record.set_function(function_name, workload.annotations().into_iter().collect())?;

        let Spawned { mut child, reader } = spawn_workload(workload)?;
        let pid = child.id();
        record.mark_running(pid);
        tracing::info!(workload = %name, pid, "workload spawned");

        let signal = StopSignal::new();

        // Monitors first, then writers.
        let mut monitors: Vec<MonitorHandle> = Vec::with_capacity(config.monitors.len());
        for spec in &config.monitors {
            let monitor = Monitor::new(pid, config.interval, (spec.factory)())
                .with_max_failures(config.max_sample_failures);
            match monitor.start(signal.clone()) {
                Ok(handle) => {
                    record.attach_latest(spec.kind.clone(), handle.latest_cell());
                    monitors.push(handle);
                }
                Err(source) => {
                    abort_run(&mut child, reader, &signal, monitors, Vec::new(), Duration::ZERO);
                    return Err(BenchmarkExecutionError::Attach {
                        what: format!("{} monitor", spec.kind),
                        source,
                    });
                }
            }
        }

        let mut writers: Vec<WriterHandle> = Vec::with_capacity(config.writers.len());
        for spec in &config.writers {
            let persist = spec.persist.unwrap_or(config.persist);
            match WriterHandle::spawn((spec.factory)(), pid, record.clone(), persist) {
                Ok(handle) => writers.push(handle),
                Err(source) => {
                    tracing::error!(writer = %spec.label, "writer initialization failed: {}", source);
                    abort_run(&mut child, reader, &signal, monitors, writers, Duration::ZERO);
                    return Err(BenchmarkExecutionError::Writer {
                        writer: spec.label.clone(),
                        source,
                    });
                }
            }
        }

        tracing::debug!(monitors = monitors.len(), writers = writers.len(), "attached");

        let deadline = config.timeout.map(|t| start + t);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    abort_run(&mut child, reader, &signal, monitors, writers, config.grace_period);
                    return Err(BenchmarkExecutionError::Wait(e));
                }
            }

            if cancel.is_cancelled() {
                tracing::warn!(workload = %name, pid, "run cancelled, terminating workload");
                abort_run(&mut child, reader, &signal, monitors, writers, config.grace_period);
                return Err(BenchmarkExecutionError::Cancelled);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(workload = %name, pid, "timeout reached, terminating workload");
                abort_run(&mut child, reader, &signal, monitors, writers, config.grace_period);
                return Err(BenchmarkExecutionError::Timeout(
                    config.timeout.unwrap_or_default(),
                ));
            }

            thread::sleep(CHILD_POLL_INTERVAL);
        };

        let elapsed = start.elapsed().as_secs_f64();
        signal.notify_target_exited();
        tracing::info!(workload = %name, pid, elapsed, %status, "workload exited");

        let outcomes: Vec<_> = monitors.into_iter().map(MonitorHandle::join).collect();

        let worker = match reader {
            Some(reader) => match reader.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    finish_writers(writers, true);
                    return Err(BenchmarkExecutionError::Internal(
                        "worker report reader panicked".to_string(),
                    ));
                }
            },
            None => None,
        };

        let outcome = match build_outcome(&status, worker) {
            Ok(outcome) => outcome,
            Err(e) => {
                finish_writers(writers, true);
                return Err(e);
            }
        };

        let mut statistics = OrderedMap::new();
        let mut monitor_failures = Vec::new();
        for outcome in &outcomes {
            statistics.insert(
                outcome.kind.as_str(),
                MonitorStatistics::from_outcome(outcome, config.keep_series),
            );
            if let Some(failure) = outcome.failure() {
                monitor_failures.push(failure.clone());
            }
        }

        let filled = record
            .set_elapsed(elapsed, outcome)
            .and_then(|()| record.finalize(statistics));
        if let Err(e) = filled {
            finish_writers(writers, true);
            return Err(e.into());
        }

        let writers = finish_writers(writers, false);
        let report = RunReport {
            record: record.record(),
            monitor_failures,
            writers,
        };
        if !report.is_clean() {
            tracing::warn!(
                workload = %name,
                monitor_failures = report.monitor_failures.len(),
                writer_failures = report.writer_failures().count(),
                "run completed with degraded monitors or writers"
            );
        }
        Ok(report)
    }
}

/// Run `workload` once under `config`
pub fn run_under_benchmark(
    workload: impl Into<Workload>,
    config: OrchestratorConfig,
) -> Result<RunReport, BenchmarkExecutionError> {
    Orchestrator::new(config)?.run(&workload.into())
}

fn finish_writers(writers: Vec<WriterHandle>, abort: bool) -> Vec<WriterReport> {
    writers
        .into_iter()
        .map(|w| if abort { w.abort() } else { w.finish() })
        .collect()
}

/// Stop everything after a failure: terminate the child, release monitors
/// and writers, and drop whatever the worker reported.
fn abort_run(
    child: &mut Child,
    reader: Option<JoinHandle<WorkerReport>>,
    signal: &StopSignal,
    monitors: Vec<MonitorHandle>,
    writers: Vec<WriterHandle>,
    grace: Duration,
) {
    terminate(child, grace);
    signal.cancel();
    for monitor in monitors {
        monitor.join();
    }
    finish_writers(writers, true);
    if let Some(reader) = reader {
        let _ = reader.join();
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL and reap
fn terminate(child: &mut Child, grace: Duration) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    if !grace.is_zero() {
        let _ = send_sigterm(child.id());
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                return;
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> Result<(), std::io::Error> {
    Ok(())
}

fn build_outcome(
    status: &ExitStatus,
    worker: Option<WorkerReport>,
) -> Result<WorkloadOutcome, BenchmarkExecutionError> {
    #[cfg(unix)]
    let signal = status.signal();
    #[cfg(not(unix))]
    let signal = None;

    let mut outcome = WorkloadOutcome::from_exit(status.code(), signal);

    let Some(worker) = worker else {
        return Ok(outcome);
    };

    if let Some(e) = &worker.stream_error {
        tracing::warn!("worker report stream ended abnormally: {}", e);
    }

    let mut messages = worker.messages.into_iter();
    match messages.next() {
        Some(WorkerMessage::Hello(hello)) => {
            if hello.protocol_version != PROTOCOL_VERSION {
                return Err(BenchmarkExecutionError::Protocol {
                    expected: format!("protocol version {}", PROTOCOL_VERSION),
                    got: format!("protocol version {}", hello.protocol_version),
                });
            }
        }
        Some(other) => {
            return Err(BenchmarkExecutionError::Protocol {
                expected: "Hello".to_string(),
                got: format!("{:?}", other),
            });
        }
        // Died before saying anything; the exit status tells the story.
        None => {
            outcome.success = false;
            outcome.error = Some("worker exited before reporting".to_string());
            return Ok(outcome);
        }
    }

    match messages.next() {
        Some(WorkerMessage::Complete { duration_nanos }) => {
            outcome.worker_seconds = Some(duration_nanos as f64 / 1e9);
        }
        Some(WorkerMessage::Failure { kind, message, .. }) => match kind {
            runmark_ipc::FailureKind::NotFound => {
                return Err(BenchmarkExecutionError::WorkloadNotFound(message));
            }
            _ => {
                outcome.success = false;
                outcome.error = Some(message);
            }
        },
        Some(other) => {
            return Err(BenchmarkExecutionError::Protocol {
                expected: "Complete/Failure".to_string(),
                got: format!("{:?}", other),
            });
        }
        None => {
            outcome.success = false;
            outcome.error = Some("worker exited without reporting completion".to_string());
        }
    }

    Ok(outcome)
}

fn spawn_error(program: &str, source: std::io::Error) -> BenchmarkExecutionError {
    BenchmarkExecutionError::SpawnFailure {
        program: program.to_string(),
        source,
    }
}

fn spawn_workload(workload: &Workload) -> Result<Spawned, BenchmarkExecutionError> {
    match workload {
        Workload::Command(cmd) => {
            let mut command = cmd.to_command();
            command.stdin(Stdio::null());
            let child = command
                .spawn()
                .map_err(|e| spawn_error(&cmd.program, e))?;
            Ok(Spawned {
                child,
                reader: None,
            })
        }
        Workload::Registered(def) => {
            let binary = std::env::current_exe().map_err(|e| spawn_error(def.name, e))?;
            let mut command = Command::new(&binary);
            command
                .env(runmark_ipc::WORKLOAD_ENV, def.name)
                .stdin(Stdio::null());
            spawn_worker(command, def.name)
        }
    }
}

/// Create a pipe pair, returning (read_fd, write_fd), both close-on-exec.
#[cfg(unix)]
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Close a raw file descriptor.
#[cfg(unix)]
fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Put the pipe's write end on `target_fd` without close-on-exec.
///
/// Runs between fork and exec, so it only makes raw syscalls. The read end
/// is close-on-exec already. In a process with fd 3 free, `pipe()` hands out
/// `read == target_fd`; `dup2` then replaces the read end on that number,
/// and closing `read` afterwards would close the report fd itself.
#[cfg(unix)]
fn install_report_fd(read: RawFd, write: RawFd, target_fd: RawFd) -> std::io::Result<()> {
    unsafe {
        if write != target_fd {
            if libc::dup2(write, target_fd) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            libc::close(write);
        }
        let flags = libc::fcntl(target_fd, libc::F_GETFD);
        if flags == -1 || libc::fcntl(target_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
            return Err(std::io::Error::last_os_error());
        }
        if read != target_fd {
            libc::close(read);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn spawn_worker(mut command: Command, name: &str) -> Result<Spawned, BenchmarkExecutionError> {
    let target_fd = runmark_ipc::WORKER_MESSAGE_FD;
    let (msg_read, msg_write) = create_pipe().map_err(|e| spawn_error(name, e))?;

    command.env(runmark_ipc::IPC_FD_ENV, target_fd.to_string());

    // In the child: move msg_write to the report fd and let it survive exec.
    unsafe {
        command.pre_exec(move || install_report_fd(msg_read, msg_write, target_fd));
    }

    let child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            close_fd(msg_read);
            close_fd(msg_write);
            return Err(spawn_error(name, e));
        }
    };

    // Parent keeps only the read end, so EOF arrives when the child exits.
    close_fd(msg_write);
    let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

    let reader = thread::Builder::new()
        .name("runmark-ipc".to_string())
        .spawn(move || {
            let (messages, stream_error) =
                FrameReader::new(reader_file).drain::<WorkerMessage>();
            WorkerReport {
                messages,
                stream_error,
            }
        });

    match reader {
        Ok(reader) => Ok(Spawned {
            child,
            reader: Some(reader),
        }),
        Err(source) => {
            let mut child = child;
            terminate(&mut child, Duration::ZERO);
            Err(BenchmarkExecutionError::Attach {
                what: "worker report reader".to_string(),
                source,
            })
        }
    }
}

#[cfg(not(unix))]
fn spawn_worker(mut command: Command, name: &str) -> Result<Spawned, BenchmarkExecutionError> {
    let child = command.spawn().map_err(|e| spawn_error(name, e))?;
    Ok(Spawned {
        child,
        reader: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use runmark_core::{SampleError, sampler_fn};
    use runmark_report::{MemoryWriter, RunPhase};
    use runmark_ipc::{FailureKind, WorkerHello};

    fn exited(code: i32) -> ExitStatus {
        #[cfg(unix)]
        {
            ExitStatus::from_raw(code << 8)
        }
        #[cfg(not(unix))]
        {
            std::os::windows::process::ExitStatusExt::from_raw(code as u32)
        }
    }

    fn hello() -> WorkerMessage {
        WorkerMessage::Hello(WorkerHello::for_workload("w"))
    }

    #[test]
    fn test_validate_rejects_duplicate_monitor() {
        let config = OrchestratorConfig::new()
            .with_monitor(MonitorSpec::cpu())
            .with_monitor(MonitorSpec::memory())
            .with_monitor(MonitorSpec::cpu());
        assert!(matches!(
            config.validate(),
            Err(BenchmarkExecutionError::InvalidConfig(msg)) if msg.contains("cpu")
        ));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        assert!(OrchestratorConfig::new().with_interval(Duration::ZERO).validate().is_err());
        assert!(
            OrchestratorConfig::new()
                .with_persist(PersistMode::Live {
                    every: Duration::ZERO
                })
                .validate()
                .is_err()
        );
        assert!(
            OrchestratorConfig::new()
                .with_writer(
                    WriterSpec::shared(MemoryWriter::new()).with_persist(PersistMode::Live {
                        every: Duration::ZERO
                    })
                )
                .validate()
                .is_err()
        );
        assert!(OrchestratorConfig::new().validate().is_ok());
    }

    #[test]
    fn test_writer_persist_mode_overrides_run_default() {
        let live = MemoryWriter::new();
        let completion = MemoryWriter::new();
        let config = OrchestratorConfig::new()
            .with_monitor(MonitorSpec::memory())
            .with_writer(WriterSpec::shared(live.clone()).with_persist(PersistMode::Live {
                every: Duration::from_millis(50),
            }))
            .with_writer(WriterSpec::shared(completion.clone()));
        assert_eq!(config.persist, PersistMode::OnCompletion);

        let workload = Workload::Command(runmark_core::CommandWorkload::new("sleep").arg("0.5"));
        run_under_benchmark(workload, config).unwrap();

        let live = live.state();
        assert!(live.snapshots.iter().any(|s| s.phase == RunPhase::Running));
        assert!(
            live.snapshots
                .iter()
                .any(|s| matches!(s.latest.get("memory"), Some(Some(_))))
        );
        assert_eq!(completion.state().snapshots.len(), 1);
    }

    #[test]
    fn test_custom_monitor_spec_builds_fresh_sampler() {
        let spec = MonitorSpec::custom("threads", || {
            Box::new(sampler_fn("threads", |pid| Err(SampleError::ProcessGone { pid })))
        });
        assert_eq!(spec.kind(), &MonitorKind::Custom("threads".to_string()));
        assert_eq!((spec.factory)().kind(), MonitorKind::Custom("threads".to_string()));
        assert!(MonitorSpec::builtin(&MonitorKind::Custom("x".to_string())).is_none());
    }

    #[test]
    fn test_outcome_for_plain_command() {
        let outcome = build_outcome(&exited(3), None).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_outcome_from_worker_completion() {
        let worker = WorkerReport {
            messages: vec![hello(), WorkerMessage::Complete { duration_nanos: 1_500_000_000 }],
            stream_error: None,
        };
        let outcome = build_outcome(&exited(0), Some(worker)).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.worker_seconds, Some(1.5));
    }

    #[test]
    fn test_worker_panic_is_recorded_not_fatal() {
        let worker = WorkerReport {
            messages: vec![
                hello(),
                WorkerMessage::Failure {
                    kind: FailureKind::Panic,
                    message: "boom".to_string(),
                    backtrace: None,
                },
            ],
            stream_error: None,
        };
        let outcome = build_outcome(&exited(101), Some(worker)).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_worker_not_found_fails_run() {
        let worker = WorkerReport {
            messages: vec![
                hello(),
                WorkerMessage::Failure {
                    kind: FailureKind::NotFound,
                    message: "workload not found: w".to_string(),
                    backtrace: None,
                },
            ],
            stream_error: None,
        };
        assert!(matches!(
            build_outcome(&exited(2), Some(worker)),
            Err(BenchmarkExecutionError::WorkloadNotFound(_))
        ));
    }

    #[test]
    fn test_worker_without_hello_is_protocol_error() {
        let worker = WorkerReport {
            messages: vec![WorkerMessage::Complete { duration_nanos: 1 }],
            stream_error: None,
        };
        assert!(matches!(
            build_outcome(&exited(0), Some(worker)),
            Err(BenchmarkExecutionError::Protocol { .. })
        ));
    }

    #[test]
    fn test_silent_worker_marks_outcome_failed() {
        let outcome = build_outcome(&exited(0), Some(WorkerReport::default())).unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let workload = Workload::command("/nonexistent/runmark-test-binary");
        let err = run_under_benchmark(workload, OrchestratorConfig::new()).unwrap_err();
        assert!(matches!(err, BenchmarkExecutionError::SpawnFailure { .. }));
    }

    /// Writes `msg` through `report_fd`, then reads it back through `keep`
    #[cfg(unix)]
    fn round_trip(report_fd: RawFd, keep: RawFd, msg: &[u8]) -> Vec<u8> {
        use std::io::{Read, Write};

        let mut sink = unsafe { std::fs::File::from_raw_fd(report_fd) };
        sink.write_all(msg).unwrap();
        drop(sink);

        let mut source = unsafe { std::fs::File::from_raw_fd(keep) };
        // Other tests fork concurrently and may hold the write end, so read
        // exactly the message instead of waiting for EOF.
        let mut buf = vec![0u8; msg.len()];
        source.read_exact(&mut buf).unwrap();
        buf
    }

    #[cfg(unix)]
    #[test]
    fn test_report_fd_when_read_end_holds_the_target_number() {
        // A fresh process gets (3, 4) from pipe(), so the read end sits on fd 3.
        let (read, write) = create_pipe().unwrap();
        let keep = unsafe { libc::dup(read) };
        assert!(keep >= 0);

        install_report_fd(read, write, read).unwrap();

        let flags = unsafe { libc::fcntl(read, libc::F_GETFD) };
        assert_ne!(flags, -1, "report fd was closed");
        assert_eq!(flags & libc::FD_CLOEXEC, 0);

        assert_eq!(round_trip(read, keep, b"hello"), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_report_fd_moved_to_free_target() {
        let (read, write) = create_pipe().unwrap();
        let keep = unsafe { libc::dup(read) };
        let target = 200;

        install_report_fd(read, write, target).unwrap();

        let flags = unsafe { libc::fcntl(target, libc::F_GETFD) };
        assert_eq!(flags & libc::FD_CLOEXEC, 0);

        assert_eq!(round_trip(target, keep, b"frame"), b"frame");
    }
}
