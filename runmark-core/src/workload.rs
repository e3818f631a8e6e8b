//! Workload Descriptions
//!
//! What the orchestrator runs: either a function registered with
//! `#[runmark::workload]` (executed by re-launching the current binary in
//! worker mode) or an arbitrary external command.

use crate::{WorkloadDef, find_workload};
use std::ffi::OsString;
use std::path::PathBuf;

/// A unit of work to run as an isolated child process
#[derive(Debug, Clone)]
pub enum Workload {
    /// Registered zero-argument function, run in a re-executed worker
    Registered(&'static WorkloadDef),
    /// External program
    Command(CommandWorkload),
}

impl Workload {
    /// Look up a registered function by name
    pub fn registered(name: &str) -> Option<Self> {
        find_workload(name).map(Workload::Registered)
    }

    /// External program with no arguments yet
    pub fn command(program: impl Into<String>) -> Self {
        Workload::Command(CommandWorkload::new(program))
    }

    /// Identity recorded as the record's function name
    pub fn function_name(&self) -> String {
        match self {
            Workload::Registered(def) => def.name.to_string(),
            Workload::Command(cmd) => cmd.program.clone(),
        }
    }

    /// Declared metadata, in declaration order
    pub fn annotations(&self) -> Vec<(String, String)> {
        match self {
            Workload::Registered(def) => def
                .annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Workload::Command(cmd) => vec![
                ("program".to_string(), cmd.program.clone()),
                ("args".to_string(), cmd.args.join(" ")),
            ],
        }
    }
}

impl From<CommandWorkload> for Workload {
    fn from(cmd: CommandWorkload) -> Self {
        Workload::Command(cmd)
    }
}

impl From<&'static WorkloadDef> for Workload {
    fn from(def: &'static WorkloadDef) -> Self {
        Workload::Registered(def)
    }
}

/// External program invocation
#[derive(Debug, Clone, PartialEq)]
pub struct CommandWorkload {
    /// Program name or path
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(OsString, OsString)>,
    /// Working directory; inherits the caller's when `None`
    pub current_dir: Option<PathBuf>,
}

impl CommandWorkload {
    /// Program with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the child in `dir`
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// `std::process::Command` for this invocation, without stdio setup
    pub fn to_command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}
