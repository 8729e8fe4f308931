//! Structured external tool invocation
//!
//! Tools are launched directly with explicit argument lists; no shell is
//! involved, so sample names never get interpreted as shell syntax.

use crate::error::{PipelineError, Result};
use log::debug;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

/// One executable with its argument list and optional stdout redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub stdout: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stderr(Stdio::inherit());
        command
    }

    fn spawn(&self, command: &mut Command) -> Result<Child> {
        command.spawn().map_err(|source| PipelineError::Spawn {
            program: self.program.clone(),
            source,
        })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(path) = &self.stdout {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

/// A stage's process layout: one tool, or two joined by a pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Single(ToolCommand),
    Pipe {
        upstream: ToolCommand,
        downstream: ToolCommand,
    },
}

impl Invocation {
    pub fn programs(&self) -> Vec<&str> {
        match self {
            Invocation::Single(cmd) => vec![cmd.program.as_str()],
            Invocation::Pipe {
                upstream,
                downstream,
            } => vec![upstream.program.as_str(), downstream.program.as_str()],
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Single(cmd) => write!(f, "{}", cmd),
            Invocation::Pipe {
                upstream,
                downstream,
            } => write!(f, "{} | {}", upstream, downstream),
        }
    }
}

/// Completion signal of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageStatus {
    pub success: bool,
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
}

impl StageStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(0),
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            success: false,
            code: Some(code),
        }
    }
}

impl From<ExitStatus> for StageStatus {
    fn from(status: ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Executes stage invocations and reports how they finished
pub trait CommandRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<StageStatus>;
}

/// Runs invocations as real child processes, blocking until they exit
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn with the stdout redirect applied; a redirect file created for a
    /// process that never started is removed again
    fn spawn_redirected(cmd: &ToolCommand, command: &mut Command) -> Result<Child> {
        let Some(path) = &cmd.stdout else {
            return cmd.spawn(command);
        };
        command.stdout(Stdio::from(File::create(path)?));
        cmd.spawn(command).map_err(|err| {
            let _ = fs::remove_file(path);
            err
        })
    }

    fn reap(child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();
    }

    fn run_single(&self, cmd: &ToolCommand) -> Result<StageStatus> {
        let mut command = cmd.to_command();
        let mut child = Self::spawn_redirected(cmd, &mut command)?;
        Ok(child.wait()?.into())
    }

    fn run_pipe(&self, upstream: &ToolCommand, downstream: &ToolCommand) -> Result<StageStatus> {
        let mut up_command = upstream.to_command();
        up_command.stdout(Stdio::piped());
        let mut up_child = upstream.spawn(&mut up_command)?;

        let mut down_command = downstream.to_command();
        if let Some(pipe) = up_child.stdout.take() {
            down_command.stdin(Stdio::from(pipe));
        }
        let down_child = Self::spawn_redirected(downstream, &mut down_command);
        // Close the parent's copy of the pipe's read end so the upstream
        // gets SIGPIPE once the downstream exits.
        drop(down_command);

        let mut down_child = match down_child {
            Ok(child) => child,
            Err(err) => {
                Self::reap(&mut up_child);
                return Err(err);
            }
        };

        let down_status: StageStatus = match down_child.wait() {
            Ok(status) => status.into(),
            Err(err) => {
                Self::reap(&mut up_child);
                return Err(err.into());
            }
        };
        let up_status: StageStatus = up_child.wait()?.into();
        debug!(
            "Pipe finished: {} -> {:?}, {} -> {:?}",
            upstream.program, up_status.code, downstream.program, down_status.code
        );

        Ok(Self::pipe_status(up_status, down_status))
    }

    /// The first failing process decides, except that an upstream killed by a
    /// signal after the downstream failed reports the downstream's exit
    fn pipe_status(up: StageStatus, down: StageStatus) -> StageStatus {
        match (up.success, down.success) {
            (true, _) => down,
            (false, false) if up.code.is_none() => down,
            (false, _) => up,
        }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<StageStatus> {
        debug!("Running: {}", invocation);
        match invocation {
            Invocation::Single(cmd) => self.run_single(cmd),
            Invocation::Pipe {
                upstream,
                downstream,
            } => self.run_pipe(upstream, downstream),
        }
    }
}
