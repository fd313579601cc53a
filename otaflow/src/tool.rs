/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Execution of the external collaborators (openssl, avbtool, the OTA patcher).
//!
//! Every invocation goes through [`ToolRunner`] so that callers always get an
//! explicit [`Outcome`] back instead of a silently ignored exit status.

use std::{
    ffi::{OsStr, OsString},
    fmt,
    io::{self, Read, Write},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::debug;

/// Maximum number of trailing stderr bytes kept for error reports.
const STDERR_TAIL_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Command line is empty")]
    EmptyCommand,
    #[error("Failed to run command: {0}")]
    Spawn(String, #[source] io::Error),
    #[error("Failed to wait for command: {0}")]
    Wait(String, #[source] io::Error),
    #[error("Command failed with {}: {command}", describe_code(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "no exit code (terminated by signal)".to_owned(),
    }
}

/// A single program invocation with its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
        }
    }

    /// Build an invocation from a configured argv, where the first element is
    /// the program and the rest are leading arguments (eg. an interpreter
    /// followed by a script path).
    pub fn from_argv<S: AsRef<OsStr>>(argv: &[S]) -> Result<Self, Error> {
        let (program, rest) = argv.split_first().ok_or(Error::EmptyCommand)?;

        Ok(Self::new(program).args(rest))
    }

    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Whether the invocation contains `flag` immediately followed by `value`.
    pub fn has_flag_value(&self, flag: &str, value: impl AsRef<OsStr>) -> bool {
        self.args
            .windows(2)
            .any(|w| w[0] == OsStr::new(flag) && w[1] == value.as_ref())
    }

    /// The value following `flag`, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .windows(2)
            .find(|w| w[0] == OsStr::new(flag))
            .map(|w| w[1].as_os_str())
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;

        for arg in &self.args {
            let arg = arg.to_string_lossy();

            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }

        Ok(())
    }
}

/// Render a pipeline the way a shell would show it.
pub fn display_pipeline(pipeline: &[Invocation]) -> String {
    pipeline
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Result of running an external tool to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed { code: Option<i32>, stderr: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Convert a failed outcome into an [`Error::Failed`] describing `pipeline`.
    pub fn check(self, pipeline: &[Invocation]) -> Result<(), Error> {
        match self {
            Self::Success => Ok(()),
            Self::Failed { code, stderr } => Err(Error::Failed {
                command: display_pipeline(pipeline),
                code,
                stderr,
            }),
        }
    }
}

/// Runs a pipeline of external commands. Each command's stdout is connected to
/// the next command's stdin. The first command inherits stdin and the last
/// command inherits stdout so interactive prompts keep working.
pub trait ToolRunner {
    fn run(&mut self, pipeline: &[Invocation]) -> Result<Outcome, Error>;
}

/// [`ToolRunner`] that spawns real processes.
#[derive(Debug, Default)]
pub struct ProcessRunner;

struct Running<'a> {
    invocation: &'a Invocation,
    child: Child,
    stderr: Option<JoinHandle<String>>,
}

/// Copy the child's stderr to our own stderr while keeping the tail around.
fn mirror_stderr(mut reader: impl Read) -> String {
    let mut tail = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };

        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(&buf[..n]);
        let _ = stderr.flush();

        tail.extend_from_slice(&buf[..n]);
        if tail.len() > STDERR_TAIL_SIZE {
            tail.drain(..tail.len() - STDERR_TAIL_SIZE);
        }
    }

    String::from_utf8_lossy(&tail).into_owned()
}

fn kill_all(running: &mut [Running<'_>]) {
    for r in running {
        let _ = r.child.kill();
        let _ = r.child.wait();
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&mut self, pipeline: &[Invocation]) -> Result<Outcome, Error> {
        if pipeline.is_empty() {
            return Err(Error::EmptyCommand);
        }

        debug!("Running: {}", display_pipeline(pipeline));

        let mut running = Vec::<Running<'_>>::with_capacity(pipeline.len());
        let mut previous_stdout = None;

        for (i, invocation) in pipeline.iter().enumerate() {
            let last = i == pipeline.len() - 1;
            let mut command = invocation.to_command();

            match previous_stdout.take() {
                Some(out) => command.stdin(Stdio::from(out)),
                None => command.stdin(Stdio::inherit()),
            };
            command.stdout(if last { Stdio::inherit() } else { Stdio::piped() });
            command.stderr(Stdio::piped());

            let mut child = match command.spawn() {
                Ok(c) => c,
                Err(e) => {
                    kill_all(&mut running);
                    return Err(Error::Spawn(invocation.to_string(), e));
                }
            };

            if !last {
                previous_stdout = child.stdout.take();
            }

            let stderr = child
                .stderr
                .take()
                .map(|s| thread::spawn(move || mirror_stderr(s)));

            running.push(Running {
                invocation,
                child,
                stderr,
            });
        }

        // Every child is reaped even if waiting for an earlier one fails.
        let stages = running
            .into_iter()
            .map(|mut r| {
                let status = r.child.wait();
                let stderr = r
                    .stderr
                    .take()
                    .and_then(|h| h.join().ok())
                    .unwrap_or_default();

                (r.invocation, status, stderr)
            })
            .collect::<Vec<_>>();

        combine_stages(stages)
    }
}

/// Reduce the per-stage wait results to a single outcome. A failure to wait
/// takes precedence. Otherwise the first non-zero exit is reported.
fn combine_stages(
    stages: Vec<(&Invocation, io::Result<ExitStatus>, String)>,
) -> Result<Outcome, Error> {
    let mut outcome = Outcome::Success;

    for (invocation, status, stderr) in stages {
        let status = status.map_err(|e| Error::Wait(invocation.to_string(), e))?;

        debug!("{} exited with {status}", invocation.program().to_string_lossy());

        if !status.success() && outcome.is_success() {
            outcome = Outcome::Failed {
                code: status.code(),
                stderr,
            };
        }
    }

    Ok(outcome)
}
