//! Evaluation by execution: the rendered program is piped into an external
//! command (compiler plus benchmark harness) that prints the measured time in
//! seconds as the last line of its output.

use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use super::Evaluator;
use crate::search::tree::Node;
use crate::search::Space;

/// How often a running command is checked for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Reasons a program could not be measured.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("failed to run evaluator command: {0}")]
    Io(#[from] io::Error),

    #[error("evaluator exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("evaluator did not finish within {0:?}")]
    Timeout(Duration),

    #[error("evaluator output is not a number: {0:?}")]
    Unparseable(String),
}

/// Runs `sh -c <command>` for every measured program.
#[derive(Clone, Debug)]
pub struct CommandEvaluator {
    command: String,
    timeout: Duration,
}

impl CommandEvaluator {
    /// Default upper bound on a single measurement.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Evaluates with `command` and the default timeout.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Replaces the upper bound on a single measurement.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The shell command programs are piped into.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Upper bound on a single measurement.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Feeds `program` to the command and parses the reported cost.
    ///
    /// The command runs in its own process group. Once it exits or times out,
    /// everything left in that group is killed, so no background process
    /// outlives the measurement.
    pub fn run(&self, program: &str) -> Result<f64, EvaluationError> {
        let timer = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .process_group(0)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are drained on separate threads so that a chatty command can't
        // block on a full pipe while this thread waits for it.
        let writer = child.stdin.take().map(|mut stdin| {
            let program = program.to_owned();
            thread::spawn(move || stdin.write_all(program.as_bytes()))
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = self.wait(&mut child);
        kill_group(&mut child);
        // The command may legitimately exit without reading its input.
        if let Some(writer) = writer {
            drop(writer.join());
        }
        let stdout = collect(stdout);
        let stderr = collect(stderr);
        let status = status?;
        let (stdout, stderr) = (stdout?, stderr?);
        debug!(elapsed = ?timer.elapsed(), %status, "evaluator finished");

        if !status.success() {
            return Err(EvaluationError::Failed {
                status,
                stderr: stderr.trim().to_owned(),
            });
        }
        parse_cost(&stdout)
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, EvaluationError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(EvaluationError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Kills the process group led by `child` and reaps `child`. Processes forked
/// by the command hold the output pipes open, so the readers only finish once
/// the whole group is gone.
fn kill_group(child: &mut Child) {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-s", "KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = killed {
        debug!("failed to kill process group {group}: {e}");
    }
    // The group is usually empty by now, and the leader may already be reaped.
    drop(child.kill());
    drop(child.wait());
}

impl<S> Evaluator<S> for CommandEvaluator
where
    S: Space,
    S::Program: fmt::Display,
{
    fn measure(&mut self, node: &Node<S>) -> anyhow::Result<f64> {
        Ok(self.run(&node.program().to_string())?)
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut output = String::new();
        let _ = pipe.read_to_string(&mut output)?;
        Ok(output)
    })
}

fn collect(handle: Option<JoinHandle<io::Result<String>>>) -> Result<String, EvaluationError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| io::Error::other("output reader panicked"))?
            .map_err(EvaluationError::from),
        None => Ok(String::new()),
    }
}

/// The cost is the last non-empty line of the output.
fn parse_cost(output: &str) -> Result<f64, EvaluationError> {
    let line = output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or_default();
    line.parse()
        .map_err(|_| EvaluationError::Unparseable(line.to_owned()))
}
