// src/executor.rs

//! Build step execution
//!
//! Runs the configure, compile and install commands as child processes
//! inside an out-of-tree build directory, with the component's build
//! environment and a hard per-step timeout. Output is drained on reader
//! threads while waiting, so a chatty build cannot fill the pipe and
//! deadlock against the timeout wait. On failure the tail of the combined
//! output goes into the error, which is usually all a log reader needs.

use crate::environment::BuildEnvironment;
use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Lines of combined output kept in a failure error
const OUTPUT_TAIL_LINES: usize = 40;

/// Which pipeline phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Configure,
    Compile,
    Install,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Configure => "configure",
            StepKind::Compile => "compile",
            StepKind::Install => "install",
        }
    }
}

/// One command to run in the build directory
#[derive(Debug, Clone)]
pub struct BuildStep {
    pub kind: StepKind,
    pub program: String,
    pub args: Vec<String>,
}

impl BuildStep {
    pub fn new(kind: StepKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
        }
    }
}

/// Output of a successful step
#[derive(Debug)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs build steps with a shared environment and timeout
pub struct BuildExecutor {
    build_dir: PathBuf,
    env: BuildEnvironment,
    timeout: Duration,
}

impl BuildExecutor {
    pub fn new(build_dir: impl Into<PathBuf>, env: BuildEnvironment, timeout: Duration) -> Self {
        Self {
            build_dir: build_dir.into(),
            env,
            timeout,
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Run `steps` in order, stopping at the first failure
    pub fn run_all(&self, steps: &[BuildStep]) -> Result<()> {
        for step in steps {
            self.run(step)?;
        }
        Ok(())
    }

    /// Run one step to completion or timeout
    pub fn run(&self, step: &BuildStep) -> Result<StepOutput> {
        info!(
            "Running {} step: {} {}",
            step.kind.as_str(),
            step.program,
            step.args.join(" ")
        );

        let mut command = Command::new(&step.program);
        command
            .args(&step.args)
            .current_dir(&self.build_dir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in self.env.iter() {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| Error::BuildStepFailed {
            step: step.kind.as_str().to_string(),
            exit_code: -1,
            output_tail: format!("failed to spawn '{}': {e}", step.program),
        })?;

        // Take the pipes before waiting; a full pipe would otherwise
        // block the child forever.
        let stdout_handle = drain(child.stdout.take());
        let stderr_handle = drain(child.stderr.take());

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                warn!(
                    "{} step exceeded {}s, killing",
                    step.kind.as_str(),
                    self.timeout.as_secs()
                );
                child.kill()?;
                child.wait()?;
                return Err(Error::Timeout {
                    operation: format!("{} step", step.kind.as_str()),
                    timeout: self.timeout,
                });
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();

        if !status.success() {
            let exit_code = status.code().unwrap_or(-1);
            debug!(
                "{} step failed with exit code {}",
                step.kind.as_str(),
                exit_code
            );
            return Err(Error::BuildStepFailed {
                step: step.kind.as_str().to_string(),
                exit_code,
                output_tail: output_tail(&stdout, &stderr),
            });
        }

        Ok(StepOutput { stdout, stderr })
    }
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    })
}

/// The last [`OUTPUT_TAIL_LINES`] lines of stdout and stderr combined
fn output_tail(stdout: &str, stderr: &str) -> String {
    let combined: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let start = combined.len().saturating_sub(OUTPUT_TAIL_LINES);
    combined[start..].join("\n")
}
