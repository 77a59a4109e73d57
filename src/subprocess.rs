//! Subprocess invocation with bounded retries
//!
//! Every external tool (git, the release-manifest tool, user build commands)
//! goes through this module so that failures come back as `Error::Execution`
//! carrying the program name and captured output.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};

/// Captured result of one subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, for error reports and log files.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// How often a failing operation is attempted and how long to wait between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned.
    pub fn run<T, F>(&self, description: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "{} failed (attempt {} of {}), retrying in {:?}: {}",
                        description, attempt, max_attempts, self.backoff, e
                    );
                    if !self.backoff.is_zero() {
                        thread::sleep(self.backoff);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Render a command line for logs and error messages.
pub fn render_command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut parts = vec![program.to_string()];
    for arg in args {
        let arg = arg.as_ref().to_string_lossy();
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("\"{}\"", arg));
        } else {
            parts.push(arg.into_owned());
        }
    }
    parts.join(" ")
}

/// Run a program and capture its output. A non-zero exit is not an error here;
/// only failing to start the process is.
pub fn run_program<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    env: &[(String, String)],
) -> Result<CommandOutput> {
    let rendered = render_command(program, args);
    debug!("Running {}", rendered);

    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    for (key, value) in env {
        command.env(key, value);
    }

    let output = command
        .output()
        .map_err(|e| Error::execution(program, format!("could not run {}", rendered), e.to_string()))?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a program and return its trimmed stdout, failing on a non-zero exit.
pub fn check_program<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    env: &[(String, String)],
) -> Result<String> {
    let output = run_program(program, args, cwd, env)?;
    if !output.success() {
        return Err(Error::execution(
            program,
            format!(
                "{} exited with {}",
                render_command(program, args),
                describe_exit(output.code)
            ),
            output.combined(),
        ));
    }
    Ok(output.stdout.trim().to_string())
}

/// Run a shell command line inside `cwd`.
pub fn run_shell(command_line: &str, cwd: &Path) -> Result<CommandOutput> {
    run_program("sh", &["-c", command_line], Some(cwd), &[])
}

pub(crate) fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}
