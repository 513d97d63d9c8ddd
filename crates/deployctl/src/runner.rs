//! External tool invocation.
//!
//! Every step of the pipeline is a call to `terraform`, `aws`, `docker` or
//! `kubectl`. Steps describe the call as a [`CommandSpec`] and hand it to a
//! [`CommandRunner`]; the real runner spawns processes, tests substitute a
//! scripted one.
use anyhow::Result;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};
use crate::errors::{CliError, CliErrorKind};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub cwd: Option<PathBuf>,
    /// Forward the tool's stdout to our stderr as it runs. Stderr is still
    /// captured, then echoed, so failures keep their explanation.
    pub stream: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self { Self { program: program.into(), ..Default::default() } }
    pub fn arg(mut self, a: impl Into<String>) -> Self { self.args.push(a.into()); self }
    pub fn args<I, S>(mut self, args: I) -> Self where I: IntoIterator<Item = S>, S: Into<String> {
        self.args.extend(args.into_iter().map(Into::into)); self
    }
    pub fn stdin(mut self, input: impl Into<String>) -> Self { self.stdin = Some(input.into()); self }
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self { self.cwd = Some(dir.into()); self }
    pub fn streamed(mut self) -> Self { self.stream = true; self }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            if a.is_empty() || a.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '{' | '}')) {
                write!(f, " '{}'", a.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {a}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self { Self { status: Some(0), stdout: stdout.into(), stderr: String::new() } }
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self { Self { status: Some(code), stdout: String::new(), stderr: stderr.into() } }
    pub fn success(&self) -> bool { self.status == Some(0) }
}

pub trait CommandRunner {
    /// Run the command to completion. A non-zero exit is reported through
    /// [`CommandOutput::status`]; `Err` means the command could not be started.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> { (**self).run(spec) }
}

/// Spawns real processes, resolving the program through `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let bin = which::which(&spec.program)
            .map_err(|e| CliError::with_source(CliErrorKind::Runtime(format!("{} not found in PATH", spec.program)), e))?;
        let mut cmd = Command::new(bin);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd { cmd.current_dir(dir); }
        cmd.stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        if spec.stream {
            cmd.stdout(Stdio::from(std::io::stderr())).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        info!(event="runner.spawn", command=%spec);
        let mut child = cmd.spawn()
            .map_err(|e| CliError::with_source(CliErrorKind::Runtime(format!("failed to spawn {}", spec.program)), e))?;
        // the tool may exit before reading all of stdin; reap it regardless
        let mut stdin_err = None;
        if let Some(input) = &spec.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                if let Err(e) = pipe.write_all(input.as_bytes()) {
                    warn!(event="runner.stdin_failed", program=%spec.program, error=%e);
                    stdin_err = Some(e);
                }
            }
        }
        let out = child.wait_with_output()?;
        let output = CommandOutput {
            status: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        };
        if spec.stream && !output.stderr.is_empty() { eprint!("{}", output.stderr); }
        debug!(event="runner.exit", program=%spec.program, status=?output.status, stdout_len=output.stdout.len(), stderr_len=output.stderr.len());
        if let (Some(e), true) = (stdin_err, output.success()) {
            return Err(CliError::with_source(CliErrorKind::Runtime(format!("{} exited before reading its input", spec.program)), e).into());
        }
        Ok(output)
    }
}

const CREDENTIAL_MARKERS: &[&str] = &[
    "ExpiredToken",
    "UnrecognizedClientException",
    "InvalidClientTokenId",
    "AccessDenied",
    "Unable to locate credentials",
    "NoCredentialProviders",
    "No valid credential sources",
];

/// Whether a tool's stderr describes a credential/authorization failure.
pub fn is_credential_failure(stderr: &str) -> bool { CREDENTIAL_MARKERS.iter().any(|m| stderr.contains(m)) }

/// Run a command and turn a non-zero exit into a classified [`CliError`].
pub fn run_checked<R: CommandRunner + ?Sized>(runner: &R, spec: &CommandSpec) -> Result<CommandOutput> {
    let output = runner.run(spec)?;
    if output.success() { return Ok(output); }
    Err(failure_error(spec, &output).into())
}

pub fn failure_error(spec: &CommandSpec, output: &CommandOutput) -> CliError {
    let status = output.status.map(|c| c.to_string()).unwrap_or_else(|| "signal".into());
    let detail = last_lines(&output.stderr, 5);
    let msg = if detail.is_empty() { format!("`{spec}` exited with {status}") } else { format!("`{spec}` exited with {status}: {detail}") };
    if is_credential_failure(&output.stderr) { CliError::new(CliErrorKind::Auth(msg)) } else { CliError::new(CliErrorKind::Runtime(msg)) }
}

fn last_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_awkward_args() {
        let spec = CommandSpec::new("kubectl").args(["patch", "serviceaccount", "sa"]).arg("-p").arg(r#"{"a":1}"#);
        assert_eq!(spec.to_string(), r#"kubectl patch serviceaccount sa -p '{"a":1}'"#);
        assert_eq!(CommandSpec::new("echo").arg("it's here").to_string(), r"echo 'it'\''s here'");
    }

    #[test]
    fn failures_are_classified() {
        let spec = CommandSpec::new("aws").args(["ecr", "get-login-password"]);
        let auth = failure_error(&spec, &CommandOutput::failed(255, "An error occurred (ExpiredTokenException) when calling"));
        assert_eq!(auth.kind.code(), 50);
        let rt = failure_error(&spec, &CommandOutput::failed(1, "line1\nline2\n"));
        assert_eq!(rt.kind.code(), 20);
        assert!(rt.to_string().contains("line1 | line2"));
    }

    #[test]
    fn early_exit_keeps_status_and_stderr() {
        let input = "x".repeat(1 << 20);
        let spec = CommandSpec::new("sh").args(["-c", "echo 'refusing input' >&2; exit 3"]).stdin(input);
        let out = ProcessRunner.run(&spec).unwrap();
        assert_eq!(out.status, Some(3));
        assert!(out.stderr.contains("refusing input"));
        assert_eq!(failure_error(&spec, &out).kind.code(), 20);
    }

    #[test]
    fn streamed_commands_still_capture_stderr() {
        let spec = CommandSpec::new("sh").args(["-c", "echo progress; echo 'Error: AccessDenied' >&2; exit 1"]).streamed();
        let out = ProcessRunner.run(&spec).unwrap();
        assert!(out.stdout.is_empty());
        assert!(out.stderr.contains("AccessDenied"));
        assert_eq!(failure_error(&spec, &out).kind.code(), 50);
    }

    #[test]
    fn missing_binary_is_runtime_error() {
        let err = ProcessRunner.run(&CommandSpec::new("definitely-not-a-real-tool-xyz")).unwrap_err();
        assert_eq!(crate::errors::classify_exit_code(&err), 20);
        assert!(err.to_string().contains("not found in PATH"));
    }
}
