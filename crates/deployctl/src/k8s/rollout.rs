//! Rollout wait and failure diagnostics.
use anyhow::Result;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use crate::errors::{CliError, CliErrorKind};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

const EVENT_LINES: usize = 50;
/// What `kubectl rollout status` prints when `--timeout` elapses.
const TIMEOUT_MARKER: &str = "timed out waiting";
const LOG_TAIL: u32 = 100;

#[derive(Debug, Clone)]
pub struct RolloutParams<'a> {
    pub deployment: &'a str,
    pub namespace: &'a str,
    pub app_label: &'a str,
    pub timeout: Duration,
}

pub fn status_command(p: &RolloutParams<'_>) -> CommandSpec {
    CommandSpec::new("kubectl")
        .args(["rollout", "status"])
        .arg(format!("deployment/{}", p.deployment))
        .args(["-n", p.namespace])
        .arg(format!("--timeout={}s", p.timeout.as_secs().max(1)))
        .streamed()
}

/// Commands whose output makes up the diagnostic bundle, with section titles.
pub fn diagnostic_commands(p: &RolloutParams<'_>) -> Vec<(&'static str, CommandSpec)> {
    let selector = format!("app={}", p.app_label);
    let kubectl = || CommandSpec::new("kubectl");
    vec![
        ("deployment", kubectl().args(["describe", "deployment", p.deployment, "-n", p.namespace])),
        ("pods", kubectl().args(["get", "pods", "-n", p.namespace, "-l", selector.as_str(), "-o", "wide"])),
        ("pod details", kubectl().args(["describe", "pods", "-n", p.namespace, "-l", selector.as_str()])),
        ("events", kubectl().args(["get", "events", "-n", p.namespace, "--sort-by=.lastTimestamp"])),
        ("logs", kubectl().args(["logs", "-n", p.namespace, "-l", selector.as_str(), "--all-containers=true", "--prefix"]).arg(format!("--tail={LOG_TAIL}"))),
    ]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticBundle {
    pub sections: Vec<(String, String)>,
}

impl DiagnosticBundle {
    /// Run every diagnostic command. A failing command is recorded in its
    /// section rather than aborting collection.
    pub fn collect<R: CommandRunner + ?Sized>(runner: &R, p: &RolloutParams<'_>) -> Self {
        let mut sections = Vec::new();
        for (title, spec) in diagnostic_commands(p) {
            let body = match runner.run(&spec) {
                Ok(out) if out.success() => {
                    if title == "events" { tail(&out.stdout, EVENT_LINES) } else { out.stdout }
                }
                Ok(out) => format!("<`{spec}` exited with {:?}>\n{}", out.status, out.stderr),
                Err(e) => format!("<`{spec}` could not run: {e}>"),
            };
            sections.push((title.to_string(), body));
        }
        Self { sections }
    }

    pub fn render(&self) -> String {
        let mut s = String::new();
        for (title, body) in &self.sections {
            let _ = writeln!(s, "===== {title} =====");
            let _ = writeln!(s, "{}", body.trim_end());
        }
        s
    }

    pub fn write_to(&self, dir: &Path, build_id: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(CliError::from)?;
        let path = dir.join(format!("rollout-{build_id}.log"));
        fs::write(&path, self.render()).map_err(CliError::from)?;
        Ok(path)
    }
}

fn tail(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Block until the deployment has rolled out. On failure, gather diagnostics,
/// print them, keep a copy under `diagnostics_dir`, and fail with a rollout error.
pub fn wait<R: CommandRunner + ?Sized>(runner: &R, p: &RolloutParams<'_>, diagnostics_dir: &Path, build_id: &str) -> Result<()> {
    let spec = status_command(p);
    let out = runner.run(&spec)?;
    if out.success() {
        info!(event="rollout.complete", deployment=%p.deployment, namespace=%p.namespace);
        return Ok(());
    }
    warn!(event="rollout.failed", deployment=%p.deployment, status=?out.status, "collecting diagnostics");
    let bundle = DiagnosticBundle::collect(runner, p);
    eprintln!("{}", bundle.render());
    let saved = match bundle.write_to(diagnostics_dir, build_id) {
        Ok(path) => { info!(event="rollout.diagnostics", path=%path.display()); Some(path) }
        Err(e) => { warn!(event="rollout.diagnostics_write_failed", error=%e); None }
    };
    let mut msg = failure_message(p, &out);
    if let Some(path) = saved { let _ = write!(msg, " (diagnostics: {})", path.display()); }
    Err(CliError::new(CliErrorKind::Rollout(msg)).into())
}

fn failure_message(p: &RolloutParams<'_>, out: &CommandOutput) -> String {
    if out.stderr.contains(TIMEOUT_MARKER) {
        return format!("deployment {} did not roll out within {}s", p.deployment, p.timeout.as_secs());
    }
    let status = out.status.map(|c| c.to_string()).unwrap_or_else(|| "signal".into());
    match out.stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
        Some(detail) => format!("rollout status for deployment {} exited with {status}: {detail}", p.deployment),
        None => format!("rollout status for deployment {} exited with {status}", p.deployment),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;

    fn params() -> RolloutParams<'static> {
        RolloutParams { deployment: "flask-app", namespace: "web", app_label: "flask-app", timeout: Duration::from_secs(300) }
    }

    #[test]
    fn status_uses_bounded_timeout() {
        assert_eq!(status_command(&params()).to_string(), "kubectl rollout status deployment/flask-app -n web --timeout=300s");
    }

    #[test]
    fn success_collects_nothing() {
        let runner = ScriptedRunner::new();
        let dir = tempfile::tempdir().unwrap();
        wait(&runner, &params(), dir.path(), "1").unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn failure_gathers_describe_events_and_logs() {
        let events: String = (0..80).map(|i| format!("event {i}\n")).collect();
        let runner = ScriptedRunner::new()
            .on("kubectl rollout status", CommandOutput::failed(1, "error: timed out waiting for the condition"))
            .on("kubectl get events", CommandOutput::ok(events))
            .on("kubectl logs", CommandOutput::failed(1, "container is waiting to start: ImagePullBackOff"));
        let dir = tempfile::tempdir().unwrap();
        let err = wait(&runner, &params(), dir.path(), "77").unwrap_err();
        assert_eq!(crate::errors::classify_exit_code(&err), 60);
        assert!(err.to_string().contains("did not roll out within 300s"));
        assert!(runner.position("kubectl describe deployment flask-app").is_some());
        assert!(runner.position("kubectl get events").is_some());
        assert!(runner.position("kubectl logs").is_some());

        let saved = fs::read_to_string(dir.path().join("rollout-77.log")).unwrap();
        assert!(saved.contains("===== events ====="));
        assert!(saved.contains("event 79"));
        assert!(!saved.contains("event 29\n"), "events are trimmed to the most recent lines");
        assert!(saved.contains("ImagePullBackOff"));
    }

    #[test]
    fn immediate_failure_is_not_reported_as_timeout() {
        let p = params();
        let runner = ScriptedRunner::new()
            .on("kubectl rollout status", CommandOutput::failed(1, "Error from server (NotFound): deployments.apps \"flask-app\" not found"));
        let dir = tempfile::tempdir().unwrap();
        let err = wait(&runner, &p, dir.path(), "5").unwrap_err();
        let msg = err.to_string();
        assert_eq!(crate::errors::classify_exit_code(&err), 60);
        assert!(msg.contains("exited with 1"), "{msg}");
        assert!(msg.contains("not found"), "{msg}");
        assert!(!msg.contains("did not roll out within"), "{msg}");
    }
}
