use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};
use crate::errors::{CliError, CliErrorKind};
use crate::naming::is_valid_hostname;
use crate::runner::{run_checked, CommandRunner, CommandSpec};

pub fn hostname_command(ingress: &str, namespace: &str) -> CommandSpec {
    CommandSpec::new("kubectl")
        .args(["get", "ingress", ingress, "-n", namespace, "-o"])
        .arg("jsonpath={.status.loadBalancer.ingress[0].hostname}")
}

/// Poll the ingress until the load balancer publishes a hostname.
pub async fn wait_for_hostname<R: CommandRunner + ?Sized>(runner: &R, ingress: &str, namespace: &str, timeout: Duration, interval: Duration) -> Result<String> {
    let spec = hostname_command(ingress, namespace);
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let out = run_checked(runner, &spec)?;
        let host = out.stdout.trim().trim_matches('\'');
        if !host.is_empty() {
            if !is_valid_hostname(host) {
                return Err(CliError::new(CliErrorKind::Runtime(format!("ingress {ingress} reported an invalid hostname '{host}'"))).into());
            }
            info!(event="ingress.hostname", ingress, hostname=%host, attempt);
            return Ok(host.to_string());
        }
        if Instant::now() + interval > deadline {
            return Err(CliError::new(CliErrorKind::Runtime(format!(
                "ingress {ingress} has no load balancer hostname after {}", humantime::format_duration(timeout)
            ))).into());
        }
        debug!(event="ingress.pending", ingress, attempt);
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use crate::test_support::ScriptedRunner;

    const HOST: &str = "k8s-web-flaskapp-1a2b3c4d5e-123456789.us-west-2.elb.amazonaws.com";

    #[tokio::test]
    async fn polls_until_hostname_appears() {
        let runner = ScriptedRunner::new().on_seq("kubectl get ingress", vec![CommandOutput::ok(""), CommandOutput::ok(""), CommandOutput::ok(HOST)]);
        let host = wait_for_hostname(&runner, "web-ingress", "web", Duration::from_secs(5), Duration::from_millis(5)).await.unwrap();
        assert_eq!(host, HOST);
        assert_eq!(runner.count("kubectl get ingress"), 3);
    }

    #[tokio::test]
    async fn gives_up_after_timeout() {
        let runner = ScriptedRunner::new();
        let err = wait_for_hostname(&runner, "web-ingress", "web", Duration::from_millis(30), Duration::from_millis(10)).await.unwrap_err();
        assert!(err.to_string().contains("no load balancer hostname"));
    }

    #[tokio::test]
    async fn rejects_invalid_hostname() {
        let runner = ScriptedRunner::new().on("kubectl get ingress", CommandOutput::ok("not a host"));
        assert!(wait_for_hostname(&runner, "web-ingress", "web", Duration::from_secs(1), Duration::from_millis(5)).await.is_err());
    }
}
