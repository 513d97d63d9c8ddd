//! Post-deploy smoke check against the application's `/health` endpoint.
use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use crate::errors::{CliError, CliErrorKind};

pub const HEALTH_PATH: &str = "/health";

pub fn health_url(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}{HEALTH_PATH}", host.trim_end_matches('/'))
    } else {
        format!("http://{host}{HEALTH_PATH}")
    }
}

/// Poll `url` until it answers with a 2xx status or `timeout` elapses.
/// DNS for a fresh load balancer can take minutes to propagate, so connection
/// errors count as "not yet" rather than failure.
pub async fn wait_healthy(url: &str, timeout: Duration, interval: Duration) -> Result<u16> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| CliError::with_source(CliErrorKind::Network("failed to build http client".into()), e))?;
    let deadline = Instant::now() + timeout;
    let mut last = String::from("no response");
    loop {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let code = resp.status().as_u16();
                info!(event="health.ok", %url, status=code);
                return Ok(code);
            }
            Ok(resp) => last = format!("status {}", resp.status()),
            Err(e) => last = e.to_string(),
        }
        debug!(event="health.pending", %url, last=%last);
        if Instant::now() + interval > deadline {
            return Err(CliError::new(CliErrorKind::Network(format!("{url} not healthy after {}: {last}", humantime::format_duration(timeout)))).into());
        }
        tokio::time::sleep(interval).await;
    }
}
