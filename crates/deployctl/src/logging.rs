use anyhow::Result;
use std::io::IsTerminal;
use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use crate::commands::LogFormat;

pub fn init_logging(level: &str, format: &LogFormat) -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the pipeline report; tool output and logs go to stderr
    let base = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr);
    let json = match format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        // CI agents are not terminals; structured lines are easier to grep there
        LogFormat::Auto => !std::io::stderr().is_terminal() && std::env::var("TF_BUILD").is_ok(),
    };
    if json {
        tracing_subscriber::registry().with(env).with(base.json()).try_init()?;
    } else {
        tracing_subscriber::registry().with(env).with(base.compact()).try_init()?;
    }
    Ok(())
}
