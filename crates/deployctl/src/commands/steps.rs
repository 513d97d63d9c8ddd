use anyhow::Result;
use crate::config::EffectiveConfig;
use crate::pipeline::{Pipeline, Step};
use crate::runner::ProcessRunner;
use super::OutputFormat;
use super::pipeline::render_report;

/// Run one pipeline step outside the full pipeline.
pub async fn handle(cfg: &EffectiveConfig, step: Step, format: OutputFormat) -> Result<()> {
    let runner = ProcessRunner;
    let report = Pipeline::new(&runner, cfg).run_step_only(step).await?;
    // the hostname alone is the useful output of this step in scripts
    if step == Step::IngressHostname && format == OutputFormat::Text {
        if let Some(host) = &report.ingress_hostname { println!("{host}"); }
        return Ok(());
    }
    print!("{}", render_report(&report, format)?);
    Ok(())
}

/// `infra` is the whole infra stage: terraform followed by the kubeconfig refresh.
pub async fn handle_infra(cfg: &EffectiveConfig, format: OutputFormat) -> Result<()> {
    use crate::pipeline::{RunOptions, StageSelection};
    let runner = ProcessRunner;
    let report = Pipeline::new(&runner, cfg).run(&RunOptions { stages: StageSelection::Infra, verify_health: false }).await?;
    print!("{}", render_report(&report, format)?);
    Ok(())
}
