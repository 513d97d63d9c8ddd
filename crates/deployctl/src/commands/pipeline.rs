use anyhow::Result;
use std::fmt::Write as _;
use tracing::info;
use crate::config::EffectiveConfig;
use crate::pipeline::{Pipeline, PipelineReport, PlannedStep, RunOptions};
use crate::runner::ProcessRunner;
use super::OutputFormat;

pub async fn handle(cfg: &EffectiveConfig, opts: RunOptions, dry_run: bool, format: OutputFormat) -> Result<()> {
    let runner = ProcessRunner;
    let pipeline = Pipeline::new(&runner, cfg);
    if dry_run {
        let plan = pipeline.plan(&opts)?;
        info!(event="pipeline.plan", steps=plan.len(), build_id=%cfg.build_id);
        print!("{}", render_plan(&plan, format)?);
        return Ok(());
    }
    let report = pipeline.run(&opts).await?;
    print!("{}", render_report(&report, format)?);
    Ok(())
}

pub fn render_plan(plan: &[PlannedStep], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json { return Ok(format!("{}\n", serde_json::to_string_pretty(plan)?)); }
    let mut s = String::new();
    for (i, p) in plan.iter().enumerate() {
        let _ = writeln!(s, "{:>2}. [{}] {}", i + 1, p.stage, p.step);
        for c in &p.commands { let _ = writeln!(s, "      {c}"); }
    }
    Ok(s)
}

pub fn render_report(report: &PipelineReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json { return Ok(format!("{}\n", serde_json::to_string_pretty(report)?)); }
    let mut s = String::new();
    let _ = writeln!(s, "build:     {}", report.build_id);
    let _ = writeln!(s, "namespace: {}", report.namespace);
    if let Some(c) = &report.cluster_name {
        match &report.cluster_endpoint {
            Some(e) => { let _ = writeln!(s, "cluster:   {c} ({e})"); }
            None => { let _ = writeln!(s, "cluster:   {c}"); }
        }
    }
    for img in &report.images { let _ = writeln!(s, "image:     {img}"); }
    if let Some(h) = &report.ingress_hostname { let _ = writeln!(s, "ingress:   {h}"); }
    if let Some(code) = report.health_status { let _ = writeln!(s, "health:    {code}"); }
    let stages: Vec<String> = report.stages_completed.iter().map(ToString::to_string).collect();
    let _ = writeln!(s, "stages:    {}", if stages.is_empty() { "-".to_string() } else { stages.join(", ") });
    Ok(s)
}
