use anyhow::Result;
use clap::Parser;
use deployctl::commands::{self, Cli, Commands, OutputFormat};
use deployctl::config::EffectiveConfig;
use deployctl::errors::classify_exit_code;
use deployctl::logging::init_logging;
use deployctl::pipeline::{RunOptions, Step};
use tracing::{info_span, info, Instrument};
use std::process;
use std::time::Instant;

#[tokio::main]
async fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;
    let cfg = match EffectiveConfig::load().and_then(|c| c.with_build_id(cli.build_id.clone())) {
        Ok(c) => c,
        Err(e) => { eprintln!("error: {e:#}"); let code = classify_exit_code(&e); info!(took_ms=%start.elapsed().as_millis(), event="cli.finished", exit_code=code); process::exit(code); }
    };
    let exit_code = match dispatch(cli, cfg).await { Ok(()) => 0, Err(e) => classify_exit_code(&e) };
    info!(took_ms=%start.elapsed().as_millis(), event="cli.finished", exit_code=exit_code);
    if exit_code != 0 { process::exit(exit_code); }
    Ok(())
}

async fn dispatch(cli: Cli, cfg: EffectiveConfig) -> Result<()> {
    let start = Instant::now();
    let format: OutputFormat = cli.format;
    let result = match cli.command {
        Commands::Pipeline { stage, dry_run, verify_health } => {
            commands::pipeline::handle(&cfg, RunOptions { stages: stage, verify_health }, dry_run, format)
                .instrument(info_span!("cmd.pipeline", ?stage, dry_run)).await
        }
        Commands::Infra {} => commands::steps::handle_infra(&cfg, format).instrument(info_span!("cmd.infra")).await,
        Commands::Ecr {} => commands::steps::handle(&cfg, Step::EnsureRepository, format).instrument(info_span!("cmd.ecr")).await,
        Commands::Image {} => commands::steps::handle(&cfg, Step::BuildAndPush, format).instrument(info_span!("cmd.image")).await,
        Commands::PullSecret {} => commands::steps::handle(&cfg, Step::PullSecret, format).instrument(info_span!("cmd.pull_secret")).await,
        Commands::Manifests {} => commands::steps::handle(&cfg, Step::ApplyManifests, format).instrument(info_span!("cmd.manifests")).await,
        Commands::Rollout {} => commands::steps::handle(&cfg, Step::WaitRollout, format).instrument(info_span!("cmd.rollout")).await,
        Commands::IngressHost {} => commands::steps::handle(&cfg, Step::IngressHostname, format).instrument(info_span!("cmd.ingress_host")).await,
        Commands::Completions { shell } => { let _span = info_span!("cmd.completions").entered(); commands::completions::handle(shell) }
    };
    let took = start.elapsed().as_millis();
    match &result { Ok(_) => info!(event="cmd.finished", took_ms=%took), Err(e) => { eprintln!("error: {e:#}"); info!(event="cmd.failed", took_ms=%took); } }
    result
}
