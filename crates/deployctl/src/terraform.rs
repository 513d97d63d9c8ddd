//! Infrastructure stage: terraform init/plan/apply against the S3 backend, then
//! read the cluster outputs the later stages depend on.
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use tracing::info;
use crate::config::TerraformBackend;
use crate::errors::{CliError, CliErrorKind};
use crate::runner::{run_checked, CommandRunner, CommandSpec};

pub const PLAN_FILE: &str = "tfplan";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerraformOutputs {
    pub cluster_name: String,
    pub cluster_endpoint: String,
}

pub fn init_command(dir: &Path, backend: &TerraformBackend) -> CommandSpec {
    let mut spec = CommandSpec::new("terraform").cwd(dir).args(["init", "-input=false", "-reconfigure"]);
    if let Some(bucket) = &backend.bucket { spec = spec.arg(format!("-backend-config=bucket={bucket}")); }
    spec = spec.arg(format!("-backend-config=key={}", backend.key));
    if let Some(region) = &backend.region { spec = spec.arg(format!("-backend-config=region={region}")); }
    spec.streamed()
}

/// `region_var` names the root-module variable fed the deployment region; without
/// one the module's own default (or the provider's `AWS_REGION`) applies.
pub fn plan_command(dir: &Path, region_var: Option<&str>, region: &str) -> CommandSpec {
    let mut spec = CommandSpec::new("terraform").cwd(dir).args(["plan", "-input=false"]);
    if let Some(var) = region_var { spec = spec.arg(format!("-var={var}={region}")); }
    spec.arg(format!("-out={PLAN_FILE}")).streamed()
}

pub fn apply_command(dir: &Path) -> CommandSpec {
    CommandSpec::new("terraform").cwd(dir).args(["apply", "-input=false", "-auto-approve", PLAN_FILE]).streamed()
}

pub fn output_command(dir: &Path) -> CommandSpec {
    CommandSpec::new("terraform").cwd(dir).args(["output", "-json"])
}

/// Run init, plan and apply in order, stopping at the first failure.
pub fn apply<R: CommandRunner + ?Sized>(runner: &R, dir: &Path, backend: &TerraformBackend, region_var: Option<&str>, region: &str) -> Result<TerraformOutputs> {
    if !dir.is_dir() {
        return Err(CliError::new(CliErrorKind::Usage(format!("terraform directory {} does not exist", dir.display()))).into());
    }
    for (step, spec) in [("init", init_command(dir, backend)), ("plan", plan_command(dir, region_var, region)), ("apply", apply_command(dir))] {
        info!(event="terraform.step", step, dir=%dir.display());
        run_checked(runner, &spec)?;
    }
    let outputs = read_outputs(runner, dir)?;
    info!(event="terraform.outputs", cluster_name=%outputs.cluster_name, cluster_endpoint=%outputs.cluster_endpoint);
    Ok(outputs)
}

pub fn read_outputs<R: CommandRunner + ?Sized>(runner: &R, dir: &Path) -> Result<TerraformOutputs> {
    let out = run_checked(runner, &output_command(dir))?;
    parse_outputs(&out.stdout)
}

/// Parse `terraform output -json`, where each output is `{"value": ..., "type": ..., "sensitive": ...}`.
pub fn parse_outputs(json: &str) -> Result<TerraformOutputs> {
    let v: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| CliError::with_source(CliErrorKind::Runtime("terraform output is not valid JSON".into()), e))?;
    let field = |name: &str| -> Result<String> {
        v.get(name).and_then(|o| o.get("value")).and_then(|s| s.as_str()).filter(|s| !s.is_empty()).map(str::to_string)
            .ok_or_else(|| CliError::new(CliErrorKind::Runtime(format!("terraform output '{name}' missing or empty"))).into())
    };
    Ok(TerraformOutputs { cluster_name: field("cluster_name")?, cluster_endpoint: field("cluster_endpoint")? })
}

/// Point the local kubeconfig at the cluster.
pub fn update_kubeconfig_command(cluster_name: &str, region: &str) -> CommandSpec {
    CommandSpec::new("aws").args(["eks", "update-kubeconfig", "--name", cluster_name, "--region", region])
}

pub fn update_kubeconfig<R: CommandRunner + ?Sized>(runner: &R, cluster_name: &str, region: &str) -> Result<()> {
    run_checked(runner, &update_kubeconfig_command(cluster_name, region))?;
    info!(event="kubeconfig.updated", cluster=%cluster_name, region=%region);
    Ok(())
}
