//! The deployment pipeline: infra → build → deploy, each step gated on the
//! one before it.
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use tracing::info;
use crate::config::{AwsTarget, EffectiveConfig};
use crate::errors::{CliError, CliErrorKind};
use crate::image::{self, ImageRef};
use crate::k8s::manifests::{self, ManifestSet, Substitutions};
use crate::k8s::{ingress, rollout, secret};
use crate::runner::CommandRunner;
use crate::{ecr, health, terraform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage { Infra, Build, Deploy }

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Infra => "infra", Self::Build => "build", Self::Deploy => "deploy" })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StageSelection { #[default] All, Infra, Build, Deploy }

impl StageSelection {
    pub fn stages(self) -> Vec<Stage> {
        match self {
            Self::All => vec![Stage::Infra, Stage::Build, Stage::Deploy],
            Self::Infra => vec![Stage::Infra],
            Self::Build => vec![Stage::Build],
            Self::Deploy => vec![Stage::Deploy],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    TerraformApply,
    UpdateKubeconfig,
    EnsureRepository,
    BuildAndPush,
    PullSecret,
    ApplyManifests,
    WaitRollout,
    IngressHostname,
    HealthCheck,
}

impl Step {
    pub fn stage(self) -> Stage {
        match self {
            Self::TerraformApply | Self::UpdateKubeconfig => Stage::Infra,
            Self::EnsureRepository | Self::BuildAndPush => Stage::Build,
            _ => Stage::Deploy,
        }
    }

    /// Whether the step needs the AWS account and region. Manifests do too,
    /// for the `${AWS_*}` and `${IMAGE}` placeholders.
    pub fn needs_aws(self) -> bool {
        !matches!(self, Self::WaitRollout | Self::IngressHostname | Self::HealthCheck)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TerraformApply => "terraform_apply",
            Self::UpdateKubeconfig => "update_kubeconfig",
            Self::EnsureRepository => "ensure_repository",
            Self::BuildAndPush => "build_and_push",
            Self::PullSecret => "pull_secret",
            Self::ApplyManifests => "apply_manifests",
            Self::WaitRollout => "wait_rollout",
            Self::IngressHostname => "ingress_hostname",
            Self::HealthCheck => "health_check",
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub stages: StageSelection,
    pub verify_health: bool,
}

/// Steps of one stage. A deploy run without the infra stage refreshes the
/// kubeconfig itself when the cluster name is configured.
pub fn stage_steps(stage: Stage, cfg: &EffectiveConfig, opts: &RunOptions) -> Vec<Step> {
    match stage {
        Stage::Infra => vec![Step::TerraformApply, Step::UpdateKubeconfig],
        Stage::Build => vec![Step::EnsureRepository, Step::BuildAndPush],
        Stage::Deploy => {
            let mut steps = Vec::new();
            if !opts.stages.stages().contains(&Stage::Infra) && cfg.cluster_name.is_some() { steps.push(Step::UpdateKubeconfig); }
            steps.extend([Step::PullSecret, Step::ApplyManifests, Step::WaitRollout, Step::IngressHostname]);
            if opts.verify_health { steps.push(Step::HealthCheck); }
            steps
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub stage: Stage,
    pub step: Step,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub build_id: String,
    pub namespace: String,
    pub cluster_name: Option<String>,
    pub cluster_endpoint: Option<String>,
    pub images: Vec<String>,
    pub ingress_hostname: Option<String>,
    pub health_status: Option<u16>,
    pub stages_completed: Vec<Stage>,
    pub steps_completed: Vec<Step>,
}

pub struct Pipeline<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    cfg: &'a EffectiveConfig,
}

const CLUSTER_FROM_TERRAFORM: &str = "<terraform output cluster_name>";
const INGRESS_HOST: &str = "<ingress hostname>";

/// Resolve the AWS target once, up front, but only when some step needs it.
fn resolve_aws<'s>(cfg: &EffectiveConfig, mut steps: impl Iterator<Item = &'s Step>) -> Result<Option<AwsTarget>> {
    if steps.any(|s| s.needs_aws()) { cfg.aws().map(Some) } else { Ok(None) }
}

fn require_aws(aws: Option<&AwsTarget>) -> Result<&AwsTarget> {
    aws.ok_or_else(|| CliError::new(CliErrorKind::Config("AWS_ACCOUNT_ID and AWS_REGION are required for this step".into())).into())
}

impl<'a, R: CommandRunner + ?Sized> Pipeline<'a, R> {
    pub fn new(runner: &'a R, cfg: &'a EffectiveConfig) -> Self { Self { runner, cfg } }

    pub fn image(&self, aws: &AwsTarget) -> ImageRef { ImageRef::new(aws.registry(), &self.cfg.image_repository, &self.cfg.build_id) }

    pub fn substitutions(&self, aws: &AwsTarget) -> Substitutions {
        let image = self.image(aws);
        Substitutions::new()
            .set("IMAGE", image.to_string())
            .set("IMAGE_TAG", &self.cfg.build_id)
            .set("BUILD_ID", &self.cfg.build_id)
            .set("NAMESPACE", &self.cfg.namespace)
            .set("AWS_REGION", &aws.region)
            .set("AWS_ACCOUNT_ID", &aws.account_id)
    }

    pub fn load_manifests(&self, aws: &AwsTarget) -> Result<ManifestSet> {
        let set = ManifestSet::load(&self.cfg.manifests_dir, &self.substitutions(aws))?;
        if let Some(sa) = set.deployment_service_account(&self.cfg.deployment_name) {
            if sa != self.cfg.service_account {
                tracing::warn!(event="manifests.service_account_mismatch", deployment=%self.cfg.deployment_name, manifest=%sa, configured=%self.cfg.service_account);
            }
        }
        Ok(set)
    }

    fn secret_params<'b>(&'b self, aws: &'b AwsTarget) -> secret::PullSecretParams<'b> {
        secret::PullSecretParams { target: aws, namespace: &self.cfg.namespace, secret_name: &self.cfg.pull_secret_name, service_account: &self.cfg.service_account }
    }

    fn rollout_params(&self) -> rollout::RolloutParams<'_> {
        rollout::RolloutParams { deployment: &self.cfg.deployment_name, namespace: &self.cfg.namespace, app_label: &self.cfg.app_label, timeout: self.cfg.rollout_timeout }
    }

    /// The commands a run would execute, without executing any of them.
    pub fn plan(&self, opts: &RunOptions) -> Result<Vec<PlannedStep>> {
        let cfg = self.cfg;
        let stages: Vec<(Stage, Vec<Step>)> = opts.stages.stages().into_iter().map(|s| (s, stage_steps(s, cfg, opts))).collect();
        let resolved = resolve_aws(cfg, stages.iter().flat_map(|(_, steps)| steps))?;
        let cluster = cfg.cluster_name.clone().unwrap_or_else(|| CLUSTER_FROM_TERRAFORM.into());
        let mut planned = Vec::new();
        for (stage, steps) in stages {
            for step in steps {
                let commands: Vec<String> = if step.needs_aws() {
                    self.plan_aws_step(step, require_aws(resolved.as_ref())?, &cluster)?
                } else {
                    match step {
                        Step::WaitRollout => vec![rollout::status_command(&self.rollout_params()).to_string()],
                        Step::IngressHostname => vec![ingress::hostname_command(&cfg.ingress_name, &cfg.namespace).to_string()],
                        _ => vec![format!("GET {}", health::health_url(INGRESS_HOST))],
                    }
                };
                planned.push(PlannedStep { stage, step, commands });
            }
        }
        Ok(planned)
    }

    fn plan_aws_step(&self, step: Step, aws: &AwsTarget, cluster: &str) -> Result<Vec<String>> {
        let cfg = self.cfg;
        let image = self.image(aws);
        let tags = image::publish_tags(&image);
        Ok(match step {
            Step::TerraformApply => vec![
                terraform::init_command(&cfg.terraform_dir, &cfg.terraform_backend()).to_string(),
                terraform::plan_command(&cfg.terraform_dir, cfg.terraform_region_var.as_deref(), &aws.region).to_string(),
                terraform::apply_command(&cfg.terraform_dir).to_string(),
                terraform::output_command(&cfg.terraform_dir).to_string(),
            ],
            Step::UpdateKubeconfig => vec![terraform::update_kubeconfig_command(cluster, &aws.region).to_string()],
            Step::EnsureRepository => vec![
                ecr::describe_command(aws, &cfg.image_repository).to_string(),
                format!("{} # only if missing", ecr::create_command(aws, &cfg.image_repository)),
                ecr::lifecycle_command(aws, &cfg.image_repository, cfg.image_retention).to_string(),
            ],
            Step::BuildAndPush => {
                let mut c = vec![
                    ecr::login_password_command(aws).to_string(),
                    image::login_command(&aws.registry(), "").to_string(),
                    image::build_command(&cfg.docker_context, &cfg.dockerfile, &tags).to_string(),
                ];
                c.extend(tags.iter().map(|t| image::push_command(t).to_string()));
                c
            }
            Step::PullSecret => vec![
                ecr::login_password_command(aws).to_string(),
                format!("kubectl apply -f - # Namespace/{}", cfg.namespace),
                secret::get_service_account_command(&cfg.service_account, &cfg.namespace).to_string(),
                format!("{} # only if missing", secret::create_service_account_command(&cfg.service_account, &cfg.namespace)),
                format!("kubectl apply -n {} -f - # Secret/{}", cfg.namespace, cfg.pull_secret_name),
                secret::patch_command(&cfg.service_account, &cfg.namespace, &cfg.pull_secret_name).to_string(),
                secret::get_service_account_command(&cfg.service_account, &cfg.namespace).to_string(),
            ],
            Step::ApplyManifests => self.load_manifests(aws)?.ordered()
                .map(|d| format!("{} # {}/{}", manifests::apply_command(&cfg.namespace, d), d.kind, d.name))
                .collect(),
            Step::WaitRollout | Step::IngressHostname | Step::HealthCheck => Vec::new(),
        })
    }

    /// Run the selected stages in order. The first failing step aborts the run;
    /// nothing after it executes.
    pub async fn run(&self, opts: &RunOptions) -> Result<PipelineReport> {
        let plan = opts.stages.stages().into_iter().map(|s| (s, stage_steps(s, self.cfg, opts))).collect();
        self.execute(plan).await
    }

    /// Run a single step on its own, e.g. from a step subcommand.
    pub async fn run_step_only(&self, step: Step) -> Result<PipelineReport> {
        self.execute(vec![(step.stage(), vec![step])]).await
    }

    async fn execute(&self, plan: Vec<(Stage, Vec<Step>)>) -> Result<PipelineReport> {
        let cfg = self.cfg;
        let aws = resolve_aws(cfg, plan.iter().flat_map(|(_, steps)| steps))?;
        // validate the manifest set before touching any infrastructure
        let needs_manifests = plan.iter().any(|(_, steps)| steps.contains(&Step::ApplyManifests));
        let manifest_set = if needs_manifests { Some(self.load_manifests(require_aws(aws.as_ref())?)?) } else { None };
        let mut report = PipelineReport {
            build_id: cfg.build_id.clone(),
            namespace: cfg.namespace.clone(),
            cluster_name: cfg.cluster_name.clone(),
            ..Default::default()
        };
        for (stage, steps) in plan {
            info!(event="pipeline.stage.start", %stage);
            for step in steps {
                info!(event="pipeline.step.start", %stage, %step);
                self.run_step(step, aws.as_ref(), manifest_set.as_ref(), &mut report).await
                    .with_context(|| format!("{stage} stage failed at {step}"))?;
                report.steps_completed.push(step);
                info!(event="pipeline.step.finished", %stage, %step);
            }
            report.stages_completed.push(stage);
            info!(event="pipeline.stage.finished", %stage);
        }
        Ok(report)
    }

    async fn run_step(&self, step: Step, aws: Option<&AwsTarget>, manifest_set: Option<&ManifestSet>, report: &mut PipelineReport) -> Result<()> {
        let cfg = self.cfg;
        let runner = self.runner;
        let aws = || require_aws(aws);
        match step {
            Step::TerraformApply => {
                let outputs = terraform::apply(runner, &cfg.terraform_dir, &cfg.terraform_backend(), cfg.terraform_region_var.as_deref(), &aws()?.region)?;
                report.cluster_name = Some(outputs.cluster_name);
                report.cluster_endpoint = Some(outputs.cluster_endpoint);
            }
            Step::UpdateKubeconfig => {
                let cluster = report.cluster_name.as_deref()
                    .ok_or_else(|| CliError::new(CliErrorKind::Config("cluster name unknown; set CLUSTER_NAME or run the infra stage".into())))?;
                terraform::update_kubeconfig(runner, cluster, &aws()?.region)?;
            }
            Step::EnsureRepository => {
                ecr::ensure_repository(runner, aws()?, &cfg.image_repository, cfg.image_retention)?;
            }
            Step::BuildAndPush => {
                let aws = aws()?;
                let password = ecr::login_password(runner, aws)?;
                let pushed = image::build_and_push(runner, &self.image(aws), &cfg.docker_context, &cfg.dockerfile, &password)?;
                report.images = pushed.iter().map(ToString::to_string).collect();
            }
            Step::PullSecret => secret::provision(runner, &self.secret_params(aws()?))?,
            Step::ApplyManifests => {
                let loaded;
                let set = match manifest_set {
                    Some(s) => s,
                    None => { loaded = self.load_manifests(aws()?)?; &loaded }
                };
                manifests::apply_all(runner, &cfg.namespace, set)?;
            }
            Step::WaitRollout => rollout::wait(runner, &self.rollout_params(), &cfg.diagnostics_dir, &cfg.build_id)?,
            Step::IngressHostname => {
                let host = ingress::wait_for_hostname(runner, &cfg.ingress_name, &cfg.namespace, cfg.ingress_timeout, cfg.ingress_poll_interval).await?;
                report.ingress_hostname = Some(host);
            }
            Step::HealthCheck => {
                let host = report.ingress_hostname.as_deref()
                    .ok_or_else(|| CliError::new(CliErrorKind::Runtime("no ingress hostname to probe".into())))?;
                let code = health::wait_healthy(&health::health_url(host), cfg.health_timeout, cfg.ingress_poll_interval).await?;
                report.health_status = Some(code);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(cluster: Option<&str>) -> EffectiveConfig {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml").to_string_lossy().to_string();
        let mut c = EffectiveConfig::load_with(move |k| match k {
            "DEPLOYCTL_CONFIG_FILE" => Some(missing.clone()),
            "AWS_ACCOUNT_ID" => Some("123456789012".into()),
            "AWS_REGION" => Some("us-west-2".into()),
            "BUILD_ID" => Some("42".into()),
            _ => None,
        }).unwrap();
        c.cluster_name = cluster.map(str::to_string);
        c
    }

    #[test]
    fn full_run_step_order() {
        let c = cfg(None);
        let opts = RunOptions::default();
        let steps: Vec<Step> = opts.stages.stages().into_iter().flat_map(|s| stage_steps(s, &c, &opts)).collect();
        assert_eq!(steps, vec![
            Step::TerraformApply, Step::UpdateKubeconfig,
            Step::EnsureRepository, Step::BuildAndPush,
            Step::PullSecret, Step::ApplyManifests, Step::WaitRollout, Step::IngressHostname,
        ]);
    }

    #[test]
    fn deploy_only_refreshes_kubeconfig_when_cluster_known() {
        let opts = RunOptions { stages: StageSelection::Deploy, verify_health: true };
        let with = stage_steps(Stage::Deploy, &cfg(Some("demo")), &opts);
        assert_eq!(with.first(), Some(&Step::UpdateKubeconfig));
        assert_eq!(with.last(), Some(&Step::HealthCheck));
        let without = stage_steps(Stage::Deploy, &cfg(None), &opts);
        assert_eq!(without.first(), Some(&Step::PullSecret));
    }

    #[test]
    fn substitutions_carry_image_reference() {
        let c = cfg(None);
        let runner = crate::test_support::ScriptedRunner::new();
        let p = Pipeline::new(&runner, &c);
        let aws = c.aws().unwrap();
        assert_eq!(p.substitutions(&aws).render("${IMAGE}"), "123456789012.dkr.ecr.us-west-2.amazonaws.com/flask-app:42");
    }
}
