use anyhow::{Result, Context};
use crate::errors::{CliError, CliErrorKind};
use crate::naming::{is_valid_dns_label, is_valid_image_tag};
use tracing::debug;
use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};

pub const DEFAULT_PULL_SECRET: &str = "ecr-registry-secret";
pub const DEFAULT_IMAGE_RETENTION: u32 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub aws_account_id: Option<String>,
    pub aws_region: Option<String>,
    pub namespace: Option<String>,
    pub image_repository: Option<String>,
    pub cluster_name: Option<String>,
    pub build_id: Option<String>,
    pub terraform_dir: Option<PathBuf>,
    pub manifests_dir: Option<PathBuf>,
    pub docker_context: Option<PathBuf>,
    pub dockerfile: Option<PathBuf>,
    pub deployment_name: Option<String>,
    pub service_account: Option<String>,
    pub ingress_name: Option<String>,
    pub app_label: Option<String>,
    pub pull_secret_name: Option<String>,
    pub image_retention: Option<u32>,
    pub rollout_timeout: Option<String>,
    pub ingress_timeout: Option<String>,
    pub ingress_poll_interval: Option<String>,
    pub health_timeout: Option<String>,
    pub diagnostics_dir: Option<PathBuf>,
    #[serde(default)]
    pub terraform: TerraformFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TerraformFile {
    pub state_bucket: Option<String>,
    pub state_key: Option<String>,
    pub state_region: Option<String>,
    /// Root-module variable that receives the deployment region, e.g. `aws_region`.
    /// Unset means no `-var` is passed and the module uses its own default.
    pub region_var: Option<String>,
}

/// S3 remote state location handed to `terraform init -backend-config`.
#[derive(Debug, Clone, PartialEq)]
pub struct TerraformBackend {
    pub bucket: Option<String>,
    pub key: String,
    pub region: Option<String>,
}

/// Account and region every AWS call is scoped to.
#[derive(Debug, Clone, PartialEq)]
pub struct AwsTarget {
    pub account_id: String,
    pub region: String,
}

impl AwsTarget {
    /// ECR registry host for this account and region.
    pub fn registry(&self) -> String { format!("{}.dkr.ecr.{}.amazonaws.com", self.account_id, self.region) }
}

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub aws_account_id: Option<String>,
    pub aws_region: Option<String>,
    pub namespace: String,
    pub image_repository: String,
    pub cluster_name: Option<String>,
    pub build_id: String,
    pub terraform_dir: PathBuf,
    pub manifests_dir: PathBuf,
    pub docker_context: PathBuf,
    pub dockerfile: PathBuf,
    pub deployment_name: String,
    pub service_account: String,
    pub ingress_name: String,
    pub app_label: String,
    pub pull_secret_name: String,
    pub image_retention: u32,
    pub rollout_timeout: Duration,
    pub ingress_timeout: Duration,
    pub ingress_poll_interval: Duration,
    pub health_timeout: Duration,
    pub diagnostics_dir: PathBuf,
    pub terraform: TerraformBackend,
    pub terraform_region_var: Option<String>,
}

impl EffectiveConfig {
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from the config file and the given environment lookup.
    /// Environment values win over file values; empty values are ignored.
    pub fn load_with<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        let cfg_path = env("DEPLOYCTL_CONFIG_FILE").map(PathBuf::from).unwrap_or_else(config_file_path);
        debug!(path=?cfg_path, exists=?cfg_path.exists(), "config.load.attempt");
        let file_cfg: FileConfig = if cfg_path.exists() {
            let content = fs::read_to_string(&cfg_path).with_context(|| format!("read config {cfg_path:?}"))
                .map_err(|e| CliError::with_source(CliErrorKind::Config("failed to read config".into()), e))?;
            match toml::from_str(&content) {
                Ok(v) => { debug!("config.parse.success"); v }
                Err(e) => { debug!(error=?e, "config.parse.error"); return Err(CliError::with_source(CliErrorKind::Config("failed to parse config".into()), e).into()); }
            }
        } else { FileConfig::default() };

        let build_id = env("BUILD_ID").or_else(|| env("BUILD_BUILDID")).or(file_cfg.build_id).unwrap_or_else(local_build_id);
        let cfg = Self {
            aws_account_id: env("AWS_ACCOUNT_ID").or(file_cfg.aws_account_id),
            aws_region: env("AWS_REGION").or_else(|| env("AWS_DEFAULT_REGION")).or(file_cfg.aws_region),
            namespace: env("NAMESPACE").or(file_cfg.namespace).unwrap_or_else(|| "default".into()),
            image_repository: env("IMAGE_REPOSITORY").or(file_cfg.image_repository).unwrap_or_else(|| "flask-app".into()),
            cluster_name: env("CLUSTER_NAME").or(file_cfg.cluster_name),
            build_id,
            terraform_dir: file_cfg.terraform_dir.unwrap_or_else(|| PathBuf::from("terraform")),
            manifests_dir: file_cfg.manifests_dir.unwrap_or_else(|| PathBuf::from("k8s")),
            docker_context: file_cfg.docker_context.unwrap_or_else(|| PathBuf::from("app")),
            dockerfile: file_cfg.dockerfile.unwrap_or_else(|| PathBuf::from("app/Dockerfile")),
            deployment_name: file_cfg.deployment_name.unwrap_or_else(|| "flask-app".into()),
            service_account: file_cfg.service_account.unwrap_or_else(|| "flask-app-sa".into()),
            ingress_name: file_cfg.ingress_name.unwrap_or_else(|| "flask-app-ingress".into()),
            app_label: file_cfg.app_label.unwrap_or_else(|| "flask-app".into()),
            pull_secret_name: file_cfg.pull_secret_name.unwrap_or_else(|| DEFAULT_PULL_SECRET.into()),
            image_retention: file_cfg.image_retention.unwrap_or(DEFAULT_IMAGE_RETENTION),
            rollout_timeout: parse_duration("rollout_timeout", file_cfg.rollout_timeout.as_deref(), "5m")?,
            ingress_timeout: parse_duration("ingress_timeout", file_cfg.ingress_timeout.as_deref(), "10m")?,
            ingress_poll_interval: parse_duration("ingress_poll_interval", file_cfg.ingress_poll_interval.as_deref(), "10s")?,
            health_timeout: parse_duration("health_timeout", file_cfg.health_timeout.as_deref(), "5m")?,
            diagnostics_dir: file_cfg.diagnostics_dir.unwrap_or_else(|| PathBuf::from("diagnostics")),
            terraform: TerraformBackend {
                bucket: env("TF_STATE_BUCKET").or(file_cfg.terraform.state_bucket),
                key: env("TF_STATE_KEY").or(file_cfg.terraform.state_key).unwrap_or_else(|| "eks/terraform.tfstate".into()),
                region: env("TF_STATE_REGION").or(file_cfg.terraform.state_region),
            },
            terraform_region_var: env("TF_REGION_VAR").or(file_cfg.terraform.region_var),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !is_valid_dns_label(&self.namespace) {
            return Err(config_err(format!("namespace '{}' is not a valid DNS label", self.namespace)));
        }
        if !is_valid_image_tag(&self.build_id) {
            return Err(config_err(format!("build id '{}' is not a valid image tag", self.build_id)));
        }
        if self.image_repository.is_empty() || self.image_repository.chars().any(|c| c.is_ascii_uppercase() || c.is_whitespace()) {
            return Err(config_err(format!("image repository '{}' must be lowercase and non-empty", self.image_repository)));
        }
        if let Some(var) = &self.terraform_region_var {
            let mut chars = var.chars();
            let ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
            if !ok { return Err(config_err(format!("terraform region_var '{var}' is not a valid variable name"))); }
        }
        if self.image_retention == 0 {
            return Err(config_err("image_retention must be at least 1"));
        }
        Ok(())
    }

    /// Override the build id from the command line.
    pub fn with_build_id(mut self, build_id: Option<String>) -> Result<Self> {
        if let Some(id) = build_id {
            self.build_id = id;
            self.validate()?;
        }
        Ok(self)
    }

    /// Account and region are only needed by steps that talk to AWS, so they are
    /// checked lazily rather than at load time.
    pub fn aws(&self) -> Result<AwsTarget> {
        let account_id = self.aws_account_id.clone().ok_or_else(|| config_err("AWS_ACCOUNT_ID is not set"))?;
        if account_id.len() != 12 || !account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(config_err(format!("AWS account id '{account_id}' must be 12 digits")));
        }
        let region = self.aws_region.clone().ok_or_else(|| config_err("AWS_REGION is not set"))?;
        Ok(AwsTarget { account_id, region })
    }

    /// Terraform state region defaults to the deployment region.
    pub fn terraform_backend(&self) -> TerraformBackend {
        let mut backend = self.terraform.clone();
        if backend.region.is_none() { backend.region = self.aws_region.clone(); }
        backend
    }
}

fn config_err(msg: impl Into<String>) -> anyhow::Error { CliError::new(CliErrorKind::Config(msg.into())).into() }

fn parse_duration(field: &str, value: Option<&str>, default: &str) -> Result<Duration> {
    let raw = value.unwrap_or(default);
    humantime::parse_duration(raw).map_err(|e| CliError::with_source(CliErrorKind::Config(format!("invalid {field} '{raw}'")), e).into())
}

fn local_build_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("local-{}", &id[..8])
}

pub fn config_dir() -> PathBuf { dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("deployctl") }
pub fn config_file_path() -> PathBuf { config_dir().join("config.toml") }
