use clap::{Parser, Subcommand};
use crate::pipeline::StageSelection;

pub mod completions;
pub mod pipeline;
pub mod steps;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum LogFormat { Auto, Text, Json }

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat { #[default] Text, Json }

#[derive(Parser, Debug)]
#[command(name = "deployctl", version, about = "Provision EKS, publish the app image and roll it out to Kubernetes")]
pub struct Cli {
    /// Log level: trace|debug|info|warn|error
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
    /// Log format: auto|text|json
    #[arg(long, default_value = "auto", global = true)]
    pub log_format: LogFormat,
    /// Format of the result printed on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    /// Override the build id used as the image tag
    #[arg(long, global = true)]
    pub build_id: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline: infra, build, deploy (or a single stage)
    Pipeline {
        #[arg(long, value_enum, default_value_t = StageSelection::All)] stage: StageSelection,
        /// Print the steps and commands without running them
        #[arg(long, default_value_t = false)] dry_run: bool,
        /// Probe GET /health on the ingress hostname after rollout
        #[arg(long, default_value_t = false)] verify_health: bool,
    },
    /// terraform init/plan/apply, then refresh kubeconfig
    Infra {},
    /// Ensure the ECR repository and its lifecycle policy
    Ecr {},
    /// Build the image and push the build tag and latest
    Image {},
    /// Refresh the registry pull secret and bind it to the service account
    PullSecret {},
    /// Apply the manifest set in dependency order
    Manifests {},
    /// Wait for the deployment to roll out; collect diagnostics on failure
    Rollout {},
    /// Wait for and print the ingress load balancer hostname
    IngressHost {},
    /// Generate shell completions (hidden)
    #[command(hide = true)]
    Completions { #[arg(long, default_value = "bash")] shell: String },
}
