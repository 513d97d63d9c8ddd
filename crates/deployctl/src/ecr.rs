//! ECR repository bootstrap and registry credentials.
use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};
use crate::config::AwsTarget;
use crate::errors::{CliError, CliErrorKind};
use crate::runner::{failure_error, run_checked, CommandRunner, CommandSpec};

const ALREADY_EXISTS: &str = "RepositoryAlreadyExistsException";
const NOT_FOUND: &str = "RepositoryNotFoundException";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState { Created, Existing }

/// Lifecycle policy expiring everything beyond the newest `keep` images.
pub fn lifecycle_policy(keep: u32) -> serde_json::Value {
    json!({
        "rules": [{
            "rulePriority": 1,
            "description": format!("Keep last {keep} images"),
            "selection": {
                "tagStatus": "any",
                "countType": "imageCountMoreThan",
                "countNumber": keep
            },
            "action": { "type": "expire" }
        }]
    })
}

pub fn describe_command(target: &AwsTarget, repository: &str) -> CommandSpec {
    CommandSpec::new("aws").args(["ecr", "describe-repositories", "--repository-names", repository, "--region", target.region.as_str()])
}

pub fn create_command(target: &AwsTarget, repository: &str) -> CommandSpec {
    CommandSpec::new("aws").args([
        "ecr", "create-repository",
        "--repository-name", repository,
        "--region", target.region.as_str(),
        "--image-scanning-configuration", "scanOnPush=true",
        "--encryption-configuration", "encryptionType=AES256",
    ])
}

pub fn lifecycle_command(target: &AwsTarget, repository: &str, keep: u32) -> CommandSpec {
    CommandSpec::new("aws")
        .args(["ecr", "put-lifecycle-policy", "--repository-name", repository, "--region", target.region.as_str(), "--lifecycle-policy-text"])
        .arg(lifecycle_policy(keep).to_string())
}

/// Make sure the repository exists with scanning, encryption and the retention
/// policy. Safe to run repeatedly: existing repositories and policies are left as is.
pub fn ensure_repository<R: CommandRunner + ?Sized>(runner: &R, target: &AwsTarget, repository: &str, keep: u32) -> Result<RepositoryState> {
    let describe = describe_command(target, repository);
    let probe = runner.run(&describe)?;
    let state = if probe.success() {
        info!(event="ecr.repository", repository, status="exists");
        RepositoryState::Existing
    } else if probe.stderr.contains(NOT_FOUND) {
        let create = create_command(target, repository);
        let out = runner.run(&create)?;
        if out.success() {
            info!(event="ecr.repository", repository, status="created");
            RepositoryState::Created
        } else if out.stderr.contains(ALREADY_EXISTS) {
            // created by a concurrent run between describe and create
            warn!(event="ecr.repository", repository, status="already_exists");
            RepositoryState::Existing
        } else {
            return Err(failure_error(&create, &out).into());
        }
    } else {
        return Err(failure_error(&describe, &probe).into());
    };
    run_checked(runner, &lifecycle_command(target, repository, keep))?;
    info!(event="ecr.lifecycle_policy", repository, keep);
    Ok(state)
}

pub fn login_password_command(target: &AwsTarget) -> CommandSpec {
    CommandSpec::new("aws").args(["ecr", "get-login-password", "--region", target.region.as_str()])
}

/// Fetch a short-lived registry token. Any failure here is a credential problem
/// and aborts the calling stage.
pub fn login_password<R: CommandRunner + ?Sized>(runner: &R, target: &AwsTarget) -> Result<String> {
    let spec = login_password_command(target);
    let out = runner.run(&spec)?;
    if !out.success() {
        let inner = failure_error(&spec, &out);
        return Err(CliError::with_source(CliErrorKind::Auth("failed to fetch ECR login token".into()), inner).into());
    }
    let token = out.stdout.trim().to_string();
    if token.is_empty() {
        return Err(CliError::new(CliErrorKind::Auth("ECR login token was empty".into())).into());
    }
    Ok(token)
}
