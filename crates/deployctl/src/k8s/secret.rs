//! Image-pull secret provisioning.
//!
//! The registry token is rendered into a `kubernetes.io/dockerconfigjson`
//! secret in-process and piped to `kubectl apply`, so it never shows up in a
//! process listing. The service account is then merge-patched to reference
//! that one secret. The account itself belongs to the manifest set; it is only
//! created here when missing, never re-applied, so fields the manifests own
//! (labels, IRSA annotations) survive.
use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{json, Value};
use tracing::{debug, info};
use crate::config::AwsTarget;
use crate::ecr;
use crate::errors::{CliError, CliErrorKind};
use crate::runner::{failure_error, run_checked, CommandRunner, CommandSpec};
use super::apply_stdin;

pub const REGISTRY_USER: &str = "AWS";
const NOT_FOUND: &str = "NotFound";
const ALREADY_EXISTS: &str = "AlreadyExists";

#[derive(Debug, Clone)]
pub struct PullSecretParams<'a> {
    pub target: &'a AwsTarget,
    pub namespace: &'a str,
    pub secret_name: &'a str,
    pub service_account: &'a str,
}

pub fn namespace_manifest(namespace: &str) -> Value {
    json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": namespace } })
}

pub fn create_service_account_command(name: &str, namespace: &str) -> CommandSpec {
    CommandSpec::new("kubectl").args(["create", "serviceaccount", name, "-n", namespace])
}

/// The `.dockerconfigjson` payload `docker login` would have written.
pub fn docker_config_json(registry: &str, token: &str) -> Value {
    let auth = STANDARD.encode(format!("{REGISTRY_USER}:{token}"));
    json!({ "auths": { registry: { "username": REGISTRY_USER, "password": token, "auth": auth } } })
}

pub fn pull_secret_manifest(name: &str, namespace: &str, registry: &str, token: &str) -> Value {
    let config = docker_config_json(registry, token).to_string();
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "kubernetes.io/dockerconfigjson",
        "metadata": { "name": name, "namespace": namespace },
        "data": { ".dockerconfigjson": STANDARD.encode(config) }
    })
}

/// A JSON merge patch replaces lists wholesale, leaving exactly one pull secret.
pub fn service_account_patch(secret_name: &str) -> Value {
    json!({ "imagePullSecrets": [ { "name": secret_name } ] })
}

pub fn patch_command(service_account: &str, namespace: &str, secret_name: &str) -> CommandSpec {
    CommandSpec::new("kubectl")
        .args(["patch", "serviceaccount", service_account, "-n", namespace, "--type", "merge", "-p"])
        .arg(service_account_patch(secret_name).to_string())
}

pub fn get_service_account_command(service_account: &str, namespace: &str) -> CommandSpec {
    CommandSpec::new("kubectl").args(["get", "serviceaccount", service_account, "-n", namespace, "-o", "json"])
}

/// Names listed under `imagePullSecrets` of a service account object.
pub fn pull_secret_names(service_account: &Value) -> Vec<String> {
    service_account.get("imagePullSecrets").and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|s| s.get("name").and_then(Value::as_str)).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Fetch a fresh token, replace the secret, and bind it to the service account.
pub fn provision<R: CommandRunner + ?Sized>(runner: &R, p: &PullSecretParams<'_>) -> Result<()> {
    let token = ecr::login_password(runner, p.target)?;
    info!(event="pull_secret.token", status="fetched", region=%p.target.region);

    run_checked(runner, &apply_stdin(None, namespace_manifest(p.namespace).to_string()))?;
    ensure_service_account(runner, p.service_account, p.namespace)?;
    let secret = pull_secret_manifest(p.secret_name, p.namespace, &p.target.registry(), &token);
    run_checked(runner, &apply_stdin(Some(p.namespace), secret.to_string()))?;
    info!(event="pull_secret.applied", secret=%p.secret_name, namespace=%p.namespace);

    run_checked(runner, &patch_command(p.service_account, p.namespace, p.secret_name))?;
    verify_binding(runner, p)?;
    info!(event="pull_secret.bound", service_account=%p.service_account, secret=%p.secret_name);
    Ok(())
}

/// Create the service account if the cluster has none yet. Returns whether it was created.
pub fn ensure_service_account<R: CommandRunner + ?Sized>(runner: &R, name: &str, namespace: &str) -> Result<bool> {
    let get = get_service_account_command(name, namespace);
    let probe = runner.run(&get)?;
    if probe.success() {
        debug!(event="pull_secret.service_account", name, status="exists");
        return Ok(false);
    }
    if !probe.stderr.contains(NOT_FOUND) {
        return Err(failure_error(&get, &probe).into());
    }
    let create = create_service_account_command(name, namespace);
    let out = runner.run(&create)?;
    if !out.success() && !out.stderr.contains(ALREADY_EXISTS) {
        return Err(failure_error(&create, &out).into());
    }
    info!(event="pull_secret.service_account", name, status="created");
    Ok(true)
}

fn verify_binding<R: CommandRunner + ?Sized>(runner: &R, p: &PullSecretParams<'_>) -> Result<()> {
    let out = run_checked(runner, &get_service_account_command(p.service_account, p.namespace))?;
    let sa: Value = serde_json::from_str(&out.stdout)
        .map_err(|e| CliError::with_source(CliErrorKind::Runtime("service account is not valid JSON".into()), e))?;
    let names = pull_secret_names(&sa);
    if names != [p.secret_name] {
        return Err(CliError::new(CliErrorKind::Runtime(format!(
            "service account {} references image pull secrets {names:?}, expected only {}", p.service_account, p.secret_name
        ))).into());
    }
    Ok(())
}
