//! Kubernetes steps, all driven through `kubectl` against the current kubeconfig context.
pub mod ingress;
pub mod manifests;
pub mod rollout;
pub mod secret;

use crate::runner::CommandSpec;

/// `kubectl apply -f -` with the object piped over stdin.
pub fn apply_stdin(namespace: Option<&str>, body: impl Into<String>) -> CommandSpec {
    let mut spec = CommandSpec::new("kubectl").arg("apply");
    if let Some(ns) = namespace { spec = spec.args(["-n", ns]); }
    spec.args(["-f", "-"]).stdin(body)
}
