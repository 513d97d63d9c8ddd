//! Loading, rendering and ordered apply of the application manifest set.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use crate::errors::{CliError, CliErrorKind};
use crate::runner::{run_checked, CommandRunner, CommandSpec};
use super::apply_stdin;

/// Kinds in the set, declared in apply order: the deployment's pods need the
/// service account and config map to exist before they can be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManifestKind {
    ServiceAccount,
    ConfigMap,
    Deployment,
    Service,
    Ingress,
    HorizontalPodAutoscaler,
    PodDisruptionBudget,
}

impl ManifestKind {
    pub const APPLY_ORDER: [ManifestKind; 7] = [
        Self::ServiceAccount,
        Self::ConfigMap,
        Self::Deployment,
        Self::Service,
        Self::Ingress,
        Self::HorizontalPodAutoscaler,
        Self::PodDisruptionBudget,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
            Self::PodDisruptionBudget => "PodDisruptionBudget",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> { Self::APPLY_ORDER.into_iter().find(|k| k.as_str() == kind) }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// `${NAME}` placeholder values. Unknown placeholders are left as written.
#[derive(Debug, Clone, Default)]
pub struct Substitutions(BTreeMap<String, String>);

impl Substitutions {
    pub fn new() -> Self { Self::default() }
    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self { self.0.insert(key.to_string(), value.into()); self }

    pub fn render(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) if self.0.contains_key(&after[..end]) => {
                    out.push_str(&self.0[&after[..end]]);
                    rest = &after[end + 1..];
                }
                _ => {
                    out.push_str("${");
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[derive(Debug, Clone)]
pub struct ManifestDoc {
    pub kind: ManifestKind,
    pub name: String,
    pub source: PathBuf,
    /// Rendered object, re-serialised as a single YAML document.
    pub body: String,
    pub value: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct Header {
    kind: Option<String>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata { name: Option<String> }

#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    docs: BTreeMap<ManifestKind, Vec<ManifestDoc>>,
}

fn usage(msg: String) -> anyhow::Error { CliError::new(CliErrorKind::Usage(msg)).into() }

impl ManifestSet {
    /// Read every `*.yaml`/`*.yml` file in `dir` (sorted by file name), render
    /// placeholders and group documents by kind. Every kind must be present.
    pub fn load(dir: &Path, vars: &Substitutions) -> Result<Self> {
        if !dir.is_dir() {
            return Err(usage(format!("manifest directory {} does not exist", dir.display())));
        }
        let mut files: Vec<PathBuf> = fs::read_dir(dir).with_context(|| format!("read manifest dir {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
            .collect();
        files.sort();
        let mut set = ManifestSet::default();
        for file in files {
            let raw = fs::read_to_string(&file).map_err(CliError::from)?;
            set.add_source(&file, &vars.render(&raw))?;
        }
        set.check_complete()?;
        Ok(set)
    }

    fn add_source(&mut self, file: &Path, text: &str) -> Result<()> {
        for (idx, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let value = serde_yaml::Value::deserialize(de)
                .map_err(|e| CliError::with_source(CliErrorKind::Usage(format!("{} document {} is not valid YAML", file.display(), idx + 1)), e))?;
            if value.is_null() { continue; }
            let header: Header = serde_yaml::from_value(value.clone())
                .map_err(|e| CliError::with_source(CliErrorKind::Usage(format!("{} document {} has an invalid header", file.display(), idx + 1)), e))?;
            let kind_str = header.kind.ok_or_else(|| usage(format!("{} document {} has no kind", file.display(), idx + 1)))?;
            let kind = ManifestKind::parse(&kind_str)
                .ok_or_else(|| usage(format!("{} document {}: unsupported kind {kind_str}", file.display(), idx + 1)))?;
            let name = header.metadata.and_then(|m| m.name)
                .ok_or_else(|| usage(format!("{} document {}: {kind} has no metadata.name", file.display(), idx + 1)))?;
            let body = serde_yaml::to_string(&value)?;
            self.docs.entry(kind).or_default().push(ManifestDoc { kind, name, source: file.to_path_buf(), body, value });
        }
        Ok(())
    }

    fn check_complete(&self) -> Result<()> {
        let missing: Vec<&str> = ManifestKind::APPLY_ORDER.iter().filter(|k| !self.docs.contains_key(k)).map(|k| k.as_str()).collect();
        if !missing.is_empty() {
            return Err(usage(format!("manifest set is missing: {}", missing.join(", "))));
        }
        Ok(())
    }

    /// Documents in apply order; within a kind, in file order.
    pub fn ordered(&self) -> impl Iterator<Item = &ManifestDoc> {
        ManifestKind::APPLY_ORDER.into_iter().flat_map(move |k| self.docs.get(&k).into_iter().flatten())
    }

    pub fn of_kind(&self, kind: ManifestKind) -> &[ManifestDoc] { self.docs.get(&kind).map(Vec::as_slice).unwrap_or(&[]) }

    /// Containers of Deployment documents that define no readiness probe.
    pub fn containers_without_readiness(&self) -> Vec<String> {
        let mut out = Vec::new();
        for d in self.of_kind(ManifestKind::Deployment) {
            let containers = d.value.get("spec").and_then(|s| s.get("template")).and_then(|t| t.get("spec"))
                .and_then(|s| s.get("containers")).and_then(|c| c.as_sequence());
            for c in containers.into_iter().flatten() {
                if c.get("readinessProbe").is_none() {
                    let cname = c.get("name").and_then(|n| n.as_str()).unwrap_or("?");
                    out.push(format!("{}/{}", d.name, cname));
                }
            }
        }
        out
    }

    /// Service account the deployment's pods run as, if the deployment names one.
    pub fn deployment_service_account(&self, deployment: &str) -> Option<String> {
        self.of_kind(ManifestKind::Deployment).iter().find(|d| d.name == deployment)
            .and_then(|d| d.value.get("spec")?.get("template")?.get("spec")?.get("serviceAccountName")?.as_str().map(str::to_string))
    }
}

pub fn apply_command(namespace: &str, doc: &ManifestDoc) -> CommandSpec { apply_stdin(Some(namespace), doc.body.clone()) }

/// Apply every document in order, stopping at the first failure.
pub fn apply_all<R: CommandRunner + ?Sized>(runner: &R, namespace: &str, set: &ManifestSet) -> Result<Vec<(ManifestKind, String)>> {
    for c in set.containers_without_readiness() {
        warn!(event="manifests.readiness_probe_missing", container=%c);
    }
    let mut applied = Vec::new();
    for doc in set.ordered() {
        run_checked(runner, &apply_command(namespace, doc))
            .with_context(|| format!("apply {} {} from {}", doc.kind, doc.name, doc.source.display()))?;
        info!(event="manifests.applied", kind=%doc.kind, name=%doc.name, namespace);
        applied.push((doc.kind, doc.name.clone()));
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use crate::test_support::ScriptedRunner;

    const ALL_IN_ONE: &str = r#"
apiVersion: autoscaling/v2
kind: HorizontalPodAutoscaler
metadata: { name: web-hpa }
---
apiVersion: policy/v1
kind: PodDisruptionBudget
metadata: { name: web-pdb }
---
apiVersion: apps/v1
kind: Deployment
metadata: { name: web }
spec:
  template:
    spec:
      serviceAccountName: web-sa
      containers:
        - name: app
          image: ${IMAGE}
---
apiVersion: v1
kind: Service
metadata: { name: web }
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata: { name: web-ingress }
---
apiVersion: v1
kind: ConfigMap
metadata: { name: web-config }
---
apiVersion: v1
kind: ServiceAccount
metadata: { name: web-sa }
"#;

    fn dir_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let d = tempfile::tempdir().unwrap();
        for (name, body) in files { fs::write(d.path().join(name), body).unwrap(); }
        d
    }

    #[test]
    fn render_replaces_known_placeholders_only() {
        let vars = Substitutions::new().set("IMAGE", "reg/app:1").set("NAMESPACE", "web");
        assert_eq!(vars.render("image: ${IMAGE} ns=${NAMESPACE} keep=${OTHER} $HOME ${"), "image: reg/app:1 ns=web keep=${OTHER} $HOME ${");
    }

    #[test]
    fn ordered_follows_dependency_order() {
        let d = dir_with(&[("all.yaml", ALL_IN_ONE)]);
        let set = ManifestSet::load(d.path(), &Substitutions::new().set("IMAGE", "reg/app:7")).unwrap();
        let kinds: Vec<ManifestKind> = set.ordered().map(|doc| doc.kind).collect();
        assert_eq!(kinds, ManifestKind::APPLY_ORDER.to_vec());
        let deploy = &set.of_kind(ManifestKind::Deployment)[0];
        assert!(deploy.body.contains("reg/app:7"));
        assert_eq!(set.deployment_service_account("web").as_deref(), Some("web-sa"));
        assert_eq!(set.containers_without_readiness(), vec!["web/app".to_string()]);
    }

    #[test]
    fn missing_kind_is_usage_error() {
        let d = dir_with(&[("sa.yaml", "kind: ServiceAccount\nmetadata: { name: sa }\n")]);
        let err = ManifestSet::load(d.path(), &Substitutions::new()).unwrap_err();
        assert_eq!(crate::errors::classify_exit_code(&err), 2);
        assert!(err.to_string().contains("ConfigMap"));
    }

    #[test]
    fn unknown_kind_and_missing_kind_field_rejected() {
        let d = dir_with(&[("x.yaml", "kind: CronJob\nmetadata: { name: c }\n")]);
        assert!(ManifestSet::load(d.path(), &Substitutions::new()).unwrap_err().to_string().contains("unsupported kind CronJob"));
        let d = dir_with(&[("x.yml", "metadata: { name: c }\n")]);
        assert!(ManifestSet::load(d.path(), &Substitutions::new()).unwrap_err().to_string().contains("has no kind"));
    }

    #[test]
    fn apply_stops_on_first_failure() {
        let d = dir_with(&[("all.yaml", ALL_IN_ONE)]);
        let set = ManifestSet::load(d.path(), &Substitutions::new()).unwrap();
        let runner = ScriptedRunner::new().on("kubectl apply", CommandOutput::failed(1, "forbidden"));
        assert!(apply_all(&runner, "web", &set).is_err());
        assert_eq!(runner.count("kubectl apply"), 1);
        assert!(runner.stdin_of("kubectl apply")[0].contains("kind: ServiceAccount"));
    }
}
