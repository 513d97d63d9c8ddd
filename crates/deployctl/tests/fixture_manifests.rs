use deployctl::k8s::manifests::{ManifestKind, ManifestSet, Substitutions};
use std::path::PathBuf;

fn fixtures() -> PathBuf { PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/manifests") }

fn load() -> ManifestSet {
    let vars = Substitutions::new()
        .set("IMAGE", "123456789012.dkr.ecr.us-west-2.amazonaws.com/flask-app:42")
        .set("NAMESPACE", "web")
        .set("BUILD_ID", "42")
        .set("AWS_REGION", "us-west-2");
    ManifestSet::load(&fixtures(), &vars).unwrap()
}

#[test]
fn fixture_set_is_complete_and_ordered() {
    let set = load();
    let kinds: Vec<ManifestKind> = set.ordered().map(|d| d.kind).collect();
    assert_eq!(kinds, ManifestKind::APPLY_ORDER.to_vec());
}

#[test]
fn deployment_renders_image_and_probes_health() {
    let set = load();
    let d = &set.of_kind(ManifestKind::Deployment)[0];
    assert!(!d.body.contains("${"), "unrendered placeholder in {}", d.body);
    let spec = &d.value["spec"];
    assert_eq!(spec["replicas"].as_u64(), Some(3));
    let container = &spec["template"]["spec"]["containers"][0];
    assert_eq!(container["image"].as_str(), Some("123456789012.dkr.ecr.us-west-2.amazonaws.com/flask-app:42"));
    assert_eq!(container["readinessProbe"]["httpGet"]["path"].as_str(), Some("/health"));
    assert!(set.containers_without_readiness().is_empty());
    assert_eq!(set.deployment_service_account("flask-app").as_deref(), Some("flask-app-sa"));
}

#[test]
fn ingress_is_an_internet_facing_alb() {
    let set = load();
    let ing = &set.of_kind(ManifestKind::Ingress)[0];
    assert_eq!(ing.name, "flask-app-ingress");
    assert_eq!(ing.value["spec"]["ingressClassName"].as_str(), Some("alb"));
    assert_eq!(ing.value["metadata"]["annotations"]["alb.ingress.kubernetes.io/scheme"].as_str(), Some("internet-facing"));
    assert_eq!(ing.value["metadata"]["namespace"].as_str(), Some("web"));
}
