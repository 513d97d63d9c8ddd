use assert_cmd::Command;
use std::path::{Path, PathBuf};

fn bin() -> Command { Command::cargo_bin("deployctl").unwrap() }

fn fixtures() -> PathBuf { PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/manifests") }

/// Clean environment reading `config` as its config file; no AWS settings.
fn with_config(config: &Path) -> Command {
    let mut cmd = bin();
    cmd.env_clear().env("DEPLOYCTL_CONFIG_FILE", config);
    cmd
}

fn code_of(cmd: &mut Command) -> i32 { cmd.assert().failure().get_output().status.code().unwrap() }

#[test]
fn usage_error_bad_flag() {
    let code = code_of(bin().arg("--nonexistent"));
    assert_eq!(code, 2);
}

#[test]
fn usage_error_unsupported_shell() {
    let code = code_of(bin().args(["completions", "--shell", "cmd.exe"]));
    assert_eq!(code, 2);
}

#[test]
fn config_error_invalid_toml() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    std::fs::write(&cfg, "***").unwrap();
    let code = code_of(with_config(&cfg).args(["pipeline", "--dry-run"]));
    assert_eq!(code, 10, "expected config code 10 got {code}");
}

#[test]
fn config_error_unknown_key() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    std::fs::write(&cfg, "replica_count = 3\n").unwrap();
    assert_eq!(code_of(with_config(&cfg).args(["pipeline", "--dry-run"])), 10);
}

#[test]
fn config_error_missing_account() {
    let tmp = tempfile::tempdir().unwrap();
    let code = code_of(with_config(&tmp.path().join("none.toml")).env("AWS_REGION", "us-west-2").args(["pipeline", "--dry-run"]));
    assert_eq!(code, 10);
}

#[test]
fn config_error_invalid_namespace() {
    let tmp = tempfile::tempdir().unwrap();
    let code = code_of(with_config(&tmp.path().join("none.toml")).env("NAMESPACE", "Not_A_Label").args(["pipeline", "--dry-run"]));
    assert_eq!(code, 10);
}

#[test]
fn config_error_invalid_build_id() {
    let tmp = tempfile::tempdir().unwrap();
    let code = code_of(with_config(&tmp.path().join("none.toml")).args(["--build-id", "not a tag", "pipeline", "--dry-run"]));
    assert_eq!(code, 10);
}

#[test]
fn usage_error_missing_manifest_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    std::fs::write(&cfg, format!("manifests_dir = {:?}\n", tmp.path().join("k8s"))).unwrap();
    let code = code_of(with_config(&cfg)
        .env("AWS_ACCOUNT_ID", "123456789012")
        .env("AWS_REGION", "us-west-2")
        .args(["pipeline", "--dry-run", "--stage", "deploy"]));
    assert_eq!(code, 2);
}

#[test]
fn usage_error_missing_terraform_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = tmp.path().join("config.toml");
    std::fs::write(&cfg, format!("terraform_dir = {:?}\nmanifests_dir = {:?}\n", tmp.path().join("terraform"), fixtures())).unwrap();
    let code = code_of(with_config(&cfg)
        .env("AWS_ACCOUNT_ID", "123456789012")
        .env("AWS_REGION", "us-west-2")
        .arg("infra"));
    assert_eq!(code, 2);
}

#[test]
fn runtime_error_when_tool_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let empty_path = tmp.path().join("bin");
    std::fs::create_dir_all(&empty_path).unwrap();
    let assert = with_config(&tmp.path().join("none.toml"))
        .env("PATH", &empty_path)
        .env("AWS_ACCOUNT_ID", "123456789012")
        .env("AWS_REGION", "us-west-2")
        .arg("ecr")
        .assert()
        .failure();
    assert_eq!(assert.get_output().status.code().unwrap(), 20);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("aws not found in PATH"), "stderr was: {stderr}");
}
