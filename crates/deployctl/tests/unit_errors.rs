use anyhow::Context;
use deployctl::errors::{classify_exit_code, CliError, CliErrorKind};

#[test]
fn cli_error_kind_codes() {
    assert_eq!(CliErrorKind::Usage("u".into()).code(), 2);
    assert_eq!(CliErrorKind::Config("c".into()).code(), 10);
    assert_eq!(CliErrorKind::Runtime("r".into()).code(), 20);
    assert_eq!(CliErrorKind::Io("i".into()).code(), 30);
    assert_eq!(CliErrorKind::Network("n".into()).code(), 40);
    assert_eq!(CliErrorKind::Auth("a".into()).code(), 50);
    assert_eq!(CliErrorKind::Rollout("r".into()).code(), 60);
}

#[test]
fn classification_sees_through_context() {
    let inner: anyhow::Error = CliError::new(CliErrorKind::Rollout("deployment flask-app did not roll out".into())).into();
    let wrapped = Err::<(), _>(inner).context("deploy stage failed at wait_rollout").unwrap_err();
    assert_eq!(classify_exit_code(&wrapped), 60);
}

#[test]
fn io_and_unclassified_errors() {
    let io: anyhow::Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert_eq!(classify_exit_code(&io), 30);
    assert_eq!(classify_exit_code(&anyhow::anyhow!("something else")), 20);
}
