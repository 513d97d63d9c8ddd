use thiserror::Error;
use std::fmt;

#[derive(Error, Debug)]
pub enum CliErrorKind {
    #[error("usage error: {0}")] Usage(String),
    #[error("config error: {0}")] Config(String),
    #[error("runtime error: {0}")] Runtime(String),
    #[error("io error: {0}")] Io(String),
    #[error("network error: {0}")] Network(String),
    #[error("auth error: {0}")] Auth(String),
    #[error("rollout error: {0}")] Rollout(String),
}

#[derive(Debug)]
pub struct CliError { pub kind: CliErrorKind, pub source: Option<anyhow::Error> }
impl fmt::Display for CliError { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.kind.fmt(f) } }
impl std::error::Error for CliError { fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { self.source.as_ref().map(|e| e.as_ref() as _) } }

impl CliErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 10,
            Self::Runtime(_) => 20,
            Self::Io(_) => 30,
            Self::Network(_) => 40,
            Self::Auth(_) => 50,
            Self::Rollout(_) => 60,
        }
    }
}

impl CliError {
    pub fn new(kind: CliErrorKind) -> Self { Self { kind, source: None } }
    pub fn with_source<E: Into<anyhow::Error>>(kind: CliErrorKind, err: E) -> Self { Self { kind, source: Some(err.into()) } }
}

impl From<std::io::Error> for CliError { fn from(e: std::io::Error) -> Self { Self::with_source(CliErrorKind::Io(e.to_string()), e) } }

/// Walk an error chain and map the first classified error to a process exit code.
/// Unclassified errors are runtime failures.
pub fn classify_exit_code(e: &anyhow::Error) -> i32 {
    use std::error::Error;
    let mut cur: &dyn Error = e.as_ref();
    loop {
        if let Some(cli) = cur.downcast_ref::<CliError>() { tracing::debug!(?cli, code=cli.kind.code(), "classified_cli_error"); return cli.kind.code(); }
        if cur.downcast_ref::<std::io::Error>().is_some() { return 30; }
        if let Some(src) = cur.source() { cur = src; } else { break; }
    }
    20
}
