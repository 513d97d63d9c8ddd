//! Container image build and push.
use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::info;
use crate::runner::{run_checked, CommandRunner, CommandSpec};

pub const LATEST: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(registry: impl Into<String>, repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self { registry: registry.into(), repository: repository.into(), tag: tag.into() }
    }
    pub fn with_tag(&self, tag: impl Into<String>) -> Self { Self { tag: tag.into(), ..self.clone() } }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}:{}", self.registry, self.repository, self.tag) }
}

pub fn login_command(registry: &str, password: &str) -> CommandSpec {
    CommandSpec::new("docker").args(["login", "--username", "AWS", "--password-stdin", registry]).stdin(password)
}

pub fn build_command(context: &Path, dockerfile: &Path, tags: &[ImageRef]) -> CommandSpec {
    let mut spec = CommandSpec::new("docker").arg("build").arg("-f").arg(dockerfile.to_string_lossy());
    for t in tags { spec = spec.arg("-t").arg(t.to_string()); }
    spec.arg(context.to_string_lossy()).streamed()
}

pub fn push_command(image: &ImageRef) -> CommandSpec {
    CommandSpec::new("docker").args(["push".to_string(), image.to_string()]).streamed()
}

/// Tags one build is published under: the build tag plus `latest`.
pub fn publish_tags(image: &ImageRef) -> Vec<ImageRef> {
    if image.tag == LATEST { vec![image.clone()] } else { vec![image.clone(), image.with_tag(LATEST)] }
}

/// Log in, build once with both tags, push the build tag then `latest`.
/// Returns the pushed references in push order.
pub fn build_and_push<R: CommandRunner + ?Sized>(runner: &R, image: &ImageRef, context: &Path, dockerfile: &Path, password: &str) -> Result<Vec<ImageRef>> {
    run_checked(runner, &login_command(&image.registry, password))?;
    info!(event="image.login", registry=%image.registry);
    let tags = publish_tags(image);
    run_checked(runner, &build_command(context, dockerfile, &tags))?;
    info!(event="image.built", image=%image);
    for t in &tags {
        run_checked(runner, &push_command(t))?;
        info!(event="image.pushed", image=%t);
    }
    Ok(tags)
}
