//! deployctl: drives terraform, aws, docker and kubectl through the
//! infra → build → deploy pipeline for the EKS-hosted web app.
pub mod commands;
pub mod config;
pub mod ecr;
pub mod errors;
pub mod health;
pub mod image;
pub mod k8s;
pub mod logging;
pub mod naming;
pub mod pipeline;
pub mod runner;
pub mod terraform;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
