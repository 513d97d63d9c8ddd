use anyhow::Result;use clap_complete::{generate, shells::{Bash,Zsh,Fish}};use clap::CommandFactory;use std::io;use super::Cli;use tracing::info;
use crate::errors::{CliError, CliErrorKind};

pub fn handle(shell: String) -> Result<()> { let mut cmd = Cli::command(); match shell.as_str() { "bash"=>{generate(Bash,&mut cmd,"deployctl",&mut io::stdout());}, "zsh"=>{generate(Zsh,&mut cmd,"deployctl",&mut io::stdout());}, "fish"=>{generate(Fish,&mut cmd,"deployctl",&mut io::stdout());}, _=>{ return Err(CliError::new(CliErrorKind::Usage(format!("unsupported shell: {shell}"))).into()); } }; info!(event="completions.generated", shell=%shell); Ok(()) }
