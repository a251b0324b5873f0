//! Plugin execution backends.
//!
//! A [`Runner`] takes a serialized generator request, hands it to a process on
//! its standard input and returns whatever the process wrote to standard
//! output. Standard error is forwarded to the log line by line.
//!
//! # Modules
//!
//! - [`local`] - Runs a plugin as a local process
//! - [`container`] - Runs a plugin inside a container with pull-once image provisioning
//! - [`engine`] - The container engine seam and its `docker` CLI implementation
//! - [`auth`] - Registry credential resolution for image pulls

pub mod auth;
pub mod container;
pub mod engine;
pub mod local;
mod process;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use auth::{AuthError, RegistryAuth};
pub use container::ContainerRunner;
pub use engine::{ContainerEngine, DockerCli, EngineError};
pub use local::LocalRunner;

/// Errors raised while running a plugin process.
#[derive(Debug, Error)]
pub enum RunError {
  #[error("failed to start '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("'{program}' exited with {}{}", fmt_code(.code), fmt_stderr(.stderr))]
  NonZeroExit {
    program: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("'{program}' was cancelled")]
  Cancelled { program: String },

  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error(transparent)]
  Auth(#[from] AuthError),
}

fn fmt_code(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("exit code {code}"),
    None => "no exit code (killed by signal)".to_string(),
  }
}

fn fmt_stderr(stderr: &str) -> String {
  if stderr.is_empty() {
    String::new()
  } else {
    format!(":\n{stderr}")
  }
}

/// What to run for one plugin.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
  /// Plugin name, used to label forwarded output.
  pub plugin: &'a str,
  /// Command for local runs, image reference for container runs.
  pub program: &'a str,
  pub args: &'a [String],
}

/// Executes a plugin process with a request on stdin.
#[async_trait]
pub trait Runner: Send + Sync {
  /// Run to completion and return the process's standard output.
  ///
  /// Fails on a non-zero exit, and with [`RunError::Cancelled`] once `cancel`
  /// fires.
  async fn run(
    &self,
    invocation: &Invocation<'_>,
    input: Vec<u8>,
    cancel: &CancellationToken,
  ) -> Result<Vec<u8>, RunError>;
}
