//! Local process runner.
//!
//! Runs a plugin binary directly on the host. The request is written to the
//! process's stdin and its stdout is the response.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::process::run_with_input;
use super::{Invocation, RunError, Runner};

/// Runs plugins as local processes.
///
/// The child inherits the parent environment, plus any variables set with
/// [`LocalRunner::with_env`].
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {
  working_dir: Option<PathBuf>,
  env: BTreeMap<String, String>,
}

impl LocalRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run processes in `dir` instead of the current directory.
  pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }
}

#[async_trait]
impl Runner for LocalRunner {
  async fn run(
    &self,
    invocation: &Invocation<'_>,
    input: Vec<u8>,
    cancel: &CancellationToken,
  ) -> Result<Vec<u8>, RunError> {
    info!(plugin = %invocation.plugin, command = %invocation.program, "running local plugin");

    let mut command = Command::new(invocation.program);
    command.args(invocation.args).envs(&self.env);
    if let Some(dir) = &self.working_dir {
      command.current_dir(dir);
    }

    debug!(args = ?invocation.args, working_dir = ?self.working_dir, "spawning process");

    let result = tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        return Err(RunError::Cancelled {
          program: invocation.program.to_string(),
        });
      }
      result = run_with_input(command, invocation.plugin, input) => result,
    };
    let output = result.map_err(|source| RunError::Spawn {
      program: invocation.program.to_string(),
      source,
    })?;

    if !output.success() {
      return Err(RunError::NonZeroExit {
        program: invocation.program.to_string(),
        code: output.code,
        stderr: output.stderr,
      });
    }

    Ok(output.stdout)
  }
}
