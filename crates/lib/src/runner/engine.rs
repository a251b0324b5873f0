//! Container engine seam.
//!
//! [`ContainerEngine`] is the small set of lifecycle calls the container
//! runner needs. [`DockerCli`] implements it by shelling out to a
//! docker-compatible CLI (`docker`, `podman`).

use std::io;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::auth::{RegistryCredential, registry_host};
use super::process::{ProcessOutput, run_with_input};

/// Label attached to every container this tool creates.
pub const CONTAINER_LABEL: &str = "dev.protoforge.plugin";

#[derive(Debug, Error)]
pub enum EngineError {
  /// The registry refused the pull for lack of credentials.
  #[error("registry denied access to '{image}': {message}")]
  Unauthorized { image: String, message: String },

  #[error("failed to pull '{image}': {message}")]
  PullFailed { image: String, message: String },

  #[error("container {action} failed: {message}")]
  CommandFailed { action: &'static str, message: String },

  #[error("container {action} failed: {source}")]
  Io {
    action: &'static str,
    #[source]
    source: io::Error,
  },
}

/// What to create.
#[derive(Debug, Clone)]
pub struct ContainerSpec<'a> {
  pub image: &'a str,
  pub args: &'a [String],
  /// Plugin name, attached as a label and used to tag forwarded output.
  pub plugin: &'a str,
}

/// Outcome of an attached container run.
#[derive(Debug)]
pub struct ContainerOutput {
  pub code: Option<i32>,
  pub stdout: Vec<u8>,
  pub stderr: String,
}

impl From<ProcessOutput> for ContainerOutput {
  fn from(output: ProcessOutput) -> Self {
    Self {
      code: output.code,
      stdout: output.stdout,
      stderr: output.stderr,
    }
  }
}

impl ContainerOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
  async fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

  async fn pull(&self, image: &str, credential: Option<&RegistryCredential>) -> Result<(), EngineError>;

  /// Create a stopped container with stdin open and networking disabled.
  async fn create(&self, spec: &ContainerSpec<'_>) -> Result<String, EngineError>;

  /// Start `id` attached, stream `input` to its stdin and wait for it to exit.
  async fn run_attached(&self, id: &str, plugin: &str, input: Vec<u8>) -> Result<ContainerOutput, EngineError>;

  /// Force-remove `id`. Removing a missing container is not an error.
  async fn remove(&self, id: &str) -> Result<(), EngineError>;
}

/// Engine backed by the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
  program: String,
}

impl Default for DockerCli {
  fn default() -> Self {
    Self::new("docker")
  }
}

impl DockerCli {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
    }
  }

  fn command(&self) -> Command {
    let mut command = Command::new(&self.program);
    command.kill_on_drop(true);
    command
  }

  async fn output(&self, mut command: Command, action: &'static str) -> Result<std::process::Output, EngineError> {
    debug!(program = %self.program, action, "running container engine command");
    command
      .output()
      .await
      .map_err(|source| EngineError::Io { action, source })
  }
}

/// Whether engine output reads like a registry authentication failure.
pub fn is_auth_failure(message: &str) -> bool {
  let message = message.to_ascii_lowercase();
  ["unauthorized", "authentication required", "denied", "401", "no basic auth credentials"]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Render a docker `config.json` carrying `credential` for `image`'s registry.
pub fn docker_config(image: &str, credential: &RegistryCredential) -> serde_json::Value {
  let host = registry_host(image);
  let entry = match credential {
    RegistryCredential::Basic { username, password } => {
      json!({ "auth": STANDARD.encode(format!("{username}:{password}")) })
    }
    RegistryCredential::Token(token) => json!({ "registrytoken": token }),
  };
  json!({ "auths": { host: entry } })
}

fn write_docker_config(dir: &Path, image: &str, credential: &RegistryCredential) -> io::Result<()> {
  let config = serde_json::to_vec(&docker_config(image, credential)).map_err(io::Error::other)?;
  std::fs::write(dir.join("config.json"), config)
}

fn stderr_message(output: &std::process::Output) -> String {
  String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait]
impl ContainerEngine for DockerCli {
  async fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
    let mut command = self.command();
    command.args(["image", "inspect", "--format", "{{.Id}}", image]);
    let output = self.output(command, "inspect").await?;
    Ok(output.status.success())
  }

  async fn pull(&self, image: &str, credential: Option<&RegistryCredential>) -> Result<(), EngineError> {
    info!(image, authenticated = credential.is_some(), "pulling image");

    // Credentials go in a throwaway config dir so they never touch the
    // user's docker config.
    let config_dir = match credential {
      Some(credential) => {
        let dir = tempfile::tempdir().map_err(|source| EngineError::Io { action: "pull", source })?;
        write_docker_config(dir.path(), image, credential)
          .map_err(|source| EngineError::Io { action: "pull", source })?;
        Some(dir)
      }
      None => None,
    };

    let mut command = self.command();
    if let Some(dir) = &config_dir {
      command.arg("--config").arg(dir.path());
    }
    command.args(["pull", "--quiet", image]);

    let output = self.output(command, "pull").await?;
    if output.status.success() {
      return Ok(());
    }

    let message = stderr_message(&output);
    if is_auth_failure(&message) {
      Err(EngineError::Unauthorized {
        image: image.to_string(),
        message,
      })
    } else {
      Err(EngineError::PullFailed {
        image: image.to_string(),
        message,
      })
    }
  }

  async fn create(&self, spec: &ContainerSpec<'_>) -> Result<String, EngineError> {
    let mut command = self.command();
    command
      .args(["create", "--interactive", "--network", "none", "--label"])
      .arg(format!("{CONTAINER_LABEL}={}", spec.plugin))
      .arg(spec.image)
      .args(spec.args);

    let output = self.output(command, "create").await?;
    if !output.status.success() {
      return Err(EngineError::CommandFailed {
        action: "create",
        message: stderr_message(&output),
      });
    }

    let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if id.is_empty() {
      return Err(EngineError::CommandFailed {
        action: "create",
        message: "engine returned no container id".to_string(),
      });
    }
    debug!(container = %id, image = %spec.image, "created container");
    Ok(id)
  }

  async fn run_attached(&self, id: &str, plugin: &str, input: Vec<u8>) -> Result<ContainerOutput, EngineError> {
    let mut command = self.command();
    command.args(["start", "--attach", "--interactive", id]);

    let output = run_with_input(command, plugin, input)
      .await
      .map_err(|source| EngineError::Io { action: "start", source })?;
    Ok(output.into())
  }

  async fn remove(&self, id: &str) -> Result<(), EngineError> {
    let mut command = self.command();
    command.args(["rm", "--force", id]);

    let output = self.output(command, "remove").await?;
    let message = stderr_message(&output);
    if !output.status.success() && !message.contains("No such container") {
      return Err(EngineError::CommandFailed {
        action: "remove",
        message,
      });
    }
    debug!(container = %id, "removed container");
    Ok(())
  }
}
