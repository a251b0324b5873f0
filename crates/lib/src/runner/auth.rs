//! Registry credentials for container image pulls.
//!
//! Credentials are configured as an ordered list of rules. The first rule
//! whose glob matches the image reference decides how to authenticate:
//!
//! ```yaml
//! registry_auth:
//!   - registry: "ghcr.io/acme/*"
//!     kind: token              # bearer token from $REGISTRY_TOKEN
//!   - registry: "registry.example.com/*"
//!     kind: basic
//!     username: ci
//!     password_env: EXAMPLE_PASSWORD
//!   - registry: "*.dkr.ecr.*.amazonaws.com/*"
//!     kind: ecr
//!     region: us-east-1
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::consts::DEFAULT_TOKEN_ENV;

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("invalid registry pattern '{pattern}': {source}")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error("environment variable {var} is not set")]
  MissingEnv { var: String },

  #[error("failed to obtain a registry token: {message}")]
  CloudToken { message: String },

  #[error("registry token is not valid base64 'user:password': {message}")]
  InvalidToken { message: String },
}

/// One registry-auth rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRule {
  /// Glob matched against the full image reference.
  pub registry: String,
  #[serde(flatten)]
  pub auth: AuthKind,
}

fn default_token_env() -> String {
  DEFAULT_TOKEN_ENV.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthKind {
  /// Static username with a password read from the environment.
  Basic { username: String, password_env: String },
  /// Bearer token read from the environment.
  Token {
    #[serde(default = "default_token_env")]
    token_env: String,
  },
  /// Short-lived token exchanged with the cloud provider.
  Ecr {
    region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    registry_id: Option<String>,
  },
}

/// A resolved credential, ready to hand to the container engine.
#[derive(Clone, PartialEq, Eq)]
pub enum RegistryCredential {
  Basic { username: String, password: String },
  Token(String),
}

impl fmt::Debug for RegistryCredential {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RegistryCredential::Basic { username, .. } => write!(f, "Basic({username}, ***)"),
      RegistryCredential::Token(_) => write!(f, "Token(***)"),
    }
  }
}

impl RegistryCredential {
  /// Decode a base64 `user:password` token as issued by cloud registries.
  pub fn from_basic_token(token: &str) -> Result<Self, AuthError> {
    let decoded = STANDARD
      .decode(token.trim())
      .map_err(|e| AuthError::InvalidToken { message: e.to_string() })?;
    let decoded = String::from_utf8(decoded).map_err(|e| AuthError::InvalidToken { message: e.to_string() })?;
    let (username, password) = decoded.split_once(':').ok_or_else(|| AuthError::InvalidToken {
      message: "missing ':' separator".to_string(),
    })?;
    Ok(RegistryCredential::Basic {
      username: username.to_string(),
      password: password.to_string(),
    })
  }
}

/// Exchanges cloud credentials for a registry token.
#[async_trait]
pub trait CloudTokenSource: Send + Sync {
  /// A base64 `user:password` authorization token.
  async fn authorization_token(&self, region: &str, registry_id: Option<&str>) -> Result<String, AuthError>;
}

/// Token source backed by the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliTokenSource {
  program: String,
}

impl Default for AwsCliTokenSource {
  fn default() -> Self {
    Self {
      program: "aws".to_string(),
    }
  }
}

#[async_trait]
impl CloudTokenSource for AwsCliTokenSource {
  async fn authorization_token(&self, region: &str, registry_id: Option<&str>) -> Result<String, AuthError> {
    let mut command = Command::new(&self.program);
    command.args([
      "ecr",
      "get-authorization-token",
      "--region",
      region,
      "--output",
      "text",
      "--query",
      "authorizationData[0].authorizationToken",
    ]);
    if let Some(id) = registry_id {
      command.args(["--registry-ids", id]);
    }

    debug!(region, "requesting registry token");
    let output = command.output().await.map_err(|e| AuthError::CloudToken {
      message: format!("failed to run {}: {e}", self.program),
    })?;
    if !output.status.success() {
      return Err(AuthError::CloudToken {
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

/// Matches image references against the configured rules.
pub struct RegistryAuth {
  rules: Vec<(Pattern, AuthRule)>,
  cloud: Arc<dyn CloudTokenSource>,
}

impl fmt::Debug for RegistryAuth {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RegistryAuth")
      .field("rules", &self.rules.iter().map(|(_, r)| r).collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

impl RegistryAuth {
  pub fn new(rules: &[AuthRule], cloud: Arc<dyn CloudTokenSource>) -> Result<Self, AuthError> {
    let rules = rules
      .iter()
      .map(|rule| {
        Pattern::new(&rule.registry)
          .map(|pattern| (pattern, rule.clone()))
          .map_err(|source| AuthError::InvalidPattern {
            pattern: rule.registry.clone(),
            source,
          })
      })
      .collect::<Result<_, _>>()?;
    Ok(Self { rules, cloud })
  }

  /// No rules; every pull is anonymous.
  pub fn anonymous() -> Self {
    Self {
      rules: Vec::new(),
      cloud: Arc::new(AwsCliTokenSource::default()),
    }
  }

  /// The first rule matching `image`.
  pub fn matching_rule(&self, image: &str) -> Option<&AuthRule> {
    self
      .rules
      .iter()
      .find(|(pattern, _)| pattern.matches(image))
      .map(|(_, rule)| rule)
  }

  /// Resolve the credential for `image`, or `None` when no rule matches.
  pub async fn credential_for(&self, image: &str) -> Result<Option<RegistryCredential>, AuthError> {
    let Some(rule) = self.matching_rule(image) else {
      return Ok(None);
    };
    debug!(image, rule = %rule.registry, "matched registry auth rule");

    let credential = match &rule.auth {
      AuthKind::Basic { username, password_env } => RegistryCredential::Basic {
        username: username.clone(),
        password: read_env(password_env)?,
      },
      AuthKind::Token { token_env } => RegistryCredential::Token(read_env(token_env)?),
      AuthKind::Ecr { region, registry_id } => {
        let token = self.cloud.authorization_token(region, registry_id.as_deref()).await?;
        RegistryCredential::from_basic_token(&token)?
      }
    };
    Ok(Some(credential))
  }
}

fn read_env(var: &str) -> Result<String, AuthError> {
  std::env::var(var)
    .ok()
    .filter(|v| !v.is_empty())
    .ok_or_else(|| AuthError::MissingEnv { var: var.to_string() })
}

/// Registry host of an image reference; `docker.io` for bare names.
pub fn registry_host(image: &str) -> &str {
  match image.split_once('/') {
    Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => first,
    _ => "docker.io",
  }
}
