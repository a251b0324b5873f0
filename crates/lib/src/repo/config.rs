//! Repository and bundle configuration files.
//!
//! ```yaml
//! # protoforge.yaml
//! default_reference: main
//! registry:
//!   url: https://registry.example.com
//!   token_env: REGISTRY_TOKEN
//! registry_auth:
//!   - registry: "*.dkr.ecr.*.amazonaws.com/*"
//!     kind: ecr
//!     region: us-east-1
//! plugins:
//!   - name: go
//!     image: ghcr.io/acme/protoc-gen-go:1.34
//!     options: { paths: source_relative }
//! bundles:
//!   - name: common
//!     dir: common
//!   - name: api
//!     dir: api
//!     deps:
//!       - local: common
//!       - registry: { owner: acme, name: types }
//!     plugins:
//!       - name: go-grpc
//!         base: go
//!         image: ghcr.io/acme/protoc-gen-go-grpc:1.5
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{BUNDLE_CONFIG_FILENAME, DEFAULT_REFERENCE, REPO_CONFIG_FILENAME};
use crate::inputs::Input;
use crate::plugin::publish::PublishConfig;
use crate::runner::auth::AuthRule;

/// Errors in repository or bundle configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  /// A bundle has both inline settings and a bundle.yaml.
  #[error("bundle '{bundle}' is configured both inline and in {BUNDLE_CONFIG_FILENAME}")]
  DuplicateBundleSettings { bundle: String },

  #[error("plugin '{plugin}' is defined more than once in {scope}")]
  DuplicatePlugin { scope: String, plugin: String },

  /// `base` names a plugin that exists in the same scope but after this one.
  #[error("plugin '{plugin}' extends '{base}', which is defined later in {scope}")]
  PluginBaseDefinedLater {
    scope: String,
    plugin: String,
    base: String,
  },

  /// `base` names a plugin that exists nowhere in reach.
  #[error("plugin '{plugin}' extends undefined plugin '{base}' in {scope}")]
  UndefinedPluginBase {
    scope: String,
    plugin: String,
    base: String,
  },

  #[error("plugin '{plugin}' has unsupported {field} '{value}'")]
  UnsupportedPluginType {
    plugin: String,
    field: &'static str,
    value: String,
  },

  #[error("plugin '{plugin}' needs '{field}' to run")]
  MissingPluginField { plugin: String, field: &'static str },

  #[error("option '{key}' of plugin '{plugin}' must be a string, number or boolean")]
  InvalidOption { plugin: String, key: String },
}

/// Connection settings for an HTTP registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
  pub url: String,
  /// Environment variable holding a bearer token.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub token_env: Option<String>,
}

/// A plugin definition as written, before `base` is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginConfig {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub base: Option<String>,
  /// `protocol` or `client`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub kind: Option<String>,
  /// `container`, `local` or `builtin`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub command: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub args: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub builtin: Option<String>,
  /// Output directory prefix for the plugin's files.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub out: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub options: BTreeMap<String, serde_yaml::Value>,
}

/// Settings a bundle may carry inline or in its own `bundle.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleSettings {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub deps: Vec<Input>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub plugins: Vec<PluginConfig>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub publish: Option<PublishConfig>,
}

impl BundleSettings {
  pub fn is_empty(&self) -> bool {
    self.deps.is_empty() && self.plugins.is_empty() && self.publish.is_none()
  }

  /// Read `bundle.yaml` from `dir`, if present.
  pub fn load(dir: &Path) -> Result<Option<Self>, ConfigError> {
    let path = dir.join(BUNDLE_CONFIG_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(ConfigError::Read { path, source }),
    };
    let settings = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
    Ok(Some(settings))
  }
}

/// A bundle entry of the repository configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleEntry {
  pub name: String,
  /// Directory relative to the repository root.
  pub dir: PathBuf,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub deps: Vec<Input>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub plugins: Vec<PluginConfig>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub publish: Option<PublishConfig>,
}

impl BundleEntry {
  /// The inline settings of this entry.
  pub fn settings(&self) -> BundleSettings {
    BundleSettings {
      deps: self.deps.clone(),
      plugins: self.plugins.clone(),
      publish: self.publish.clone(),
    }
  }
}

fn default_reference() -> String {
  DEFAULT_REFERENCE.to_string()
}

/// Top-level `protoforge.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
  #[serde(default)]
  pub bundles: Vec<BundleEntry>,
  #[serde(default)]
  pub plugins: Vec<PluginConfig>,
  #[serde(default)]
  pub registry_auth: Vec<AuthRule>,
  #[serde(default)]
  pub registry: Option<RegistryConfig>,
  /// External registries serving `buf` inputs, keyed by remote host.
  #[serde(default)]
  pub remotes: BTreeMap<String, RegistryConfig>,
  #[serde(default = "default_reference")]
  pub default_reference: String,
}

impl Default for RepoConfig {
  fn default() -> Self {
    Self {
      bundles: Vec::new(),
      plugins: Vec::new(),
      registry_auth: Vec::new(),
      registry: None,
      remotes: BTreeMap::new(),
      default_reference: default_reference(),
    }
  }
}

impl RepoConfig {
  /// Read `protoforge.yaml` from the repository root.
  pub fn load(root: &Path) -> Result<Self, ConfigError> {
    let path = root.join(REPO_CONFIG_FILENAME);
    let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
      path: path.clone(),
      source,
    })?;
    Self::parse(&content, &path)
  }

  /// Parse configuration text; `path` is only used in diagnostics.
  pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
    serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }
}
