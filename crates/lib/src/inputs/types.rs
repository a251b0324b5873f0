//! Dependency reference types.
//!
//! An [`Input`] names one dependency of a bundle. It is a closed set of kinds
//! so every consumer has to decide what to do with each of them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dependency reference as written in configuration.
///
/// ```yaml
/// deps:
///   - local: common
///   - registry: { owner: acme, name: types, version: v3 }
///   - buf: { remote: buf.build, owner: googleapis, repository: googleapis }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
  /// Another bundle of the same repository, by name.
  Local(String),
  /// A package in the primary registry.
  Registry(RegistryInput),
  /// A module in a named external registry.
  Buf(BufInput),
}

/// A package in the primary registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryInput {
  pub owner: String,
  pub name: String,
  /// Exact version; overrides any lock pin.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

/// A module in an external registry identified by its remote host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufInput {
  pub remote: String,
  pub owner: String,
  pub repository: String,
  /// Exact version; overrides any lock pin.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reference: Option<String>,
}

impl Input {
  pub fn local(bundle: impl Into<String>) -> Self {
    Input::Local(bundle.into())
  }

  pub fn registry(owner: impl Into<String>, name: impl Into<String>, version: Option<&str>) -> Self {
    Input::Registry(RegistryInput {
      owner: owner.into(),
      name: name.into(),
      version: version.map(str::to_string),
    })
  }

  /// Short name of the input kind, used in diagnostics.
  pub fn kind(&self) -> &'static str {
    match self {
      Input::Local(_) => "local",
      Input::Registry(_) => "registry",
      Input::Buf(_) => "buf",
    }
  }

  /// The name lock files and caches key this dependency by.
  pub fn full_name(&self) -> String {
    match self {
      Input::Local(bundle) => bundle.clone(),
      Input::Registry(r) => format!("{}/{}", r.owner, r.name),
      Input::Buf(b) => format!("{}/{}/{}", b.remote, b.owner, b.repository),
    }
  }

  /// The explicitly requested version, if any.
  pub fn version(&self) -> Option<&str> {
    match self {
      Input::Local(_) => None,
      Input::Registry(r) => r.version.as_deref(),
      Input::Buf(b) => b.reference.as_deref(),
    }
  }

  pub fn is_local(&self) -> bool {
    matches!(self, Input::Local(_))
  }
}

impl fmt::Display for Input {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.version() {
      Some(version) => write!(f, "{}:{}@{}", self.kind(), self.full_name(), version),
      None => write!(f, "{}:{}", self.kind(), self.full_name()),
    }
  }
}
