//! Lock file management for remote dependencies.
//!
//! The lock file (`protoforge.lock`) pins floating remote references to exact
//! versions so that builds are reproducible. It lives next to the repository
//! configuration.
//!
//! # Lock File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "dependencies": [
//!     { "name": "acme/types", "version": "v3" },
//!     { "name": "buf.build/googleapis/googleapis", "version": "61b203b9a9164be9a834f58c37be6f62" }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

/// Lock file name.
pub const LOCK_FILENAME: &str = "protoforge.lock";

/// A lock file containing pinned dependency versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
  /// Lock file format version.
  pub version: u32,
  /// Pins, sorted by name.
  #[serde(default)]
  pub dependencies: Vec<LockedDependency>,
}

/// A single pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedDependency {
  /// Fully-qualified dependency name, e.g. `acme/types`.
  pub name: String,
  /// Exact version the dependency resolved to.
  pub version: String,
}

/// Errors that can occur when working with lock files.
#[derive(Debug, Error)]
pub enum LockError {
  /// Failed to read the lock file.
  #[error("failed to read lock file: {0}")]
  Read(#[source] io::Error),

  /// Failed to write the lock file.
  #[error("failed to write lock file: {0}")]
  Write(#[source] io::Error),

  /// Failed to parse the lock file JSON.
  #[error("failed to parse lock file: {0}")]
  Parse(#[source] serde_json::Error),

  /// Failed to serialize the lock file.
  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  /// Lock file version is not supported.
  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),

  /// The same dependency is pinned twice.
  #[error("dependency '{0}' is pinned more than once")]
  DuplicateEntry(String),
}

impl Default for LockFile {
  fn default() -> Self {
    Self::new()
  }
}

impl LockFile {
  /// Create a new empty lock file.
  pub fn new() -> Self {
    Self {
      version: LOCK_VERSION,
      dependencies: Vec::new(),
    }
  }

  /// Load a lock file from the given path.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, LockError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(LockError::Read(e)),
    };

    let mut lock: LockFile = serde_json::from_str(&content).map_err(LockError::Parse)?;

    if lock.version != LOCK_VERSION {
      return Err(LockError::UnsupportedVersion(lock.version));
    }

    let mut seen = HashSet::new();
    for dep in &lock.dependencies {
      if !seen.insert(dep.name.as_str()) {
        return Err(LockError::DuplicateEntry(dep.name.clone()));
      }
    }

    lock.dependencies.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Some(lock))
  }

  /// Save the lock file to the given path.
  ///
  /// The file is written with pretty-printed JSON for readability.
  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    let mut content = serde_json::to_string_pretty(self).map_err(LockError::Serialize)?;
    content.push('\n');
    fs::write(path, content).map_err(LockError::Write)?;
    Ok(())
  }

  /// Write the lock file unless the file on disk already holds the same pins.
  ///
  /// Returns whether the file was written.
  pub fn write_if_changed(&self, path: &Path) -> Result<bool, LockError> {
    if LockFile::load(path)?.as_ref() == Some(self) {
      return Ok(false);
    }
    info!(path = %path.display(), "writing lock file");
    self.save(path)?;
    Ok(true)
  }

  /// Pinned version for a fully-qualified dependency name.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .dependencies
      .iter()
      .find(|d| d.name == name)
      .map(|d| d.version.as_str())
  }

  /// Insert or update a pin, keeping entries sorted by name.
  pub fn insert(&mut self, name: impl Into<String>, version: impl Into<String>) {
    let name = name.into();
    let version = version.into();
    match self.dependencies.binary_search_by(|d| d.name.as_str().cmp(&name)) {
      Ok(pos) => self.dependencies[pos].version = version,
      Err(pos) => self.dependencies.insert(pos, LockedDependency { name, version }),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.dependencies.is_empty()
  }

  pub fn len(&self) -> usize {
    self.dependencies.len()
  }
}
