//! Destinations for generated files.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace};

use crate::util::hash::{hash_bytes, hash_file};

#[derive(Debug, Error)]
pub enum SinkError {
  #[error("refusing to write '{path}': paths must be relative and stay inside the output directory")]
  InvalidPath { path: String },

  #[error("failed to write {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Receives generated files.
pub trait FileSink: Send + Sync {
  fn put_file(&self, path: &str, content: &[u8]) -> Result<(), SinkError>;
}

/// Reject empty, absolute and parent-escaping paths.
pub fn validate_path(path: &str) -> Result<&Path, SinkError> {
  let invalid = || SinkError::InvalidPath { path: path.to_string() };
  let candidate = Path::new(path);
  if path.is_empty() || candidate.has_root() {
    return Err(invalid());
  }
  let mut depth = 0usize;
  for component in candidate.components() {
    match component {
      Component::Normal(_) => depth += 1,
      Component::CurDir => {}
      Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(invalid)?,
      Component::RootDir | Component::Prefix(_) => return Err(invalid()),
    }
  }
  if depth == 0 {
    return Err(invalid());
  }
  Ok(candidate)
}

/// Writes files below a root directory.
#[derive(Debug, Clone)]
pub struct DirSink {
  root: PathBuf,
  skip_unchanged: bool,
}

impl DirSink {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      skip_unchanged: true,
    }
  }

  /// Rewrite files even when their content is unchanged.
  pub fn always_write(mut self) -> Self {
    self.skip_unchanged = false;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

impl FileSink for DirSink {
  fn put_file(&self, path: &str, content: &[u8]) -> Result<(), SinkError> {
    let target = self.root.join(validate_path(path)?);

    if self.skip_unchanged
      && let Ok(existing) = hash_file(&target)
      && existing == hash_bytes(content)
    {
      trace!(path = %target.display(), "unchanged, skipping");
      return Ok(());
    }

    let parent = target.parent().unwrap_or(&self.root);
    let io_err = |source| SinkError::Io {
      path: target.clone(),
      source,
    };
    fs::create_dir_all(parent).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(content).map_err(io_err)?;
    tmp.persist(&target).map_err(|e| io_err(e.error))?;

    debug!(path = %target.display(), bytes = content.len(), "wrote generated file");
    Ok(())
  }
}

/// Keeps generated files in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
  files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySink {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of everything written so far, keyed by path.
  pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
    self.files.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn get(&self, path: &str) -> Option<Vec<u8>> {
    self.files.lock().unwrap_or_else(|e| e.into_inner()).get(path).cloned()
  }
}

impl FileSink for MemorySink {
  fn put_file(&self, path: &str, content: &[u8]) -> Result<(), SinkError> {
    validate_path(path)?;
    self
      .files
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(path.to_string(), content.to_vec());
    Ok(())
  }
}
