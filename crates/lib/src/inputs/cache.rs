//! Local cache of fetched remote images.
//!
//! Entries are keyed by `(name, version)` where `version` is an exact,
//! immutable version as reported by the registry. Floating references such as
//! `main` are never cached. Each entry is a single file:
//!
//! ```text
//! <cache_dir>/acme_types-<hash(name, version)>.binpb
//! ```
//!
//! The file holds a [`CacheRecord`] so that a read can verify it was handed
//! the entry it asked for. Entries never expire.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use prost::Message;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::image::SourceImage;
use crate::platform::paths;
use crate::util::hash::key_hash;

/// Errors that can occur when reading or writing the cache.
#[derive(Debug, Error)]
pub enum CacheError {
  /// No cache location could be determined from the environment.
  #[error("could not determine a cache directory; set PROTOFORGE_CACHE_DIR")]
  NoCacheDir,

  #[error("failed to create cache directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write cache entry {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Only exact versions may be cached.
  #[error("refusing to cache '{name}' without a version")]
  EmptyVersion { name: String },
}

/// On-disk envelope of a cache entry.
#[derive(Clone, PartialEq, Message)]
struct CacheRecord {
  #[prost(string, tag = "1")]
  name: String,
  #[prost(string, tag = "2")]
  version: String,
  #[prost(message, optional, tag = "3")]
  image: Option<SourceImage>,
}

/// Filesystem-backed store of exact-version remote images.
///
/// Cheap to clone; clones share the same directory.
#[derive(Debug, Clone)]
pub struct ImageCache {
  dir: PathBuf,
}

impl ImageCache {
  /// Use `dir` as the cache directory. It is created on first write.
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  /// Open the cache at the platform default location.
  pub fn from_env() -> Result<Self, CacheError> {
    paths::cache_dir().map(Self::new).ok_or(CacheError::NoCacheDir)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Path of the entry for `(name, version)`.
  pub fn entry_path(&self, name: &str, version: &str) -> PathBuf {
    let readable: String = name
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
      .collect();
    self
      .dir
      .join(format!("{}-{}.binpb", readable, key_hash(&[name, version])))
  }

  /// Read the entry for `(name, version)`.
  ///
  /// Missing, unreadable or mismatched entries are all reported as a miss so
  /// that a damaged cache degrades to a fetch instead of failing the build.
  pub fn get(&self, name: &str, version: &str) -> Option<SourceImage> {
    if version.is_empty() {
      return None;
    }

    let path = self.entry_path(name, version);
    let bytes = match fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        trace!(name, version, "cache miss");
        return None;
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to read cache entry");
        return None;
      }
    };

    let record = match CacheRecord::decode(bytes.as_slice()) {
      Ok(record) => record,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "ignoring corrupt cache entry");
        return None;
      }
    };

    if record.name != name || record.version != version {
      warn!(
        path = %path.display(),
        expected = %format!("{name}@{version}"),
        found = %format!("{}@{}", record.name, record.version),
        "ignoring cache entry for a different image"
      );
      return None;
    }

    debug!(name, version, "cache hit");
    record.image
  }

  /// Store `image` as the entry for `(name, version)`.
  ///
  /// The entry is written to a temporary file and renamed into place, so
  /// concurrent readers never observe a partial entry. An existing entry is
  /// replaced.
  pub fn put(&self, name: &str, version: &str, image: &SourceImage) -> Result<PathBuf, CacheError> {
    if version.is_empty() {
      return Err(CacheError::EmptyVersion { name: name.to_string() });
    }

    fs::create_dir_all(&self.dir).map_err(|source| CacheError::CreateDir {
      path: self.dir.clone(),
      source,
    })?;

    let path = self.entry_path(name, version);
    let record = CacheRecord {
      name: name.to_string(),
      version: version.to_string(),
      image: Some(image.clone()),
    };

    let write_err = |source| CacheError::Write {
      path: path.clone(),
      source,
    };

    let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
    tmp.write_all(&record.encode_to_vec()).map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    debug!(name, version, path = %path.display(), "cached image");
    Ok(path)
  }
}
