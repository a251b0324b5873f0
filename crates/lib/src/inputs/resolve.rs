//! Remote dependency resolution.
//!
//! [`DependencyResolver`] turns a remote [`Input`] into a [`SourceImage`]:
//!
//! 1. Pick the target version: the explicit version, else the lock pin, else
//!    the default floating reference.
//! 2. For an exact version, try the local cache.
//! 3. Otherwise fetch from the registry and cache the result if it carries a
//!    resolved version.
//! 4. Resolve the image's includes the same way and merge them in.
//!
//! Local inputs are not handled here; the repository model orders and builds
//! local bundles itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::Input;
use super::cache::ImageCache;
use super::lock::LockFile;
use super::registry::{RegistryClient, RegistryError};
use crate::consts::DEFAULT_REFERENCE;
use crate::image::{ImageBuilder, ImageError, ImageInclude, SourceImage};

/// Errors that can occur while resolving remote dependencies.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// The input kind cannot be resolved from a registry.
  #[error("input '{input}' cannot be resolved from a registry")]
  UnsupportedInputType { input: String },

  /// No client is configured for an external registry host.
  #[error("no registry client configured for remote '{remote}'")]
  UnknownRemote { remote: String },

  #[error("failed to fetch '{dependency}': {source}")]
  Fetch {
    dependency: String,
    #[source]
    source: RegistryError,
  },

  #[error("failed to merge includes of '{dependency}': {source}")]
  Include {
    dependency: String,
    #[source]
    source: ImageError,
  },

  /// An image includes itself, directly or through other includes.
  #[error("include cycle: {chain}")]
  IncludeCycle { chain: String },

  /// The registry did not report an exact version for a floating reference.
  #[error("dependency '{dependency}' did not resolve to an exact version")]
  UnresolvableDependency { dependency: String },
}

/// A remote image to resolve, with the client that serves it.
struct RemoteRef {
  client: Arc<dyn RegistryClient>,
  owner: String,
  name: String,
  /// Key used for lock pins, caching and diagnostics.
  full_name: String,
  version: Option<String>,
  /// Remote host for `buf` inputs; includes are served from the same remote.
  remote: Option<String>,
}

impl RemoteRef {
  /// The reference for an include declared by this image.
  fn include(&self, include: &ImageInclude) -> RemoteRef {
    let full_name = match &self.remote {
      Some(remote) => format!("{remote}/{}", include.full_name()),
      None => include.full_name(),
    };
    RemoteRef {
      client: self.client.clone(),
      owner: include.owner.clone(),
      name: include.name.clone(),
      full_name,
      version: include.version.clone(),
      remote: self.remote.clone(),
    }
  }
}

/// Resolves remote inputs through the lock file, the cache and the registry.
pub struct DependencyResolver {
  registry: Arc<dyn RegistryClient>,
  remotes: BTreeMap<String, Arc<dyn RegistryClient>>,
  cache: Option<ImageCache>,
  lock: LockFile,
  default_reference: String,
}

impl DependencyResolver {
  /// Create a resolver for the primary registry, with no cache and no pins.
  pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
    Self {
      registry,
      remotes: BTreeMap::new(),
      cache: None,
      lock: LockFile::new(),
      default_reference: DEFAULT_REFERENCE.to_string(),
    }
  }

  pub fn with_cache(mut self, cache: ImageCache) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn with_lock(mut self, lock: LockFile) -> Self {
    self.lock = lock;
    self
  }

  /// Serve `buf` inputs whose remote is `remote` from `client`.
  pub fn with_remote(mut self, remote: impl Into<String>, client: Arc<dyn RegistryClient>) -> Self {
    self.remotes.insert(remote.into(), client);
    self
  }

  pub fn with_default_reference(mut self, reference: impl Into<String>) -> Self {
    self.default_reference = reference.into();
    self
  }

  pub fn lock(&self) -> &LockFile {
    &self.lock
  }

  fn remote_ref(&self, input: &Input) -> Result<RemoteRef, ResolveError> {
    match input {
      Input::Local(_) => Err(ResolveError::UnsupportedInputType {
        input: input.to_string(),
      }),
      Input::Registry(r) => Ok(RemoteRef {
        client: self.registry.clone(),
        owner: r.owner.clone(),
        name: r.name.clone(),
        full_name: input.full_name(),
        version: r.version.clone(),
        remote: None,
      }),
      Input::Buf(b) => {
        let client = self
          .remotes
          .get(&b.remote)
          .cloned()
          .ok_or_else(|| ResolveError::UnknownRemote {
            remote: b.remote.clone(),
          })?;
        Ok(RemoteRef {
          client,
          owner: b.owner.clone(),
          name: b.repository.clone(),
          full_name: input.full_name(),
          version: b.reference.clone(),
          remote: Some(b.remote.clone()),
        })
      }
    }
  }

  /// Resolve a remote input to a fully merged image.
  pub async fn resolve(&self, input: &Input) -> Result<SourceImage, ResolveError> {
    let target = self.remote_ref(input)?;
    let mut stack = Vec::new();
    self.resolve_remote(target, &mut stack).await
  }

  fn resolve_remote<'a>(
    &'a self,
    target: RemoteRef,
    stack: &'a mut Vec<String>,
  ) -> BoxFuture<'a, Result<SourceImage, ResolveError>> {
    async move {
      if stack.contains(&target.full_name) {
        let mut chain = stack.clone();
        chain.push(target.full_name.clone());
        return Err(ResolveError::IncludeCycle {
          chain: chain.join(" -> "),
        });
      }

      let mut image = self.fetch(&target).await?;
      if image.name.as_deref().is_none_or(str::is_empty) {
        image.name = Some(target.full_name.clone());
      }

      let includes = std::mem::take(&mut image.includes);
      if includes.is_empty() {
        return Ok(image);
      }

      stack.push(target.full_name.clone());
      let mut builder = ImageBuilder::from_existing(image);
      for include in &includes {
        debug!(dependency = %target.full_name, include = %include.full_name(), "resolving include");
        let included = self.resolve_remote(target.include(include), &mut *stack).await?;
        builder.include(&included).map_err(|source| ResolveError::Include {
          dependency: target.full_name.clone(),
          source,
        })?;
      }
      stack.pop();

      Ok(builder.build())
    }
    .boxed()
  }

  /// Fetch one image, without includes handling.
  async fn fetch(&self, target: &RemoteRef) -> Result<SourceImage, ResolveError> {
    let pinned = target
      .version
      .as_deref()
      .or_else(|| self.lock.get(&target.full_name));

    let fetch_err = |source| ResolveError::Fetch {
      dependency: target.full_name.clone(),
      source,
    };

    let mut image = match pinned {
      Some(version) => {
        if let Some(cache) = &self.cache
          && let Some(image) = cache.get(&target.full_name, version)
        {
          return Ok(image);
        }
        info!(dependency = %target.full_name, version, "fetching");
        let mut image = target
          .client
          .get_image(&target.owner, &target.name, version)
          .await
          .map_err(fetch_err)?;
        if image.version.as_deref().is_none_or(str::is_empty) {
          image.version = Some(version.to_string());
        }
        image
      }
      None => {
        info!(dependency = %target.full_name, reference = %self.default_reference, "fetching latest");
        target
          .client
          .latest_image(&target.owner, &target.name, &self.default_reference)
          .await
          .map_err(fetch_err)?
      }
    };

    if image.name.as_deref().is_none_or(str::is_empty) {
      image.name = Some(target.full_name.clone());
    }

    if let Some(cache) = &self.cache
      && let Some(version) = image.version.as_deref().filter(|v| !v.is_empty())
      && let Err(e) = cache.put(&target.full_name, version, &image)
    {
      warn!(dependency = %target.full_name, error = %e, "failed to cache image");
    }

    Ok(image)
  }

  /// Resolve every distinct remote input to its current exact version.
  ///
  /// Each input's own version (if any) is used as the reference to resolve,
  /// otherwise the default reference. Lock pins are ignored. Local inputs are
  /// skipped.
  pub async fn latest_locks(&self, inputs: &[Input]) -> Result<LockFile, ResolveError> {
    let mut targets: BTreeMap<String, RemoteRef> = BTreeMap::new();
    for input in inputs.iter().filter(|i| !i.is_local()) {
      let target = self.remote_ref(input)?;
      targets.entry(target.full_name.clone()).or_insert(target);
    }

    let lookups = targets.values().map(|target| async move {
      let reference = target.version.as_deref().unwrap_or(&self.default_reference);
      let image = target
        .client
        .latest_image(&target.owner, &target.name, reference)
        .await
        .map_err(|source| ResolveError::Fetch {
          dependency: target.full_name.clone(),
          source,
        })?;
      match image.version {
        Some(version) if !version.is_empty() => Ok((target.full_name.clone(), version)),
        _ => Err(ResolveError::UnresolvableDependency {
          dependency: target.full_name.clone(),
        }),
      }
    });

    let mut lock = LockFile::new();
    for (name, version) in try_join_all(lookups).await? {
      debug!(dependency = %name, version = %version, "pinned");
      lock.insert(name, version);
    }
    Ok(lock)
  }
}
