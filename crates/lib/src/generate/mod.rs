//! Build sessions.
//!
//! A [`Session`] owns everything one command invocation needs: the loaded
//! repository, the dependency resolver with its cache and lock pins, the
//! schema compiler and the plugin engine. Bundle images are built at most
//! once per session and reused by every bundle depending on them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::image::{ImageBuilder, ImageError, SourceImage, combine_images};
use crate::inputs::Input;
use crate::inputs::cache::ImageCache;
use crate::inputs::lock::{LockError, LockFile};
use crate::inputs::registry::{HttpRegistryClient, RegistryClient, UnconfiguredRegistry};
use crate::inputs::resolve::{DependencyResolver, ResolveError};
use crate::plugin::publish::PinnedDependency;
use crate::plugin::{FileSink, PluginEngine, PluginError, PluginReport};
use crate::repo::config::RegistryConfig;
use crate::repo::{Bundle, CompileError, DescriptorSetCompiler, Repo, RepoError, SchemaCompiler};
use crate::runner::auth::AwsCliTokenSource;
use crate::runner::{AuthError, ContainerRunner, DockerCli, LocalRunner, RegistryAuth};

#[derive(Debug, Error)]
pub enum GenerateError {
  #[error(transparent)]
  Repo(#[from] RepoError),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error(transparent)]
  Auth(#[from] AuthError),

  #[error("failed to resolve dependency of bundle '{bundle}': {source}")]
  Resolve {
    bundle: String,
    #[source]
    source: ResolveError,
  },

  #[error("failed to update lock file: {0}")]
  LockUpdate(#[source] ResolveError),

  #[error("failed to assemble image of bundle '{bundle}': {source}")]
  Image {
    bundle: String,
    #[source]
    source: ImageError,
  },

  #[error(transparent)]
  Compile(#[from] CompileError),

  #[error("failed to generate bundle '{bundle}': {source}")]
  Plugin {
    bundle: String,
    #[source]
    source: PluginError,
  },

  #[error("at least one input is required")]
  NoInputs,

  #[error("combined inputs conflict: {0}")]
  Combine(#[source] ImageError),

  #[error("dependency '{dependency}' of bundle '{bundle}' has no exact version; run `lock` first")]
  UnpinnedDependency { bundle: String, dependency: String },
}

/// Result of publishing one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
  pub bundle: String,
  pub version: String,
  pub plugins: Vec<PluginReport>,
  /// Path of the emitted dependency manifest, if the bundle configures one.
  pub manifest: Option<String>,
}

/// Everything needed to build the bundles of one repository.
pub struct Session {
  repo: Repo,
  resolver: DependencyResolver,
  compiler: Arc<dyn SchemaCompiler>,
  engine: PluginEngine,
  images: Mutex<HashMap<String, SourceImage>>,
}

fn registry_client(config: &RegistryConfig) -> Arc<dyn RegistryClient> {
  let mut client = HttpRegistryClient::new(&config.url);
  if let Some(var) = &config.token_env {
    match std::env::var(var) {
      Ok(token) if !token.is_empty() => client = client.with_token(token),
      _ => warn!(url = %config.url, var = %var, "registry token variable is not set"),
    }
  }
  Arc::new(client)
}

impl Session {
  pub fn new(repo: Repo, resolver: DependencyResolver, engine: PluginEngine) -> Self {
    Self {
      repo,
      resolver,
      compiler: Arc::new(DescriptorSetCompiler),
      engine,
      images: Mutex::new(HashMap::new()),
    }
  }

  /// Open the repository at `root` with the default collaborators.
  ///
  /// The resolver uses the configured registry and remotes, the lock file next
  /// to `protoforge.yaml` and the user cache directory when one is available.
  /// Plugins run as local processes from the repository root, or in
  /// containers through the `docker` CLI.
  pub fn open(root: &Path) -> Result<Self, GenerateError> {
    let repo = Repo::load(root)?;
    let config = repo.config();

    let registry = config
      .registry
      .as_ref()
      .map(registry_client)
      .unwrap_or_else(|| Arc::new(UnconfiguredRegistry));
    let mut resolver = DependencyResolver::new(registry).with_default_reference(config.default_reference.clone());
    for (remote, settings) in &config.remotes {
      resolver = resolver.with_remote(remote.clone(), registry_client(settings));
    }
    if let Some(lock) = LockFile::load(&repo.lock_path())? {
      debug!(pins = lock.len(), "loaded lock file");
      resolver = resolver.with_lock(lock);
    }
    match ImageCache::from_env() {
      Ok(cache) => resolver = resolver.with_cache(cache),
      Err(e) => warn!(error = %e, "image cache disabled"),
    }

    let auth = RegistryAuth::new(&config.registry_auth, Arc::new(AwsCliTokenSource::default()))?;
    let local = LocalRunner::new().with_working_dir(repo.root());
    let container = ContainerRunner::new(Arc::new(DockerCli::default()), auth);
    let engine = PluginEngine::new(Arc::new(local), Arc::new(container));

    Ok(Self::new(repo, resolver, engine))
  }

  /// Replace the schema compiler.
  pub fn with_compiler(mut self, compiler: Arc<dyn SchemaCompiler>) -> Self {
    self.compiler = compiler;
    self
  }

  pub fn repo(&self) -> &Repo {
    &self.repo
  }

  pub fn resolver(&self) -> &DependencyResolver {
    &self.resolver
  }

  fn cached_image(&self, name: &str) -> Option<SourceImage> {
    self.images.lock().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
  }

  /// The image of bundle `name`, built with its local and registry dependencies.
  pub async fn bundle_image(&self, name: &str) -> Result<SourceImage, GenerateError> {
    if let Some(image) = self.cached_image(name) {
      return Ok(image);
    }

    let mut order = self.repo.graph().dependencies_of(name)?;
    order.push(name.to_string());
    for bundle_name in &order {
      if self.cached_image(bundle_name).is_some() {
        continue;
      }
      let bundle = self.repo.bundle(bundle_name)?;
      let image = self.build_image(bundle).await?;
      self
        .images
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(bundle_name.clone(), image);
    }

    self.cached_image(name).ok_or_else(|| {
      RepoError::UnknownBundle {
        name: name.to_string(),
      }
      .into()
    })
  }

  /// Build one bundle's image. Local dependencies must already be memoized.
  async fn build_image(&self, bundle: &Bundle) -> Result<SourceImage, GenerateError> {
    info!(bundle = %bundle.name, "building image");
    let image_err = |source| GenerateError::Image {
      bundle: bundle.name.clone(),
      source,
    };

    let mut builder = ImageBuilder::new(bundle.name.clone());
    for dep in bundle.local_deps() {
      let image = self.cached_image(dep).ok_or_else(|| RepoError::UnknownBundle { name: dep.to_string() })?;
      builder.include(&image).map_err(image_err)?;
    }
    for input in bundle.remote_deps() {
      let image = self.resolver.resolve(input).await.map_err(|source| GenerateError::Resolve {
        bundle: bundle.name.clone(),
        source,
      })?;
      builder.include(&image).map_err(image_err)?;
    }

    let compiled = self.compiler.compile(bundle, &builder.image().index())?;
    for file in compiled.files.iter().cloned() {
      let is_source = compiled.is_source(file.name());
      builder.add_file(file, is_source).map_err(image_err)?;
    }
    for package in compiled.packages {
      builder.add_package(package);
    }
    for prose in compiled.prose {
      builder.add_prose(prose);
    }

    let image = builder.build();
    debug!(
      bundle = %bundle.name,
      files = image.files.len(),
      sources = image.source_files.len(),
      "built image"
    );
    Ok(image)
  }

  /// Resolve several inputs and union them into one image.
  ///
  /// Inputs must agree on the content of every file they share.
  pub async fn combined_source_image(&self, inputs: &[Input]) -> Result<SourceImage, GenerateError> {
    if inputs.is_empty() {
      return Err(GenerateError::NoInputs);
    }

    let mut images = Vec::with_capacity(inputs.len());
    for input in inputs {
      let image = match input {
        Input::Local(name) => self.bundle_image(name).await?,
        remote => self.resolver.resolve(remote).await.map_err(|source| GenerateError::Resolve {
          bundle: remote.full_name(),
          source,
        })?,
      };
      images.push(image);
    }

    let combined = combine_images(&images).map_err(GenerateError::Combine)?;
    Ok(SourceImage {
      files: combined.files,
      source_files: combined.source_files,
      ..Default::default()
    })
  }

  /// Run the plugins of bundle `name`.
  pub async fn generate_bundle(
    &self,
    name: &str,
    sink: Arc<dyn FileSink>,
    cancel: &CancellationToken,
  ) -> Result<Vec<PluginReport>, GenerateError> {
    let bundle = self.repo.bundle(name)?;
    let image = self.bundle_image(name).await?;
    self
      .engine
      .run(&bundle.name, &image, &bundle.plugins, sink, cancel)
      .await
      .map_err(|source| GenerateError::Plugin {
        bundle: bundle.name.clone(),
        source,
      })
  }

  /// Generate the named bundles, or every bundle when `names` is empty, in
  /// dependency order. Bundles without plugins are skipped.
  pub async fn generate_all(
    &self,
    names: &[String],
    sink: Arc<dyn FileSink>,
    cancel: &CancellationToken,
  ) -> Result<Vec<PluginReport>, GenerateError> {
    for name in names {
      self.repo.bundle(name)?;
    }

    let mut reports = Vec::new();
    for name in self.repo.graph().sorted()? {
      if !names.is_empty() && !names.contains(&name) {
        continue;
      }
      if self.repo.bundle(&name)?.plugins.is_empty() {
        debug!(bundle = %name, "no plugins, skipping");
        continue;
      }
      reports.extend(self.generate_bundle(&name, sink.clone(), cancel).await?);
    }
    Ok(reports)
  }

  /// Build bundle `name` as `version` and emit its dependency manifest.
  ///
  /// The manifest is only written once every plugin has succeeded.
  pub async fn publish_bundle(
    &self,
    name: &str,
    version: &str,
    sink: Arc<dyn FileSink>,
    cancel: &CancellationToken,
  ) -> Result<PublishReport, GenerateError> {
    let bundle = self.repo.bundle(name)?;

    // Stamp a copy; the memoized image stays unversioned.
    let mut image = self.bundle_image(name).await?;
    image.version = Some(version.to_string());

    let plugins = self
      .engine
      .run(&bundle.name, &image, &bundle.plugins, sink.clone(), cancel)
      .await
      .map_err(|source| GenerateError::Plugin {
        bundle: bundle.name.clone(),
        source,
      })?;

    let mut manifest = None;
    if let Some(publish) = &bundle.publish {
      let deps = self.pinned_dependencies(bundle).await?;
      let file = publish.manifest(version, &deps);
      sink.put_file(&file.path, &file.content).map_err(|source| GenerateError::Plugin {
        bundle: bundle.name.clone(),
        source: PluginError::Sink {
          plugin: "publish".to_string(),
          path: file.path.clone(),
          source,
        },
      })?;
      info!(bundle = %bundle.name, path = %file.path, "wrote dependency manifest");
      manifest = Some(file.path);
    }

    Ok(PublishReport {
      bundle: bundle.name.clone(),
      version: version.to_string(),
      plugins,
      manifest,
    })
  }

  async fn pinned_dependencies(&self, bundle: &Bundle) -> Result<Vec<PinnedDependency>, GenerateError> {
    let mut deps = Vec::new();
    for input in bundle.remote_deps() {
      let image = self.resolver.resolve(input).await.map_err(|source| GenerateError::Resolve {
        bundle: bundle.name.clone(),
        source,
      })?;
      let version = image.version.filter(|v| !v.is_empty()).ok_or_else(|| GenerateError::UnpinnedDependency {
        bundle: bundle.name.clone(),
        dependency: input.full_name(),
      })?;
      deps.push(PinnedDependency {
        name: input.full_name(),
        version,
      });
    }
    Ok(deps)
  }

  /// Pin every registry dependency to its latest version.
  ///
  /// Returns the new lock file and whether it differed from the one on disk.
  pub async fn update_lock(&self) -> Result<(LockFile, bool), GenerateError> {
    let inputs = self.repo.remote_inputs();
    let lock = self
      .resolver
      .latest_locks(&inputs)
      .await
      .map_err(GenerateError::LockUpdate)?;
    let changed = lock.write_if_changed(&self.repo.lock_path())?;
    Ok((lock, changed))
  }
}
