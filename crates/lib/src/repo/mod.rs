//! The repository model.
//!
//! A repository is a directory holding `protoforge.yaml` and a set of bundle
//! directories. Loading a repository reads every configuration file, resolves
//! plugin inheritance and validates the bundle graph before anything runs.
//!
//! # Modules
//!
//! - [`config`] - Configuration file formats
//! - [`plugins`] - Two-pass plugin `base` resolution
//! - [`graph`] - Bundle dependency graph and ordering
//! - [`compile`] - Bundle file access and the schema compiler seam

pub mod compile;
pub mod config;
pub mod graph;
pub mod plugins;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::REPO_CONFIG_FILENAME;
use crate::image::{DescriptorIndex, ImageError, files_equal};
use crate::inputs::lock::LOCK_FILENAME;
use crate::inputs::resolve::{DependencyResolver, ResolveError};
use crate::inputs::Input;
use crate::plugin::BuildPlugin;
use crate::plugin::publish::PublishConfig;

pub use compile::{BundleFs, CompileError, DescriptorSetCompiler, SchemaCompiler};
pub use config::{BundleSettings, ConfigError, PluginConfig, RepoConfig};
pub use graph::{BundleGraph, validate_bundles};

/// Errors raised while loading or querying a repository.
#[derive(Debug, Error)]
pub enum RepoError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("bundle '{bundle}' is declared more than once")]
  DuplicateBundle { bundle: String },

  /// A local dependency is not declared before the bundle using it.
  #[error("bundle '{bundle}' depends on '{dependency}', which is not declared before it")]
  UndeclaredLocalDependency { bundle: String, dependency: String },

  #[error("bundle dependency cycle through '{bundle}'")]
  CycleDetected { bundle: String },

  #[error("unknown bundle '{name}'")]
  UnknownBundle { name: String },

  #[error("directory of bundle '{bundle}' does not exist: {path}")]
  MissingBundleDir { bundle: String, path: PathBuf },

  #[error("{path} is not inside any bundle")]
  NoBundleForFile { path: PathBuf },

  #[error("failed to resolve dependencies of bundle '{bundle}': {source}")]
  Resolve {
    bundle: String,
    #[source]
    source: ResolveError,
  },

  #[error("registry dependencies of bundle '{bundle}' disagree: {source}")]
  ConflictingDependency {
    bundle: String,
    #[source]
    source: ImageError,
  },
}

/// One buildable unit of the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
  pub name: String,
  /// Absolute bundle directory.
  pub dir: PathBuf,
  /// Directory relative to the repository root, as configured.
  pub rel_dir: PathBuf,
  pub deps: Vec<Input>,
  /// Effective plugins: repository plugins overlaid with the bundle's own.
  pub plugins: Vec<BuildPlugin>,
  pub publish: Option<PublishConfig>,
  pub fs: BundleFs,
}

impl Bundle {
  /// Local bundle names this bundle depends on.
  pub fn local_deps(&self) -> impl Iterator<Item = &str> {
    self.deps.iter().filter_map(|d| match d {
      Input::Local(name) => Some(name.as_str()),
      _ => None,
    })
  }

  /// Registry dependencies of this bundle.
  pub fn remote_deps(&self) -> impl Iterator<Item = &Input> {
    self.deps.iter().filter(|d| !d.is_local())
  }
}

/// A loaded and validated repository.
#[derive(Debug)]
pub struct Repo {
  root: PathBuf,
  config: RepoConfig,
  bundles: Vec<Bundle>,
  graph: BundleGraph,
}

impl Repo {
  /// Load the repository rooted at `root`.
  pub fn load(root: &Path) -> Result<Self, RepoError> {
    let root = dunce::canonicalize(root).map_err(|source| ConfigError::Read {
      path: root.join(REPO_CONFIG_FILENAME),
      source,
    })?;
    let config = RepoConfig::load(&root)?;
    Self::from_config(root, config)
  }

  /// Build a repository from already parsed configuration.
  ///
  /// Bundle directories must exist. Per-bundle `bundle.yaml` files are read
  /// from them.
  pub fn from_config(root: PathBuf, config: RepoConfig) -> Result<Self, RepoError> {
    let repo_plugins = plugins::resolve_scope("repository", &config.plugins, &BTreeMap::new())?;
    let enclosing: BTreeMap<String, PluginConfig> =
      repo_plugins.iter().map(|p| (p.name.clone(), p.clone())).collect();

    let mut bundles = Vec::with_capacity(config.bundles.len());
    for entry in &config.bundles {
      let dir = root.join(&entry.dir);
      if !dir.is_dir() {
        return Err(RepoError::MissingBundleDir {
          bundle: entry.name.clone(),
          path: dir,
        });
      }

      let inline = entry.settings();
      let settings = match BundleSettings::load(&dir)? {
        Some(_) if !inline.is_empty() => {
          return Err(
            ConfigError::DuplicateBundleSettings {
              bundle: entry.name.clone(),
            }
            .into(),
          );
        }
        Some(file) => file,
        None => inline,
      };

      let scope = format!("bundle '{}'", entry.name);
      let own = plugins::resolve_scope(&scope, &settings.plugins, &enclosing)?;
      let effective = plugins::overlay(&repo_plugins, &own)
        .iter()
        .map(plugins::validate)
        .collect::<Result<Vec<_>, _>>()?;

      debug!(bundle = %entry.name, deps = settings.deps.len(), plugins = effective.len(), "loaded bundle");

      bundles.push(Bundle {
        name: entry.name.clone(),
        fs: BundleFs::new(dir.clone()),
        dir,
        rel_dir: entry.dir.clone(),
        deps: settings.deps,
        plugins: effective,
        publish: settings.publish,
      });
    }

    let graph = BundleGraph::build(&bundles)?;
    info!(root = %root.display(), bundles = bundles.len(), "loaded repository");

    Ok(Self {
      root,
      config,
      bundles,
      graph,
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn config(&self) -> &RepoConfig {
    &self.config
  }

  /// Bundles in declaration order.
  pub fn bundles(&self) -> &[Bundle] {
    &self.bundles
  }

  pub fn bundle(&self, name: &str) -> Result<&Bundle, RepoError> {
    self
      .bundles
      .iter()
      .find(|b| b.name == name)
      .ok_or_else(|| RepoError::UnknownBundle { name: name.to_string() })
  }

  pub fn graph(&self) -> &BundleGraph {
    &self.graph
  }

  pub fn lock_path(&self) -> PathBuf {
    self.root.join(LOCK_FILENAME)
  }

  /// Every distinct registry dependency of every bundle, in first-seen order.
  pub fn remote_inputs(&self) -> Vec<Input> {
    let mut inputs: Vec<Input> = Vec::new();
    for input in self.bundles.iter().flat_map(Bundle::remote_deps) {
      if !inputs.contains(input) {
        inputs.push(input.clone());
      }
    }
    inputs
  }

  /// Local bundles in dependency order, plus the files of every registry
  /// dependency folded into one index.
  pub async fn local_bundles_sorted(
    &self,
    resolver: &DependencyResolver,
  ) -> Result<(Vec<&Bundle>, DescriptorIndex), RepoError> {
    let mut ordered = Vec::with_capacity(self.bundles.len());
    for name in self.graph.sorted()? {
      ordered.push(self.bundle(&name)?);
    }

    let mut index = DescriptorIndex::new();
    for bundle in &self.bundles {
      for input in bundle.remote_deps() {
        let image = resolver.resolve(input).await.map_err(|source| RepoError::Resolve {
          bundle: bundle.name.clone(),
          source,
        })?;
        for file in image.files {
          match index.get(file.name()) {
            Some(existing) if !files_equal(existing, &file) => {
              return Err(RepoError::ConflictingDependency {
                bundle: bundle.name.clone(),
                source: ImageError::ConflictingFile(file.name().to_string()),
              });
            }
            Some(_) => {}
            None => {
              index.insert(file.name().to_string(), file);
            }
          }
        }
      }
    }

    Ok((ordered, index))
  }

  /// The bundle owning `path` and the path relative to that bundle.
  ///
  /// Relative paths are taken relative to the repository root. When bundle
  /// directories nest, the deepest one wins.
  pub fn bundle_for_file(&self, path: &Path) -> Result<(&Bundle, PathBuf), RepoError> {
    let absolute = if path.is_absolute() {
      dunce::simplified(path).to_path_buf()
    } else {
      self.root.join(path)
    };
    let absolute = normalize(&absolute);

    self
      .bundles
      .iter()
      .filter_map(|bundle| {
        let relative = absolute.strip_prefix(&bundle.dir).ok()?;
        Some((bundle.dir.components().count(), bundle, relative.to_path_buf()))
      })
      .max_by_key(|(depth, _, _)| *depth)
      .map(|(_, bundle, relative)| (bundle, relative))
      .ok_or_else(|| RepoError::NoBundleForFile {
        path: path.to_path_buf(),
      })
  }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

#[cfg(test)]
pub(crate) mod testutil {
  use std::fs;
  use std::path::Path;

  use crate::consts::REPO_CONFIG_FILENAME;

  /// Write `protoforge.yaml` and create the named bundle directories.
  pub fn write_repo(root: &Path, yaml: &str, dirs: &[&str]) {
    fs::write(root.join(REPO_CONFIG_FILENAME), yaml).unwrap();
    for dir in dirs {
      fs::create_dir_all(root.join(dir)).unwrap();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::sync::Arc;

  use tempfile::TempDir;

  use super::testutil::write_repo;
  use super::*;
  use crate::consts::BUNDLE_CONFIG_FILENAME;
  use crate::image::SourceImage;
  use crate::image::testutil::file;
  use crate::inputs::registry::testutil::FakeRegistry;
  use crate::plugin::RunType;

  const REPO: &str = r#"
plugins:
  - name: go
    image: ghcr.io/acme/go:1
    options: { paths: import }
bundles:
  - name: common
    dir: common
  - name: api
    dir: services/api
    deps:
      - local: common
      - registry: { owner: acme, name: types, version: v1 }
    plugins:
      - name: go
        base: go
        options: { paths: source_relative }
      - name: docs
        builtin: file_list
  - name: api-internal
    dir: services/api/internal
    deps:
      - local: api
"#;

  fn load(yaml: &str, dirs: &[&str]) -> (TempDir, Result<Repo, RepoError>) {
    let temp_dir = TempDir::new().unwrap();
    write_repo(temp_dir.path(), yaml, dirs);
    let repo = Repo::load(temp_dir.path());
    (temp_dir, repo)
  }

  fn example() -> (TempDir, Repo) {
    let (temp_dir, repo) = load(REPO, &["common", "services/api/internal"]);
    (temp_dir, repo.unwrap())
  }

  mod loading {
    use super::*;

    #[test]
    fn effective_plugins_overlay_repo_plugins() {
      let (_temp, repo) = example();

      let common = repo.bundle("common").unwrap();
      assert_eq!(common.plugins.len(), 1);
      assert_eq!(common.plugins[0].options["paths"], "import");

      let api = repo.bundle("api").unwrap();
      let names: Vec<_> = api.plugins.iter().map(|p| p.name.as_str()).collect();
      assert_eq!(names, vec!["go", "docs"]);
      assert_eq!(api.plugins[0].options["paths"], "source_relative");
      assert_eq!(
        api.plugins[0].run,
        RunType::Container {
          image: "ghcr.io/acme/go:1".to_string(),
          args: vec![],
        }
      );
    }

    #[test]
    fn bundle_yaml_supplies_settings() {
      let temp_dir = TempDir::new().unwrap();
      write_repo(
        temp_dir.path(),
        "bundles:\n  - name: common\n    dir: common\n  - name: api\n    dir: api\n",
        &["common", "api"],
      );
      fs::write(
        temp_dir.path().join("api").join(BUNDLE_CONFIG_FILENAME),
        "deps:\n  - local: common\n",
      )
      .unwrap();

      let repo = Repo::load(temp_dir.path()).unwrap();

      assert_eq!(repo.bundle("api").unwrap().deps, vec![Input::local("common")]);
    }

    #[test]
    fn inline_and_file_settings_conflict() {
      let temp_dir = TempDir::new().unwrap();
      write_repo(
        temp_dir.path(),
        "bundles:\n  - name: common\n    dir: common\n  - name: api\n    dir: api\n    deps:\n      - local: common\n",
        &["common", "api"],
      );
      fs::write(temp_dir.path().join("api").join(BUNDLE_CONFIG_FILENAME), "deps: []\n").unwrap();

      let result = Repo::load(temp_dir.path());

      assert!(matches!(
        result,
        Err(RepoError::Config(ConfigError::DuplicateBundleSettings { bundle })) if bundle == "api"
      ));
    }

    #[test]
    fn out_of_order_bundles_fail() {
      let (_temp, result) = load(
        "bundles:\n  - name: a\n    dir: a\n    deps:\n      - local: b\n  - name: b\n    dir: b\n",
        &["a", "b"],
      );

      assert!(matches!(
        result,
        Err(RepoError::UndeclaredLocalDependency { bundle, dependency }) if bundle == "a" && dependency == "b"
      ));
    }

    #[test]
    fn missing_bundle_dir_fails() {
      let (_temp, result) = load("bundles:\n  - name: a\n    dir: nowhere\n", &[]);
      assert!(matches!(result, Err(RepoError::MissingBundleDir { .. })));
    }

    #[test]
    fn undefined_plugin_base_fails() {
      let (_temp, result) = load(
        "bundles:\n  - name: a\n    dir: a\n    plugins:\n      - name: x\n        base: y\n",
        &["a"],
      );
      assert!(matches!(
        result,
        Err(RepoError::Config(ConfigError::UndefinedPluginBase { .. }))
      ));
    }

    #[test]
    fn remote_inputs_are_distinct() {
      let (_temp, repo) = example();
      assert_eq!(repo.remote_inputs(), vec![Input::registry("acme", "types", Some("v1"))]);
    }
  }

  mod bundle_for_file {
    use super::*;

    #[test]
    fn deepest_bundle_wins() {
      let (_temp, repo) = example();

      let (bundle, relative) = repo
        .bundle_for_file(Path::new("services/api/internal/acme/v1/x.proto"))
        .unwrap();

      assert_eq!(bundle.name, "api-internal");
      assert_eq!(relative, PathBuf::from("acme/v1/x.proto"));
    }

    #[test]
    fn absolute_paths_are_accepted() {
      let (_temp, repo) = example();
      let path = repo.root().join("services/api/acme/api.proto");

      let (bundle, relative) = repo.bundle_for_file(&path).unwrap();

      assert_eq!(bundle.name, "api");
      assert_eq!(relative, PathBuf::from("acme/api.proto"));
    }

    #[test]
    fn sibling_prefix_is_not_a_match() {
      let (_temp, repo) = example();

      let result = repo.bundle_for_file(Path::new("commons/x.proto"));

      assert!(matches!(result, Err(RepoError::NoBundleForFile { .. })));
    }

    #[test]
    fn parent_components_are_normalized() {
      let (_temp, repo) = example();

      let (bundle, _) = repo
        .bundle_for_file(Path::new("services/api/internal/../v1/x.proto"))
        .unwrap();

      assert_eq!(bundle.name, "api");
    }
  }

  mod local_bundles_sorted {
    use super::*;

    #[tokio::test]
    async fn orders_bundles_and_indexes_registry_files() {
      let (_temp, repo) = example();
      let registry = FakeRegistry::new();
      let mut types = SourceImage::default();
      types.files.push(file("acme/types/v1/money.proto", &[]));
      registry.publish("acme", "types", "v1", types);
      let resolver = DependencyResolver::new(Arc::new(registry));

      let (ordered, index) = repo.local_bundles_sorted(&resolver).await.unwrap();

      let names: Vec<_> = ordered.iter().map(|b| b.name.as_str()).collect();
      assert_eq!(names.len(), 3);
      let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
      assert!(pos("common") < pos("api"));
      assert!(pos("api") < pos("api-internal"));
      assert!(index.contains_key("acme/types/v1/money.proto"));
    }

    #[tokio::test]
    async fn resolution_errors_name_the_bundle() {
      let (_temp, repo) = example();
      let resolver = DependencyResolver::new(Arc::new(FakeRegistry::new()));

      let result = repo.local_bundles_sorted(&resolver).await;

      assert!(matches!(result, Err(RepoError::Resolve { bundle, .. }) if bundle == "api"));
    }

    #[tokio::test]
    async fn conflicting_registry_files_name_the_bundle() {
      let yaml = r#"
bundles:
  - name: common
    dir: common
    deps:
      - registry: { owner: acme, name: types, version: v1 }
  - name: api
    dir: api
    deps:
      - registry: { owner: acme, name: forked, version: v1 }
"#;
      let (_temp, repo) = load(yaml, &["common", "api"]);
      let repo = repo.unwrap();
      let registry = FakeRegistry::new();
      let mut types = SourceImage::default();
      types.files.push(file("acme/types/v1/money.proto", &[]));
      registry.publish("acme", "types", "v1", types);
      let mut forked = SourceImage::default();
      forked.files.push(file("acme/types/v1/money.proto", &["acme/forked/v1/extra.proto"]));
      registry.publish("acme", "forked", "v1", forked);
      let resolver = DependencyResolver::new(Arc::new(registry));

      let err = repo.local_bundles_sorted(&resolver).await.unwrap_err();

      assert!(matches!(
        &err,
        RepoError::ConflictingDependency { bundle, source: ImageError::ConflictingFile(name) }
          if bundle == "api" && name == "acme/types/v1/money.proto"
      ));
      assert!(err.to_string().contains("bundle 'api'"));
    }
  }
}
