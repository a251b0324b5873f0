//! Turning a bundle directory into a source image.
//!
//! Parsing schema source is the job of a [`SchemaCompiler`]. The default
//! [`DescriptorSetCompiler`] reads precompiled `FileDescriptorSet` files
//! (`*.binpb`, `*.pb`) and Markdown prose from the bundle directory.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use prost::Message;
use prost_types::FileDescriptorSet;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::Bundle;
use crate::image::{
  DescriptorIndex, ImageBuilder, ImageError, ImageFile, PackageMeta, ProseFile, SourceImage, builtins,
  sort_by_dependency,
};

/// Errors raised while compiling a bundle.
#[derive(Debug, Error)]
pub enum CompileError {
  #[error("bundle '{bundle}': failed to read {path}: {source}")]
  Io {
    bundle: String,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("bundle '{bundle}': {path} is not a descriptor set: {source}")]
  Decode {
    bundle: String,
    path: PathBuf,
    #[source]
    source: prost::DecodeError,
  },

  #[error("bundle '{bundle}': {source}")]
  Image {
    bundle: String,
    #[source]
    source: ImageError,
  },
}

/// Read access to the files of one bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleFs {
  root: PathBuf,
}

impl BundleFs {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Paths (relative to the bundle root, sorted) of files with any of the given extensions.
  pub fn files_with_extensions(&self, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(&self.root).sort_by_file_name() {
      let entry = entry?;
      if !entry.file_type().is_file() {
        continue;
      }
      let matches = entry
        .path()
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e));
      if matches && let Ok(relative) = entry.path().strip_prefix(&self.root) {
        files.push(relative.to_path_buf());
      }
    }
    Ok(files)
  }

  pub fn read(&self, relative: &Path) -> io::Result<Vec<u8>> {
    fs::read(self.root.join(relative))
  }
}

/// Produces the image of a single bundle.
pub trait SchemaCompiler: Send + Sync {
  /// Compile `bundle`. Imports may be satisfied from `deps`, which holds the
  /// files of every resolved dependency of the bundle.
  fn compile(&self, bundle: &Bundle, deps: &DescriptorIndex) -> Result<SourceImage, CompileError>;
}

/// Compiler over precompiled descriptor sets.
///
/// Files already present in `deps` or in the well-known table are treated as
/// dependencies even when a descriptor set carries them; everything else is a
/// source file of the bundle.
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptorSetCompiler;

const DESCRIPTOR_EXTENSIONS: &[&str] = &["binpb", "pb"];
const PROSE_EXTENSIONS: &[&str] = &["md"];

impl SchemaCompiler for DescriptorSetCompiler {
  fn compile(&self, bundle: &Bundle, deps: &DescriptorIndex) -> Result<SourceImage, CompileError> {
    let io_err = |path: &Path, source| CompileError::Io {
      bundle: bundle.name.clone(),
      path: path.to_path_buf(),
      source,
    };
    let image_err = |source| CompileError::Image {
      bundle: bundle.name.clone(),
      source,
    };

    let root = bundle.fs.root();
    let sets = bundle
      .fs
      .files_with_extensions(DESCRIPTOR_EXTENSIONS)
      .map_err(|e| io_err(root, e))?;

    let mut files = Vec::new();
    for path in &sets {
      let bytes = bundle.fs.read(path).map_err(|e| io_err(path, e))?;
      let set = FileDescriptorSet::decode(bytes.as_slice()).map_err(|source| CompileError::Decode {
        bundle: bundle.name.clone(),
        path: path.clone(),
        source,
      })?;
      debug!(bundle = %bundle.name, path = %path.display(), files = set.file.len(), "read descriptor set");
      files.extend(set.file.into_iter().map(ImageFile::new));
    }

    if files.is_empty() {
      warn!(bundle = %bundle.name, "bundle has no descriptor sets");
    }

    let mut builder = ImageBuilder::new(bundle.name.clone()).with_index(deps.clone());
    let mut packages = BTreeSet::new();
    for file in sort_by_dependency(&files, false).map_err(image_err)? {
      let is_source = !deps.contains_key(file.name()) && !builtins::is_builtin(file.name());
      if is_source && !file.descriptor.package().is_empty() {
        packages.insert(file.descriptor.package().to_string());
      }
      builder.add_file(file, is_source).map_err(image_err)?;
    }

    for name in packages {
      builder.add_package(PackageMeta {
        name,
        version: None,
        description: None,
      });
    }

    for path in bundle
      .fs
      .files_with_extensions(PROSE_EXTENSIONS)
      .map_err(|e| io_err(root, e))?
    {
      let bytes = bundle.fs.read(&path).map_err(|e| io_err(&path, e))?;
      builder.add_prose(ProseFile {
        path: slash_path(&path),
        content: String::from_utf8_lossy(&bytes).into_owned(),
      });
    }

    Ok(builder.build())
  }
}

/// A relative path with `/` separators on every platform.
fn slash_path(path: &Path) -> String {
  path
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}


#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::testutil::{descriptor, write_set};
  use super::*;

  fn bundle(name: &str, dir: &Path) -> Bundle {
    Bundle {
      name: name.to_string(),
      dir: dir.to_path_buf(),
      rel_dir: PathBuf::from(name),
      deps: Vec::new(),
      plugins: Vec::new(),
      publish: None,
      fs: BundleFs::new(dir),
    }
  }

  #[test]
  fn lists_files_sorted_and_relative() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir_all(temp_dir.path().join("b")).unwrap();
    fs::write(temp_dir.path().join("b/z.pb"), b"").unwrap();
    fs::write(temp_dir.path().join("a.binpb"), b"").unwrap();
    fs::write(temp_dir.path().join("notes.txt"), b"").unwrap();

    let files = BundleFs::new(temp_dir.path())
      .files_with_extensions(DESCRIPTOR_EXTENSIONS)
      .unwrap();

    assert_eq!(files, vec![PathBuf::from("a.binpb"), PathBuf::from("b/z.pb")]);
  }

  #[test]
  fn compiles_sources_packages_and_prose() {
    let temp_dir = TempDir::new().unwrap();
    write_set(
      temp_dir.path(),
      "api.binpb",
      vec![
        descriptor("acme/api/v1/service.proto", "acme.api.v1", &["acme/api/v1/types.proto"]),
        descriptor("acme/api/v1/types.proto", "acme.api.v1", &["google/protobuf/timestamp.proto"]),
      ],
    );
    fs::write(temp_dir.path().join("README.md"), "# API").unwrap();

    let image = DescriptorSetCompiler
      .compile(&bundle("api", temp_dir.path()), &DescriptorIndex::new())
      .unwrap();

    assert_eq!(image.name.as_deref(), Some("api"));
    assert_eq!(
      image.file_names().collect::<Vec<_>>(),
      vec!["acme/api/v1/types.proto", "acme/api/v1/service.proto"]
    );
    assert_eq!(image.source_files.len(), 2);
    assert_eq!(image.packages[0].name, "acme.api.v1");
    assert_eq!(image.prose[0].path, "README.md");
    assert_eq!(image.prose[0].content, "# API");
  }

  #[test]
  fn files_from_dependencies_are_not_sources() {
    let temp_dir = TempDir::new().unwrap();
    let common = ImageFile::new(descriptor("acme/common/v1/money.proto", "acme.common.v1", &[]));
    write_set(
      temp_dir.path(),
      "api.binpb",
      vec![
        descriptor("acme/common/v1/money.proto", "acme.common.v1", &[]),
        descriptor("acme/api/v1/order.proto", "acme.api.v1", &["acme/common/v1/money.proto"]),
      ],
    );
    let deps = DescriptorIndex::from([(common.name().to_string(), common)]);

    let image = DescriptorSetCompiler
      .compile(&bundle("api", temp_dir.path()), &deps)
      .unwrap();

    assert_eq!(image.source_files, vec!["acme/api/v1/order.proto"]);
    assert!(image.file("acme/common/v1/money.proto").is_some());
    assert_eq!(image.packages.len(), 1);
  }

  #[test]
  fn imports_are_pulled_from_dependencies() {
    let temp_dir = TempDir::new().unwrap();
    let common = ImageFile::new(descriptor("acme/common/v1/money.proto", "acme.common.v1", &[]));
    write_set(
      temp_dir.path(),
      "api.binpb",
      vec![descriptor(
        "acme/api/v1/order.proto",
        "acme.api.v1",
        &["acme/common/v1/money.proto"],
      )],
    );
    let deps = DescriptorIndex::from([(common.name().to_string(), common)]);

    let image = DescriptorSetCompiler
      .compile(&bundle("api", temp_dir.path()), &deps)
      .unwrap();

    assert_eq!(
      image.file_names().collect::<Vec<_>>(),
      vec!["acme/common/v1/money.proto", "acme/api/v1/order.proto"]
    );
  }

  #[test]
  fn unresolved_import_fails() {
    let temp_dir = TempDir::new().unwrap();
    write_set(
      temp_dir.path(),
      "api.binpb",
      vec![descriptor("acme/api/v1/order.proto", "acme.api.v1", &["acme/missing.proto"])],
    );

    let result = DescriptorSetCompiler.compile(&bundle("api", temp_dir.path()), &DescriptorIndex::new());

    assert!(matches!(
      result,
      Err(CompileError::Image {
        source: ImageError::MissingDependency { .. },
        ..
      })
    ));
  }

  #[test]
  fn garbage_descriptor_set_fails() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("bad.pb"), [0xff, 0xff, 0xff]).unwrap();

    let result = DescriptorSetCompiler.compile(&bundle("api", temp_dir.path()), &DescriptorIndex::new());

    assert!(matches!(result, Err(CompileError::Decode { .. })));
  }
}
