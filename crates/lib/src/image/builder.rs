//! Image assembly.
//!
//! [`ImageBuilder`] owns the image it is growing until [`ImageBuilder::build`]
//! hands it back. Every insertion keeps the image linked (imports resolve to a
//! file already present, an indexed file, or a well-known descriptor) and
//! conflict-free (a name maps to exactly one file content).

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use super::merge::{files_equal, sort_by_dependency};
use super::{DescriptorIndex, ImageError, ImageFile, PackageMeta, ProseFile, SourceImage, builtins};

/// Accumulates descriptors, packages and prose into one [`SourceImage`].
#[derive(Debug, Default)]
pub struct ImageBuilder {
  image: SourceImage,
  /// File name -> position in `image.files`.
  positions: HashMap<String, usize>,
  sources: HashSet<String>,
  /// Files that may be pulled in to satisfy imports.
  index: DescriptorIndex,
}

impl ImageBuilder {
  /// Start an empty image with the given source name.
  pub fn new(name: impl Into<String>) -> Self {
    Self::from_existing(SourceImage::named(name))
  }

  /// Continue building on top of an existing image.
  pub fn from_existing(image: SourceImage) -> Self {
    let positions = image
      .files
      .iter()
      .enumerate()
      .map(|(i, f)| (f.name().to_string(), i))
      .collect();
    let sources = image.source_files.iter().cloned().collect();

    Self {
      image,
      positions,
      sources,
      index: DescriptorIndex::new(),
    }
  }

  /// Use `index` to satisfy imports that are not yet part of the image.
  pub fn with_index(mut self, index: DescriptorIndex) -> Self {
    self.index = index;
    self
  }

  pub fn image(&self) -> &SourceImage {
    &self.image
  }

  pub fn contains(&self, name: &str) -> bool {
    self.positions.contains_key(name)
  }

  /// Insert a descriptor file.
  ///
  /// Imports missing from the image are first added (recursively) from the
  /// index; imports of well-known files are accepted as-is. Re-adding an equal
  /// file is a no-op, re-adding a differing file with the same name fails.
  ///
  /// On error the image is left as it was before the call.
  pub fn add_file(&mut self, file: ImageFile, mark_as_source: bool) -> Result<(), ImageError> {
    let files_before = self.image.files.len();
    let mut in_progress = HashSet::new();
    let result = self.add_file_inner(file, mark_as_source, &mut in_progress);
    if result.is_err() {
      self.truncate_files(files_before);
    }
    result
  }

  /// Drop every file appended after the first `len`.
  fn truncate_files(&mut self, len: usize) {
    for file in self.image.files.drain(len..) {
      self.positions.remove(file.name());
      if self.sources.remove(file.name()) {
        self.image.source_files.retain(|s| s != file.name());
      }
    }
  }

  fn add_file_inner(
    &mut self,
    file: ImageFile,
    mark_as_source: bool,
    in_progress: &mut HashSet<String>,
  ) -> Result<(), ImageError> {
    let name = file.name().to_string();

    if let Some(&pos) = self.positions.get(&name) {
      if !files_equal(&self.image.files[pos], &file) {
        return Err(ImageError::ConflictingFile(name));
      }
      trace!(file = %name, "file already present");
      if mark_as_source {
        self.mark_source(&name);
      }
      return Ok(());
    }

    if !in_progress.insert(name.clone()) {
      return Err(ImageError::CircularDependency(name));
    }

    for dep in file.dependencies() {
      if self.positions.contains_key(dep) {
        continue;
      }
      if let Some(indexed) = self.index.get(dep).cloned() {
        trace!(file = %name, dependency = %dep, "adding dependency from index");
        self.add_file_inner(indexed, false, in_progress)?;
        continue;
      }
      if builtins::is_builtin(dep) {
        continue;
      }
      return Err(ImageError::MissingDependency {
        file: name,
        dependency: dep.clone(),
      });
    }

    in_progress.remove(&name);
    self.positions.insert(name.clone(), self.image.files.len());
    self.image.files.push(file);
    if mark_as_source {
      self.mark_source(&name);
    }
    Ok(())
  }

  fn mark_source(&mut self, name: &str) {
    if self.sources.insert(name.to_string()) {
      self.image.source_files.push(name.to_string());
    }
  }

  pub fn add_package(&mut self, package: PackageMeta) {
    self.image.packages.push(package);
  }

  pub fn add_prose(&mut self, file: ProseFile) {
    self.image.prose.push(file);
  }

  /// Merge a fully resolved dependency image.
  ///
  /// Every incoming file is tagged with the included image's source name and
  /// added as a non-source file. A failed include adds no files. Packages and prose are carried over unless an
  /// equal entry is already present.
  pub fn include(&mut self, other: &SourceImage) -> Result<(), ImageError> {
    let source_name = match other.name.as_deref() {
      Some(name) if !name.is_empty() => name.to_string(),
      _ => return Err(ImageError::MissingSourceName),
    };

    debug!(image = %source_name, files = other.files.len(), "including image");

    let files_before = self.image.files.len();
    for file in sort_by_dependency(&other.files, false)? {
      if let Err(e) = self.add_file(file.with_provenance(source_name.clone()), false) {
        self.truncate_files(files_before);
        return Err(e);
      }
    }

    for package in &other.packages {
      if !self.image.packages.contains(package) {
        self.image.packages.push(package.clone());
      }
    }
    for prose in &other.prose {
      if !self.image.prose.contains(prose) {
        self.image.prose.push(prose.clone());
      }
    }

    Ok(())
  }

  /// Finish building and hand the image to the caller.
  pub fn build(self) -> SourceImage {
    self.image
  }
}

/// The union of several independent images.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CombinedFiles {
  /// Every distinct file, in first-seen order.
  pub files: Vec<ImageFile>,
  /// Files marked as source in at least one input, in first-seen order.
  pub source_files: Vec<String>,
}

/// Union the files of independent top-level images.
///
/// A name present in several images must carry equal content everywhere
/// (see [`files_equal`]); otherwise the union fails.
pub fn combine_images(images: &[SourceImage]) -> Result<CombinedFiles, ImageError> {
  let mut combined = CombinedFiles::default();
  let mut positions: HashMap<&str, usize> = HashMap::new();
  let mut seen_sources: HashSet<&str> = HashSet::new();

  for image in images {
    for file in &image.files {
      match positions.get(file.name()) {
        Some(&pos) => {
          if !files_equal(&combined.files[pos], file) {
            return Err(ImageError::ConflictingFile(file.name().to_string()));
          }
        }
        None => {
          positions.insert(file.name(), combined.files.len());
          combined.files.push(file.clone());
        }
      }
    }

    for source in &image.source_files {
      if seen_sources.insert(source.as_str()) {
        combined.source_files.push(source.clone());
      }
    }
  }

  Ok(combined)
}
