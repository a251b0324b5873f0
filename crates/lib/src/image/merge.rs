//! Descriptor ordering and comparison.
//!
//! These are pure helpers shared by the image assembler and the repository
//! model: a depth-first topological sort over import edges, and a structural
//! equality that ignores metadata which does not affect generated code.

use std::collections::{BTreeMap, HashSet};

use tracing::trace;

use super::{ImageError, ImageFile, builtins};

/// Order `files` so that every file comes after the files it imports.
///
/// Roots and imports are visited in name order, so the result is the same for
/// the same input. A file that is re-entered while its own imports are still
/// being visited fails with [`ImageError::CircularDependency`].
///
/// Imports that are not part of `files` are looked up in the well-known table
/// when `resolve_builtins` is set (and the resolved descriptors are included
/// in the output); anything else fails with [`ImageError::MissingDependency`].
/// Without `resolve_builtins`, unknown imports are assumed to live in another,
/// already resolved, set and are skipped.
pub fn sort_by_dependency(files: &[ImageFile], resolve_builtins: bool) -> Result<Vec<ImageFile>, ImageError> {
  let mut by_name: BTreeMap<String, ImageFile> = BTreeMap::new();
  for file in files {
    match by_name.get(file.name()) {
      Some(existing) if !files_equal(existing, file) => {
        return Err(ImageError::ConflictingFile(file.name().to_string()));
      }
      Some(_) => {}
      None => {
        by_name.insert(file.name().to_string(), file.clone());
      }
    }
  }

  let mut sort = TopoSort {
    files: &by_name,
    resolve_builtins,
    visiting: HashSet::new(),
    done: HashSet::new(),
    ordered: Vec::with_capacity(by_name.len()),
  };

  for name in by_name.keys() {
    sort.visit(name, None)?;
  }

  Ok(sort.ordered)
}

struct TopoSort<'a> {
  files: &'a BTreeMap<String, ImageFile>,
  resolve_builtins: bool,
  visiting: HashSet<String>,
  done: HashSet<String>,
  ordered: Vec<ImageFile>,
}

impl TopoSort<'_> {
  fn visit(&mut self, name: &str, importer: Option<&str>) -> Result<(), ImageError> {
    if self.done.contains(name) {
      return Ok(());
    }
    if self.visiting.contains(name) {
      return Err(ImageError::CircularDependency(name.to_string()));
    }

    let file = match self.files.get(name) {
      Some(file) => file.clone(),
      None if self.resolve_builtins => match builtins::lookup(name) {
        Some(descriptor) => ImageFile::new(descriptor),
        None => {
          return Err(ImageError::MissingDependency {
            file: importer.unwrap_or(name).to_string(),
            dependency: name.to_string(),
          });
        }
      },
      None => {
        trace!(file = name, "dependency assumed to be resolved elsewhere");
        self.done.insert(name.to_string());
        return Ok(());
      }
    };

    self.visiting.insert(name.to_string());

    let mut deps: Vec<&String> = file.dependencies().iter().collect();
    deps.sort();
    for dep in deps {
      self.visit(dep, Some(name))?;
    }

    self.visiting.remove(name);
    self.done.insert(name.to_string());
    self.ordered.push(file);
    Ok(())
  }
}

/// Structural equality of two descriptor files.
///
/// Provenance and source code info (comments and locations) are ignored: two
/// copies of a file pulled in through different dependencies are the same file.
pub fn files_equal(a: &ImageFile, b: &ImageFile) -> bool {
  if a.name() != b.name() {
    return false;
  }

  let mut left = a.descriptor.clone();
  let mut right = b.descriptor.clone();
  left.source_code_info = None;
  right.source_code_info = None;
  left == right
}
