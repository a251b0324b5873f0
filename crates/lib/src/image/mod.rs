//! Source images.
//!
//! A [`SourceImage`] is the linked, self-contained snapshot of protobuf file
//! descriptors, package metadata and prose produced for one buildable unit.
//! Images are protobuf messages themselves so they can be cached and exchanged
//! with registries without a second serialization format.
//!
//! # Modules
//!
//! - [`builtins`] - Well-known descriptors that never need to be shipped with an image
//! - [`merge`] - Dependency ordering and structural comparison of descriptor files
//! - [`builder`] - The image assembler enforcing non-duplication and non-conflict

pub mod builder;
pub mod builtins;
pub mod merge;

use std::collections::BTreeMap;

use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use thiserror::Error;

pub use builder::{CombinedFiles, ImageBuilder, combine_images};
pub use merge::{files_equal, sort_by_dependency};

/// Descriptor files available to satisfy dependencies, keyed by file name.
pub type DescriptorIndex = BTreeMap<String, ImageFile>;

/// Errors raised while ordering, merging or decoding images.
#[derive(Debug, Error, PartialEq)]
pub enum ImageError {
  /// A file re-entered itself while its dependencies were being visited.
  #[error("circular dependency detected at '{0}'")]
  CircularDependency(String),

  /// A declared dependency is neither present, indexed nor built in.
  #[error("file '{file}' depends on '{dependency}', which is not available")]
  MissingDependency { file: String, dependency: String },

  /// Two files share a name but differ in content.
  #[error("file '{0}' was supplied more than once with differing content")]
  ConflictingFile(String),

  /// An included image carried no source name to tag its files with.
  #[error("included image does not declare a source name")]
  MissingSourceName,

  /// Image bytes could not be decoded.
  #[error("failed to decode image: {0}")]
  Decode(#[from] prost::DecodeError),
}

/// A descriptor file inside an image.
#[derive(Clone, PartialEq, Message)]
pub struct ImageFile {
  #[prost(message, required, tag = "1")]
  pub descriptor: FileDescriptorProto,

  /// Source name of the image this file was included from.
  #[prost(string, optional, tag = "2")]
  pub provenance: Option<String>,
}

impl ImageFile {
  pub fn new(descriptor: FileDescriptorProto) -> Self {
    Self {
      descriptor,
      provenance: None,
    }
  }

  /// The file's path-like name, e.g. `acme/v1/user.proto`.
  pub fn name(&self) -> &str {
    self.descriptor.name()
  }

  /// Names of the files this file imports.
  pub fn dependencies(&self) -> &[String] {
    &self.descriptor.dependency
  }

  pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
    self.provenance = Some(provenance.into());
    self
  }
}

/// Metadata about a package shipped in an image.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct PackageMeta {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(string, optional, tag = "2")]
  pub version: Option<String>,
  #[prost(string, optional, tag = "3")]
  pub description: Option<String>,
}

/// A documentation file carried alongside descriptors.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ProseFile {
  #[prost(string, tag = "1")]
  pub path: String,
  #[prost(string, tag = "2")]
  pub content: String,
}

/// A secondary registry reference declared by a fetched image.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct ImageInclude {
  #[prost(string, tag = "1")]
  pub owner: String,
  #[prost(string, tag = "2")]
  pub name: String,
  #[prost(string, optional, tag = "3")]
  pub version: Option<String>,
}

impl ImageInclude {
  pub fn full_name(&self) -> String {
    format!("{}/{}", self.owner, self.name)
  }
}

/// A fully linked snapshot of descriptors and metadata for one unit of schema.
#[derive(Clone, PartialEq, Message)]
pub struct SourceImage {
  /// Descriptor files in dependency order.
  #[prost(message, repeated, tag = "1")]
  pub files: Vec<ImageFile>,

  /// Names of files that belong to this unit (as opposed to pulled-in dependencies).
  #[prost(string, repeated, tag = "2")]
  pub source_files: Vec<String>,

  #[prost(message, repeated, tag = "3")]
  pub packages: Vec<PackageMeta>,

  #[prost(message, repeated, tag = "4")]
  pub prose: Vec<ProseFile>,

  /// Source name, e.g. a bundle name or `owner/name` for registry images.
  #[prost(string, optional, tag = "5")]
  pub name: Option<String>,

  /// Exact resolved version, when known.
  #[prost(string, optional, tag = "6")]
  pub version: Option<String>,

  /// Registry references still to be resolved and merged into this image.
  #[prost(message, repeated, tag = "7")]
  pub includes: Vec<ImageInclude>,
}

impl SourceImage {
  /// Create an empty image with the given source name.
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      ..Default::default()
    }
  }

  /// Decode an image from its protobuf encoding.
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
    Ok(Self::decode(bytes)?)
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    self.encode_to_vec()
  }

  pub fn file(&self, name: &str) -> Option<&ImageFile> {
    self.files.iter().find(|f| f.name() == name)
  }

  pub fn is_source(&self, name: &str) -> bool {
    self.source_files.iter().any(|s| s == name)
  }

  pub fn file_names(&self) -> impl Iterator<Item = &str> {
    self.files.iter().map(ImageFile::name)
  }

  /// Descriptor files that belong to this unit, in image order.
  pub fn source_descriptors(&self) -> impl Iterator<Item = &FileDescriptorProto> {
    self
      .files
      .iter()
      .filter(|f| self.is_source(f.name()))
      .map(|f| &f.descriptor)
  }

  /// All descriptors as a `FileDescriptorSet`, preserving image order.
  pub fn descriptor_set(&self) -> FileDescriptorSet {
    FileDescriptorSet {
      file: self.files.iter().map(|f| f.descriptor.clone()).collect(),
    }
  }

  /// Index of every file in the image, for use as a dependency index.
  pub fn index(&self) -> DescriptorIndex {
    self.files.iter().map(|f| (f.name().to_string(), f.clone())).collect()
  }
}
