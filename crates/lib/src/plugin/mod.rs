//! Code generator plugins.
//!
//! Plugins come in two kinds. Protocol generators receive a
//! `CodeGeneratorRequest` built from an image; client generators receive a
//! package tree and an options map. Either kind answers with a list of files
//! and an optional error string.
//!
//! # Modules
//!
//! - [`request`] - Request payloads and response normalization
//! - [`reflect`] - Package tree extraction for client generators
//! - [`builtin`] - In-process generators
//! - [`execute`] - The concurrent plugin engine
//! - [`sink`] - Destinations for generated files
//! - [`publish`] - Dependency manifests emitted by publish builds

pub mod builtin;
pub mod execute;
pub mod publish;
pub mod reflect;
pub mod request;
pub mod sink;
mod types;

use thiserror::Error;

use crate::image::ImageError;
use crate::runner::RunError;

pub use execute::{PluginEngine, PluginReport};
pub use reflect::{PackageReflector, SchemaReflector};
pub use sink::{DirSink, FileSink, MemorySink, SinkError};
pub use types::*;

#[derive(Debug, Error)]
pub enum PluginError {
  #[error("bundle '{bundle}' has no plugins configured")]
  NoPluginsConfigured { bundle: String },

  #[error("plugin '{plugin}' cannot run: {reason}")]
  UnsupportedPluginType { plugin: String, reason: String },

  /// The plugin process could not be run to completion.
  #[error("plugin '{plugin}' failed to run: {source}")]
  Transport {
    plugin: String,
    #[source]
    source: RunError,
  },

  /// The plugin's output was not a valid response payload.
  #[error("plugin '{plugin}' returned an invalid response: {source}")]
  InvalidResponse {
    plugin: String,
    #[source]
    source: prost::DecodeError,
  },

  /// The plugin ran and reported an error of its own.
  #[error("plugin '{plugin}' reported an error: {message}")]
  Reported { plugin: String, message: String },

  #[error("plugin '{plugin}' produced '{path}', which could not be written: {source}")]
  Sink {
    plugin: String,
    path: String,
    #[source]
    source: SinkError,
  },

  /// The image could not be turned into a generator request.
  #[error("failed to build request for plugin '{plugin}': {source}")]
  Request {
    plugin: String,
    #[source]
    source: ImageError,
  },

  #[error("plugin '{plugin}' task aborted: {message}")]
  Aborted { plugin: String, message: String },
}

impl PluginError {
  /// Name of the plugin the error is attributed to, if any.
  pub fn plugin(&self) -> Option<&str> {
    match self {
      PluginError::NoPluginsConfigured { .. } => None,
      PluginError::UnsupportedPluginType { plugin, .. }
      | PluginError::Transport { plugin, .. }
      | PluginError::InvalidResponse { plugin, .. }
      | PluginError::Reported { plugin, .. }
      | PluginError::Sink { plugin, .. }
      | PluginError::Request { plugin, .. }
      | PluginError::Aborted { plugin, .. } => Some(plugin),
    }
  }
}
