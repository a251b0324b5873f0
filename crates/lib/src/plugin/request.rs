//! Generator request and response payloads.
//!
//! Protocol generators speak the standard `CodeGeneratorRequest` /
//! `CodeGeneratorResponse` pair. Client generators speak the smaller pair
//! defined here. Both responses are normalized into a [`PluginResponse`].

use std::collections::BTreeMap;

use prost::Message;
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};
use tracing::warn;

use super::reflect::PackageTree;
use super::{BuildPlugin, GeneratedFile};
use crate::image::{ImageError, SourceImage, sort_by_dependency};

#[derive(Clone, PartialEq, Message)]
pub struct ClientGeneratorRequest {
  #[prost(message, optional, tag = "1")]
  pub package_tree: Option<PackageTree>,
  #[prost(btree_map = "string, string", tag = "2")]
  pub options: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientGeneratorResponse {
  #[prost(message, repeated, tag = "1")]
  pub files: Vec<ClientFile>,
  #[prost(string, optional, tag = "2")]
  pub error: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientFile {
  #[prost(string, tag = "1")]
  pub path: String,
  #[prost(bytes = "vec", tag = "2")]
  pub content: Vec<u8>,
}

/// A generator response, whichever kind produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginResponse {
  pub error: Option<String>,
  pub files: Vec<GeneratedFile>,
}

/// Build the protocol request for `image`.
///
/// Every descriptor is included in dependency order, together with the
/// well-known descriptors the image imports. Only source files are listed for
/// generation.
pub fn protocol_request(image: &SourceImage, plugin: &BuildPlugin) -> Result<CodeGeneratorRequest, ImageError> {
  let parameter = plugin.parameter();
  let ordered = sort_by_dependency(&image.files, true)?;
  Ok(CodeGeneratorRequest {
    file_to_generate: image
      .files
      .iter()
      .map(|f| f.name())
      .filter(|name| image.is_source(name))
      .map(str::to_string)
      .collect(),
    parameter: (!parameter.is_empty()).then_some(parameter),
    proto_file: ordered.into_iter().map(|f| f.descriptor).collect(),
    ..Default::default()
  })
}

pub fn client_request(tree: &PackageTree, plugin: &BuildPlugin) -> ClientGeneratorRequest {
  ClientGeneratorRequest {
    package_tree: Some(tree.clone()),
    options: plugin.options.clone(),
  }
}

impl From<CodeGeneratorResponse> for PluginResponse {
  fn from(response: CodeGeneratorResponse) -> Self {
    let mut files = Vec::with_capacity(response.file.len());
    for file in response.file {
      let name = file.name.unwrap_or_default();
      if file.insertion_point.as_deref().is_some_and(|p| !p.is_empty()) {
        warn!(file = %name, "insertion points are not supported, skipping");
        continue;
      }
      if name.is_empty() {
        warn!("generated file without a name, skipping");
        continue;
      }
      files.push(GeneratedFile {
        path: name,
        content: file.content.unwrap_or_default().into_bytes(),
      });
    }
    PluginResponse {
      error: response.error.filter(|e| !e.is_empty()),
      files,
    }
  }
}

impl From<ClientGeneratorResponse> for PluginResponse {
  fn from(response: ClientGeneratorResponse) -> Self {
    PluginResponse {
      error: response.error.filter(|e| !e.is_empty()),
      files: response
        .files
        .into_iter()
        .map(|f| GeneratedFile {
          path: f.path,
          content: f.content,
        })
        .collect(),
    }
  }
}

/// Split a `k=v,k2=v2` parameter string into a map. Bare keys map to "".
pub fn parse_parameter(parameter: &str) -> BTreeMap<String, String> {
  parameter
    .split(',')
    .map(str::trim)
    .filter(|p| !p.is_empty())
    .map(|pair| match pair.split_once('=') {
      Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
      None => (pair.to_string(), String::new()),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use prost_types::compiler::code_generator_response::File;

  use super::*;
  use crate::image::ImageBuilder;
  use crate::image::testutil::file;
  use crate::plugin::{PluginKind, RunType};

  fn plugin(options: &[(&str, &str)]) -> BuildPlugin {
    BuildPlugin {
      name: "go".to_string(),
      kind: PluginKind::Protocol,
      run: RunType::Local {
        command: "protoc-gen-go".to_string(),
        args: vec![],
      },
      out: None,
      options: options.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
  }

  fn image() -> SourceImage {
    let mut image = SourceImage::named("api");
    image.files = vec![file("dep.proto", &[]), file("api.proto", &["dep.proto"])];
    image.source_files = vec!["api.proto".to_string()];
    image
  }

  #[test]
  fn protocol_request_lists_sources_and_all_descriptors() {
    let request = protocol_request(&image(), &plugin(&[("paths", "source_relative"), ("a", "1")])).unwrap();

    assert_eq!(request.file_to_generate, ["api.proto"]);
    let names: Vec<_> = request.proto_file.iter().map(|f| f.name()).collect();
    assert_eq!(names, ["dep.proto", "api.proto"]);
    assert_eq!(request.parameter.as_deref(), Some("a=1,paths=source_relative"));
  }

  #[test]
  fn empty_options_leave_parameter_unset() {
    let request = protocol_request(&image(), &plugin(&[])).unwrap();
    assert_eq!(request.parameter, None);
  }

  #[test]
  fn well_known_imports_precede_their_importers() {
    let mut builder = ImageBuilder::new("api");
    builder
      .add_file(file("api.proto", &["google/protobuf/timestamp.proto"]), true)
      .unwrap();

    let request = protocol_request(&builder.build(), &plugin(&[])).unwrap();

    let names: Vec<_> = request.proto_file.iter().map(|f| f.name()).collect();
    assert_eq!(names, ["google/protobuf/timestamp.proto", "api.proto"]);
    assert_eq!(request.file_to_generate, ["api.proto"]);
  }

  #[test]
  fn unresolvable_import_fails_the_request() {
    let mut image = image();
    image.files.push(file("orphan.proto", &["missing.proto"]));

    let result = protocol_request(&image, &plugin(&[]));

    assert!(matches!(result, Err(ImageError::MissingDependency { dependency, .. }) if dependency == "missing.proto"));
  }

  #[test]
  fn protocol_response_skips_insertion_points() {
    let response = CodeGeneratorResponse {
      file: vec![
        File {
          name: Some("api.pb.go".to_string()),
          content: Some("package api".to_string()),
          ..Default::default()
        },
        File {
          name: Some("api.pb.go".to_string()),
          insertion_point: Some("imports".to_string()),
          content: Some("import x".to_string()),
          ..Default::default()
        },
      ],
      ..Default::default()
    };

    let normalized = PluginResponse::from(response);

    assert_eq!(normalized.error, None);
    assert_eq!(normalized.files.len(), 1);
    assert_eq!(normalized.files[0].content, b"package api");
  }

  #[test]
  fn empty_error_string_is_not_an_error() {
    let response = ClientGeneratorResponse {
      files: vec![],
      error: Some(String::new()),
    };
    assert_eq!(PluginResponse::from(response).error, None);
  }

  #[test]
  fn parameter_parsing() {
    let parsed = parse_parameter("a=1, b , c=x=y,");
    assert_eq!(parsed.get("a").map(String::as_str), Some("1"));
    assert_eq!(parsed.get("b").map(String::as_str), Some(""));
    assert_eq!(parsed.get("c").map(String::as_str), Some("x=y"));
    assert_eq!(parsed.len(), 3);
  }
}
