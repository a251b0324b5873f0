//! Package trees for client generators.
//!
//! A package tree is the schema reduced to what client code is generated
//! from: packages, with their messages, enums and services. Only the image's
//! source files contribute; dependencies are visible through type names only.

use std::collections::BTreeMap;

use prost::Message;
use prost_types::DescriptorProto;

use crate::image::SourceImage;

#[derive(Clone, PartialEq, Message)]
pub struct PackageTree {
  #[prost(message, repeated, tag = "1")]
  pub packages: Vec<PackageNode>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PackageNode {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(string, optional, tag = "2")]
  pub description: Option<String>,
  #[prost(string, repeated, tag = "3")]
  pub files: Vec<String>,
  /// Fully qualified message names, nested messages included.
  #[prost(string, repeated, tag = "4")]
  pub messages: Vec<String>,
  #[prost(string, repeated, tag = "5")]
  pub enums: Vec<String>,
  #[prost(message, repeated, tag = "6")]
  pub services: Vec<ServiceNode>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ServiceNode {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(message, repeated, tag = "2")]
  pub methods: Vec<MethodNode>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MethodNode {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(string, tag = "2")]
  pub input_type: String,
  #[prost(string, tag = "3")]
  pub output_type: String,
  #[prost(bool, tag = "4")]
  pub client_streaming: bool,
  #[prost(bool, tag = "5")]
  pub server_streaming: bool,
}

impl PackageTree {
  pub fn package(&self, name: &str) -> Option<&PackageNode> {
    self.packages.iter().find(|p| p.name == name)
  }
}

/// Derives the package tree handed to client generators.
pub trait SchemaReflector: Send + Sync {
  fn reflect(&self, image: &SourceImage) -> PackageTree;
}

/// Groups an image's source files by protobuf package.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageReflector;

impl SchemaReflector for PackageReflector {
  fn reflect(&self, image: &SourceImage) -> PackageTree {
    let mut packages: BTreeMap<String, PackageNode> = BTreeMap::new();

    for file in image.source_descriptors() {
      let package = file.package().to_string();
      let node = packages.entry(package.clone()).or_insert_with(|| PackageNode {
        name: package.clone(),
        description: image
          .packages
          .iter()
          .find(|p| p.name == package)
          .and_then(|p| p.description.clone()),
        ..Default::default()
      });

      node.files.push(file.name().to_string());
      for message in &file.message_type {
        collect_messages(&qualify(&package, message.name()), message, &mut node.messages, &mut node.enums);
      }
      for e in &file.enum_type {
        node.enums.push(qualify(&package, e.name()));
      }
      for service in &file.service {
        node.services.push(ServiceNode {
          name: qualify(&package, service.name()),
          methods: service
            .method
            .iter()
            .map(|m| MethodNode {
              name: m.name().to_string(),
              input_type: m.input_type().trim_start_matches('.').to_string(),
              output_type: m.output_type().trim_start_matches('.').to_string(),
              client_streaming: m.client_streaming(),
              server_streaming: m.server_streaming(),
            })
            .collect(),
        });
      }
    }

    PackageTree {
      packages: packages.into_values().collect(),
    }
  }
}

fn qualify(scope: &str, name: &str) -> String {
  if scope.is_empty() {
    name.to_string()
  } else {
    format!("{scope}.{name}")
  }
}

fn collect_messages(full_name: &str, message: &DescriptorProto, messages: &mut Vec<String>, enums: &mut Vec<String>) {
  messages.push(full_name.to_string());
  for e in &message.enum_type {
    enums.push(qualify(full_name, e.name()));
  }
  for nested in &message.nested_type {
    // Synthesized map entry types are not part of the API surface.
    if nested.options.as_ref().is_some_and(|o| o.map_entry()) {
      continue;
    }
    collect_messages(&qualify(full_name, nested.name()), nested, messages, enums);
  }
}
