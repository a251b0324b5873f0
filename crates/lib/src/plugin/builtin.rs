//! In-process generators.
//!
//! Builtins take the same `CodeGeneratorRequest` an external protocol
//! generator would and answer with a `CodeGeneratorResponse`, with no process
//! boundary in between.

use prost::Message;
use prost_types::FileDescriptorSet;
use prost_types::compiler::code_generator_response::File;
use prost_types::compiler::{CodeGeneratorRequest, CodeGeneratorResponse};

use super::request::parse_parameter;

pub type BuiltinFn = fn(&CodeGeneratorRequest) -> CodeGeneratorResponse;

const BUILTINS: &[(&str, BuiltinFn)] = &[("descriptor_set", descriptor_set), ("file_list", file_list)];

pub fn lookup(name: &str) -> Option<BuiltinFn> {
  BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

pub fn names() -> impl Iterator<Item = &'static str> {
  BUILTINS.iter().map(|(n, _)| *n)
}

fn file(name: impl Into<String>, content: String) -> File {
  File {
    name: Some(name.into()),
    content: Some(content),
    ..Default::default()
  }
}

fn failure(message: impl Into<String>) -> CodeGeneratorResponse {
  CodeGeneratorResponse {
    error: Some(message.into()),
    ..Default::default()
  }
}

/// Emits the request's descriptors as a base64 encoded `FileDescriptorSet`.
///
/// Options: `path` (default `image.binpb.b64`), `include_imports`
/// (`true` by default; `false` keeps only files to generate).
fn descriptor_set(request: &CodeGeneratorRequest) -> CodeGeneratorResponse {
  use base64::Engine as _;
  use base64::engine::general_purpose::STANDARD;

  let options = parse_parameter(request.parameter());
  let path = options
    .get("path")
    .cloned()
    .unwrap_or_else(|| "image.binpb.b64".to_string());
  let include_imports = match options.get("include_imports").map(String::as_str) {
    None | Some("true") => true,
    Some("false") => false,
    Some(other) => return failure(format!("include_imports must be true or false, got '{other}'")),
  };

  let set = FileDescriptorSet {
    file: request
      .proto_file
      .iter()
      .filter(|f| include_imports || request.file_to_generate.iter().any(|g| g == f.name()))
      .cloned()
      .collect(),
  };

  // Response content is text, so the binary set is base64 encoded.
  CodeGeneratorResponse {
    file: vec![file(path, STANDARD.encode(set.encode_to_vec()))],
    ..Default::default()
  }
}

/// Emits the names of the files to generate, one per line.
///
/// Options: `path` (default `files.txt`).
fn file_list(request: &CodeGeneratorRequest) -> CodeGeneratorResponse {
  let options = parse_parameter(request.parameter());
  let path = options.get("path").cloned().unwrap_or_else(|| "files.txt".to_string());

  let mut content = request.file_to_generate.join("\n");
  if !content.is_empty() {
    content.push('\n');
  }
  CodeGeneratorResponse {
    file: vec![file(path, content)],
    ..Default::default()
  }
}
