use std::collections::BTreeMap;
use std::fmt;

/// What a generator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
  /// Takes a descriptor-set request and answers with generated files.
  Protocol,
  /// Takes a package tree and an options map.
  Client,
}

impl PluginKind {
  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "protocol" => Some(PluginKind::Protocol),
      "client" => Some(PluginKind::Client),
      _ => None,
    }
  }
}

impl fmt::Display for PluginKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PluginKind::Protocol => write!(f, "protocol"),
      PluginKind::Client => write!(f, "client"),
    }
  }
}

/// How a generator is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunType {
  /// In a container started from `image`.
  Container { image: String, args: Vec<String> },
  /// As a local process.
  Local { command: String, args: Vec<String> },
  /// In-process, by builtin name.
  Builtin { name: String },
}

impl RunType {
  pub fn label(&self) -> &'static str {
    match self {
      RunType::Container { .. } => "container",
      RunType::Local { .. } => "local",
      RunType::Builtin { .. } => "builtin",
    }
  }
}

/// A fully resolved code generator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlugin {
  pub name: String,
  pub kind: PluginKind,
  pub run: RunType,
  /// Prefix joined in front of every generated file path.
  pub out: Option<String>,
  pub options: BTreeMap<String, String>,
}

impl BuildPlugin {
  /// Options as `k=v` pairs joined by commas, in key order.
  pub fn parameter(&self) -> String {
    self
      .options
      .iter()
      .map(|(k, v)| format!("{k}={v}"))
      .collect::<Vec<_>>()
      .join(",")
  }

  /// The path a generated file lands at, after applying `out`.
  pub fn output_path(&self, file: &str) -> String {
    match self.out.as_deref().map(|o| o.trim_end_matches('/')) {
      Some(out) if !out.is_empty() => format!("{out}/{file}"),
      _ => file.to_string(),
    }
  }
}

/// A file produced by a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
  pub path: String,
  pub content: Vec<u8>,
}
