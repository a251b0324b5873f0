//! Dependency manifests for published bundles.
//!
//! After every plugin of a publish build succeeds, the bundle may emit a
//! package manifest naming the published package, its version and its
//! pinned registry dependencies.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::GeneratedFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishFormat {
  /// A `go.mod` file.
  GoModule,
  /// A `package.json` file.
  NpmPackage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
  pub format: PublishFormat,
  /// Module path or package name of the published output.
  pub name: String,
  /// Prepended verbatim to `owner/name` to form dependency package names,
  /// e.g. `github.com/` or `@`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dependency_prefix: Option<String>,
}

/// A registry dependency pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedDependency {
  /// `owner/name`.
  pub name: String,
  pub version: String,
}

impl PublishConfig {
  fn dependency_name(&self, dep: &str) -> String {
    format!("{}{dep}", self.dependency_prefix.as_deref().unwrap_or_default())
  }

  /// Render the manifest for `version`, listing `deps` in name order.
  pub fn manifest(&self, version: &str, deps: &[PinnedDependency]) -> GeneratedFile {
    let mut deps = deps.to_vec();
    deps.sort_by(|a, b| a.name.cmp(&b.name));
    deps.dedup_by(|a, b| a.name == b.name);

    match self.format {
      PublishFormat::GoModule => self.go_mod(&deps),
      PublishFormat::NpmPackage => self.package_json(version, &deps),
    }
  }

  fn go_mod(&self, deps: &[PinnedDependency]) -> GeneratedFile {
    let mut content = format!("module {}\n", self.name);
    if !deps.is_empty() {
      content.push_str("\nrequire (\n");
      for dep in deps {
        content.push_str(&format!("\t{} {}\n", self.dependency_name(&dep.name), go_version(&dep.version)));
      }
      content.push_str(")\n");
    }
    GeneratedFile {
      path: "go.mod".to_string(),
      content: content.into_bytes(),
    }
  }

  fn package_json(&self, version: &str, deps: &[PinnedDependency]) -> GeneratedFile {
    let dependencies: serde_json::Map<String, serde_json::Value> = deps
      .iter()
      .map(|dep| (self.dependency_name(&dep.name), json!(dep.version.trim_start_matches('v'))))
      .collect();
    let manifest = json!({
      "name": self.name,
      "version": version.trim_start_matches('v'),
      "dependencies": dependencies,
    });

    let mut content = serde_json::to_string_pretty(&manifest).unwrap_or_default();
    content.push('\n');
    GeneratedFile {
      path: "package.json".to_string(),
      content: content.into_bytes(),
    }
  }
}

fn go_version(version: &str) -> String {
  if version.starts_with('v') {
    version.to_string()
  } else {
    format!("v{version}")
  }
}
