//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use tempfile::TempDir;

/// Repository with two bundles and builtin plugins only, so nothing needs a
/// network, a container engine or a registry.
pub const TWO_BUNDLES: &str = r#"
bundles:
  - name: common
    dir: common
  - name: api
    dir: services/api
    deps:
      - local: common
    plugins:
      - name: files
        builtin: file_list
        out: gen
      - name: set
        builtin: descriptor_set
        options:
          path: api.b64
"#;

/// Isolated test environment.
///
/// Each test gets its own repository directory, output directory and cache.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Write `protoforge.yaml` and the descriptor sets of the `TWO_BUNDLES` layout.
  pub fn two_bundles() -> Self {
    let env = Self::empty();
    env.write_file("repo/protoforge.yaml", TWO_BUNDLES);
    env.write_set(
      "repo/common/common.binpb",
      vec![descriptor("common/v1/common.proto", "common.v1", &[])],
    );
    env.write_set(
      "repo/services/api/api.binpb",
      vec![descriptor("api/v1/api.proto", "api.v1", &["common/v1/common.proto"])],
    );
    env
  }

  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Write an encoded descriptor set relative to the temp directory.
  pub fn write_set(&self, relative_path: &str, files: Vec<FileDescriptorProto>) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, FileDescriptorSet { file: files }.encode_to_vec()).unwrap();
  }

  pub fn repo_path(&self) -> PathBuf {
    let p = self.temp.path().join("repo");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Directory generated files are written to.
  pub fn out_path(&self) -> PathBuf {
    let p = self.temp.path().join("out");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn cache_path(&self) -> PathBuf {
    let p = self.temp.path().join("cache");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  pub fn read_out(&self, relative: impl AsRef<Path>) -> String {
    std::fs::read_to_string(self.out_path().join(relative)).unwrap()
  }

  /// A `pforge` command pointed at this environment's repository.
  ///
  /// `PROTOFORGE_CACHE_DIR` isolates the image cache.
  pub fn pforge(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("pforge");
    cmd.env("PROTOFORGE_CACHE_DIR", self.cache_path());
    cmd.env_remove("RUST_LOG");
    cmd.arg("--repo").arg(self.repo_path());
    cmd
  }
}

pub fn descriptor(name: &str, package: &str, deps: &[&str]) -> FileDescriptorProto {
  FileDescriptorProto {
    name: Some(name.to_string()),
    package: Some(package.to_string()),
    dependency: deps.iter().map(|d| d.to_string()).collect(),
    syntax: Some("proto3".to_string()),
    ..Default::default()
  }
}
