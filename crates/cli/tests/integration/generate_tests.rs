//! Generate and publish integration tests.

use predicates::prelude::*;

use super::common::{TWO_BUNDLES, TestEnv};

#[test]
fn generate_writes_builtin_output() {
  let env = TestEnv::two_bundles();

  env
    .pforge()
    .arg("generate")
    .arg("--out")
    .arg(env.out_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Generated 2 files from 2 plugins"));

  assert_eq!(env.read_out("gen/files.txt"), "api/v1/api.proto\n");
  assert!(env.out_path().join("api.b64").exists());
}

#[test]
fn generate_is_repeatable() {
  let env = TestEnv::two_bundles();

  for _ in 0..2 {
    env.pforge().arg("generate").arg("--out").arg(env.out_path()).assert().success();
  }

  assert_eq!(env.read_out("gen/files.txt"), "api/v1/api.proto\n");
}

#[test]
fn generate_named_bundle_without_plugins_does_nothing() {
  let env = TestEnv::two_bundles();

  env
    .pforge()
    .args(["generate", "common", "--out"])
    .arg(env.out_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to generate"));

  assert!(!env.out_path().join("gen").exists());
}

#[test]
fn generate_unknown_bundle_fails() {
  let env = TestEnv::two_bundles();

  env
    .pforge()
    .args(["generate", "missing"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing"));
}

#[test]
fn generate_json_lists_files() {
  let env = TestEnv::two_bundles();

  let output = env
    .pforge()
    .args(["--format", "json", "generate", "--out"])
    .arg(env.out_path())
    .output()
    .unwrap();

  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value["plugins"][0]["plugin"], "files");
  assert_eq!(value["plugins"][0]["files"][0], "gen/files.txt");
  assert_eq!(value["plugins"][1]["files"][0], "api.b64");
}

#[test]
fn failing_local_plugin_fails_the_build() {
  let env = TestEnv::empty();
  env.write_file(
    "repo/protoforge.yaml",
    r#"
bundles:
  - name: api
    dir: api
    plugins:
      - name: broken
        run: local
        command: pforge-no-such-generator
"#,
  );
  env.write_set(
    "repo/api/api.binpb",
    vec![super::common::descriptor("api/v1/api.proto", "api.v1", &[])],
  );

  env
    .pforge()
    .args(["generate", "--out"])
    .arg(env.out_path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("broken"));
}

#[test]
fn publish_without_manifest_reports_version() {
  let env = TestEnv::two_bundles();

  env
    .pforge()
    .args(["publish", "api", "--version", "v1.0.0", "--out"])
    .arg(env.out_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("Published api v1.0.0"));

  assert!(!env.out_path().join("go.mod").exists());
}

#[test]
fn publish_writes_go_module() {
  let env = TestEnv::two_bundles();
  env.write_file(
    "repo/protoforge.yaml",
    &format!("{TWO_BUNDLES}    publish:\n      format: go_module\n      name: example.com/api\n"),
  );

  env
    .pforge()
    .args(["publish", "api", "--version", "v1.0.0", "--out"])
    .arg(env.out_path())
    .assert()
    .success()
    .stdout(predicate::str::contains("go.mod"));

  assert_eq!(env.read_out("go.mod"), "module example.com/api\n");
}
