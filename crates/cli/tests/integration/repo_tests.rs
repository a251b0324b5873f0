//! Repository inspection integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn bundles_are_listed_in_dependency_order() {
  let env = TestEnv::two_bundles();

  let output = env.pforge().arg("bundles").output().unwrap();

  assert!(output.status.success());
  let stdout = String::from_utf8(output.stdout).unwrap();
  let common = stdout.find("common").unwrap();
  let api = stdout.find("api (").unwrap();
  assert!(common < api);
}

#[test]
fn bundles_json_includes_plugins() {
  let env = TestEnv::two_bundles();

  let output = env.pforge().args(["--format", "json", "bundles"]).output().unwrap();

  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value[1]["name"], "api");
  assert_eq!(value[1]["deps"][0], "local:common");
  assert_eq!(value[1]["plugins"], serde_json::json!(["files", "set"]));
}

#[test]
fn which_finds_the_deepest_bundle() {
  let env = TestEnv::two_bundles();

  env
    .pforge()
    .args(["which", "services/api/v1/api.proto"])
    .assert()
    .success()
    .stdout("api\n");
}

#[test]
fn which_outside_any_bundle_fails() {
  let env = TestEnv::two_bundles();

  env.pforge().args(["which", "README.md"]).assert().failure();
}

#[test]
fn lock_without_registry_dependencies() {
  let env = TestEnv::two_bundles();

  env
    .pforge()
    .arg("lock")
    .assert()
    .success()
    .stdout(predicate::str::contains("No registry dependencies"));
}

#[test]
fn lock_with_unconfigured_registry_fails() {
  let env = TestEnv::empty();
  env.write_file(
    "repo/protoforge.yaml",
    "bundles:\n  - name: api\n    dir: api\n    deps:\n      - registry: { owner: acme, name: types }\n",
  );
  std::fs::create_dir_all(env.repo_path().join("api")).unwrap();

  env
    .pforge()
    .arg("lock")
    .assert()
    .failure()
    .stderr(predicate::str::contains("acme/types"));
}

#[test]
fn missing_config_fails() {
  let env = TestEnv::empty();

  env.pforge().arg("bundles").assert().failure();
}
