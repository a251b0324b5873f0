//! Publish command implementation.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use protoforge_lib::generate::Session;
use protoforge_lib::plugin::DirSink;

use crate::output::{OutputFormat, plural, print_json, print_stat, print_success};

pub async fn cmd_publish(
  repo: &Path,
  bundle: &str,
  version: &str,
  out: Option<&Path>,
  format: OutputFormat,
  cancel: &CancellationToken,
) -> Result<()> {
  let session = Session::open(repo).with_context(|| format!("Failed to open repository {}", repo.display()))?;
  let sink = Arc::new(DirSink::new(super::output_root(session.repo().root(), out)));

  let report = session.publish_bundle(bundle, version, sink, cancel).await?;

  if format.is_json() {
    let plugins: Vec<_> = report
      .plugins
      .iter()
      .map(|r| serde_json::json!({ "plugin": r.plugin, "files": r.files }))
      .collect();
    return print_json(&serde_json::json!({
      "bundle": report.bundle,
      "version": report.version,
      "plugins": plugins,
      "manifest": report.manifest,
    }));
  }

  print_success(&format!("Published {} {}", report.bundle, report.version));
  let files: usize = report.plugins.iter().map(|r| r.files.len()).sum();
  print_stat("Plugins", &report.plugins.len().to_string());
  print_stat("Files", &plural(files, "file"));
  if let Some(manifest) = &report.manifest {
    print_stat("Manifest", manifest);
  }
  Ok(())
}
