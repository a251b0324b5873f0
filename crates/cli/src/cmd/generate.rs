//! Generate command implementation.
//!
//! Runs the plugins of the selected bundles and writes their output below the
//! output root.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use protoforge_lib::generate::Session;
use protoforge_lib::plugin::DirSink;

use crate::output::{OutputFormat, format_duration, plural, print_info, print_json, print_stat, print_success};

pub async fn cmd_generate(
  repo: &Path,
  bundles: &[String],
  out: Option<&Path>,
  format: OutputFormat,
  cancel: &CancellationToken,
) -> Result<()> {
  let start = Instant::now();
  let session = Session::open(repo).with_context(|| format!("Failed to open repository {}", repo.display()))?;
  let sink = Arc::new(DirSink::new(super::output_root(session.repo().root(), out)));

  let reports = session.generate_all(bundles, sink, cancel).await?;
  let elapsed = start.elapsed();

  if format.is_json() {
    let plugins: Vec<_> = reports
      .iter()
      .map(|r| serde_json::json!({ "plugin": r.plugin, "files": r.files }))
      .collect();
    return print_json(&serde_json::json!({
      "plugins": plugins,
      "duration_ms": elapsed.as_millis(),
    }));
  }

  if reports.is_empty() {
    print_info("No plugins configured. Nothing to generate.");
    return Ok(());
  }

  let files: usize = reports.iter().map(|r| r.files.len()).sum();
  print_success(&format!(
    "Generated {} from {}",
    plural(files, "file"),
    plural(reports.len(), "plugin")
  ));
  for report in &reports {
    print_stat(&report.plugin, &plural(report.files.len(), "file"));
  }
  print_stat("Time", &format_duration(elapsed));
  Ok(())
}
