//! Lock command implementation.
//!
//! Re-resolves every registry dependency to its latest version and rewrites
//! the lock file when a pin moved.

use std::path::Path;

use anyhow::{Context, Result};

use protoforge_lib::generate::Session;

use crate::output::{OutputFormat, plural, print_info, print_json, print_success, symbols};

pub async fn cmd_lock(repo: &Path, format: OutputFormat) -> Result<()> {
  let session = Session::open(repo).with_context(|| format!("Failed to open repository {}", repo.display()))?;
  let (lock, changed) = session.update_lock().await?;

  if format.is_json() {
    return print_json(&serde_json::json!({
      "changed": changed,
      "dependencies": lock.dependencies,
    }));
  }

  if lock.is_empty() {
    print_info("No registry dependencies to lock.");
    return Ok(());
  }

  if changed {
    print_success(&format!("Updated lock file ({})", plural(lock.len(), "pin")));
  } else {
    print_info("Lock file is up to date.");
  }
  for dep in &lock.dependencies {
    println!("  {} {} {}", dep.name, symbols::ARROW, dep.version);
  }
  Ok(())
}
