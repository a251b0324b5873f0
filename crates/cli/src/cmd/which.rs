//! Which command implementation.
//!
//! Maps a file to the bundle that owns it.

use std::path::Path;

use anyhow::{Context, Result};

use protoforge_lib::repo::Repo;

use crate::output::{OutputFormat, print_json};

pub fn cmd_which(repo: &Path, file: &Path, format: OutputFormat) -> Result<()> {
  let repo = Repo::load(repo).with_context(|| format!("Failed to load repository {}", repo.display()))?;
  let (bundle, relative) = repo.bundle_for_file(file)?;

  if format.is_json() {
    return print_json(&serde_json::json!({
      "bundle": bundle.name,
      "dir": bundle.rel_dir,
      "path": relative,
    }));
  }

  println!("{}", bundle.name);
  Ok(())
}
