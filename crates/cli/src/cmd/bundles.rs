//! Bundles command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use protoforge_lib::repo::Repo;

use crate::output::{OutputFormat, print_json, print_stat, symbols};

pub fn cmd_bundles(repo: &Path, verbose: bool, format: OutputFormat) -> Result<()> {
  let repo = Repo::load(repo).with_context(|| format!("Failed to load repository {}", repo.display()))?;

  let mut bundles = Vec::new();
  for name in repo.graph().sorted()? {
    bundles.push(repo.bundle(&name)?);
  }

  if format.is_json() {
    let items: Vec<_> = bundles
      .iter()
      .map(|b| {
        serde_json::json!({
          "name": b.name,
          "dir": b.rel_dir,
          "deps": b.deps.iter().map(ToString::to_string).collect::<Vec<_>>(),
          "plugins": b.plugins.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        })
      })
      .collect();
    return print_json(&items);
  }

  for bundle in bundles {
    println!("{} {} ({})", symbols::INFO, bundle.name, bundle.rel_dir.display());
    if verbose {
      for dep in &bundle.deps {
        print_stat("dep", &dep.to_string());
      }
      for plugin in &bundle.plugins {
        print_stat("plugin", &format!("{} [{}, {}]", plugin.name, plugin.kind, plugin.run.label()));
      }
    }
  }
  Ok(())
}
