//! Plugin inheritance.
//!
//! Plugins are resolved one scope at a time. A scope is the repository-level
//! plugin list or a bundle's plugin list, whose enclosing scope is the
//! repository. Resolution runs in two passes: first every name in the scope
//! is indexed, then each `base` is looked up. A base must be defined earlier
//! in the same scope, or anywhere in the enclosing scope. A plugin whose base
//! carries its own name extends the enclosing plugin of that name.

use std::collections::{BTreeMap, HashMap};

use serde_yaml::Value;
use tracing::trace;

use super::config::{ConfigError, PluginConfig};
use crate::plugin::{BuildPlugin, PluginKind, RunType};

/// Resolve every `base` reference of `defs`.
///
/// `enclosing` holds the already resolved plugins of the enclosing scope.
/// The returned plugins have no `base` left and keep declaration order.
pub fn resolve_scope(
  scope: &str,
  defs: &[PluginConfig],
  enclosing: &BTreeMap<String, PluginConfig>,
) -> Result<Vec<PluginConfig>, ConfigError> {
  let mut positions: HashMap<&str, usize> = HashMap::new();
  for (i, def) in defs.iter().enumerate() {
    if positions.insert(def.name.as_str(), i).is_some() {
      return Err(ConfigError::DuplicatePlugin {
        scope: scope.to_string(),
        plugin: def.name.clone(),
      });
    }
  }

  let mut resolved: Vec<PluginConfig> = Vec::with_capacity(defs.len());
  for (i, def) in defs.iter().enumerate() {
    let Some(base_name) = def.base.as_deref() else {
      resolved.push(def.clone());
      continue;
    };

    let base = match positions.get(base_name) {
      Some(&pos) if pos < i => &resolved[pos],
      Some(&pos) if pos > i => {
        return Err(ConfigError::PluginBaseDefinedLater {
          scope: scope.to_string(),
          plugin: def.name.clone(),
          base: base_name.to_string(),
        });
      }
      _ => enclosing.get(base_name).ok_or_else(|| ConfigError::UndefinedPluginBase {
        scope: scope.to_string(),
        plugin: def.name.clone(),
        base: base_name.to_string(),
      })?,
    };

    trace!(plugin = %def.name, base = %base_name, "extending plugin");
    let extended = extend(base, def);
    resolved.push(extended);
  }

  Ok(resolved)
}

/// Apply `child` on top of `base`. Child fields win; options merge key-wise.
fn extend(base: &PluginConfig, child: &PluginConfig) -> PluginConfig {
  let mut options = base.options.clone();
  options.extend(child.options.iter().map(|(k, v)| (k.clone(), v.clone())));

  PluginConfig {
    name: child.name.clone(),
    base: None,
    kind: child.kind.clone().or_else(|| base.kind.clone()),
    run: child.run.clone().or_else(|| base.run.clone()),
    image: child.image.clone().or_else(|| base.image.clone()),
    command: child.command.clone().or_else(|| base.command.clone()),
    args: child.args.clone().or_else(|| base.args.clone()),
    builtin: child.builtin.clone().or_else(|| base.builtin.clone()),
    out: child.out.clone().or_else(|| base.out.clone()),
    options,
  }
}

/// Combine the repository plugins with a bundle's own.
///
/// A bundle plugin replaces the repository plugin of the same name in place;
/// the rest are appended in declaration order.
pub fn overlay(repo: &[PluginConfig], bundle: &[PluginConfig]) -> Vec<PluginConfig> {
  let mut merged: Vec<PluginConfig> = repo.to_vec();
  for plugin in bundle {
    match merged.iter_mut().find(|p| p.name == plugin.name) {
      Some(existing) => *existing = plugin.clone(),
      None => merged.push(plugin.clone()),
    }
  }
  merged
}

/// Turn a resolved plugin definition into a [`BuildPlugin`].
///
/// `run` defaults to `container`, or `builtin` when only `builtin` is set.
/// `kind` defaults to `protocol`.
pub fn validate(def: &PluginConfig) -> Result<BuildPlugin, ConfigError> {
  let kind = match def.kind.as_deref() {
    None => PluginKind::Protocol,
    Some(value) => PluginKind::parse(value).ok_or_else(|| ConfigError::UnsupportedPluginType {
      plugin: def.name.clone(),
      field: "kind",
      value: value.to_string(),
    })?,
  };

  let missing = |field| ConfigError::MissingPluginField {
    plugin: def.name.clone(),
    field,
  };

  let run_type = match def.run.as_deref() {
    Some(run) => run,
    None if def.builtin.is_some() && def.image.is_none() => "builtin",
    None if def.command.is_some() && def.image.is_none() => "local",
    None => "container",
  };
  let args = def.args.clone().unwrap_or_default();

  let run = match run_type {
    "container" => RunType::Container {
      image: def.image.clone().ok_or_else(|| missing("image"))?,
      args,
    },
    "local" => RunType::Local {
      command: def.command.clone().ok_or_else(|| missing("command"))?,
      args,
    },
    "builtin" => RunType::Builtin {
      name: def.builtin.clone().ok_or_else(|| missing("builtin"))?,
    },
    other => {
      return Err(ConfigError::UnsupportedPluginType {
        plugin: def.name.clone(),
        field: "run",
        value: other.to_string(),
      });
    }
  };

  let mut options = BTreeMap::new();
  for (key, value) in &def.options {
    let value = match value {
      Value::String(s) => s.clone(),
      Value::Bool(b) => b.to_string(),
      Value::Number(n) => n.to_string(),
      _ => {
        return Err(ConfigError::InvalidOption {
          plugin: def.name.clone(),
          key: key.clone(),
        });
      }
    };
    options.insert(key.clone(), value);
  }

  Ok(BuildPlugin {
    name: def.name.clone(),
    kind,
    run,
    out: def.out.clone(),
    options,
  })
}
