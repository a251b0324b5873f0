//! The bundle dependency graph.
//!
//! Only local dependencies are edges. Registry dependencies are resolved
//! separately and never take part in the ordering.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use super::{Bundle, RepoError};
use crate::inputs::Input;

/// Check that every local dependency names a bundle declared earlier.
///
/// Bundles are validated in declaration order, so a bundle depending on
/// itself or on a later bundle fails the same way as one depending on a
/// bundle that does not exist.
pub fn validate_bundles(bundles: &[Bundle]) -> Result<(), RepoError> {
  let mut declared: HashSet<&str> = HashSet::new();

  for bundle in bundles {
    for dep in &bundle.deps {
      if let Input::Local(name) = dep
        && !declared.contains(name.as_str())
      {
        return Err(RepoError::UndeclaredLocalDependency {
          bundle: bundle.name.clone(),
          dependency: name.clone(),
        });
      }
    }
    if !declared.insert(bundle.name.as_str()) {
      return Err(RepoError::DuplicateBundle {
        bundle: bundle.name.clone(),
      });
    }
  }

  Ok(())
}

/// Directed graph with an edge from each dependency to its dependents.
#[derive(Debug, Default)]
pub struct BundleGraph {
  graph: DiGraph<String, ()>,
  nodes: HashMap<String, NodeIndex>,
}

impl BundleGraph {
  /// Validate `bundles` and build their graph.
  pub fn build(bundles: &[Bundle]) -> Result<Self, RepoError> {
    validate_bundles(bundles)?;

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for bundle in bundles {
      let idx = graph.add_node(bundle.name.clone());
      nodes.insert(bundle.name.clone(), idx);
    }

    for bundle in bundles {
      let dependent = nodes[&bundle.name];
      for dep in &bundle.deps {
        if let Input::Local(name) = dep
          && let Some(&dependency) = nodes.get(name)
        {
          graph.update_edge(dependency, dependent, ());
        }
      }
    }

    Ok(Self { graph, nodes })
  }

  /// Bundle names with every bundle after all of its local dependencies.
  pub fn sorted(&self) -> Result<Vec<String>, RepoError> {
    let order = toposort(&self.graph, None).map_err(|cycle| RepoError::CycleDetected {
      bundle: self.graph[cycle.node_id()].clone(),
    })?;
    Ok(order.into_iter().map(|idx| self.graph[idx].clone()).collect())
  }

  /// Every bundle `name` depends on, directly or not, in dependency order.
  pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>, RepoError> {
    let start = *self.nodes.get(name).ok_or_else(|| RepoError::UnknownBundle {
      name: name.to_string(),
    })?;

    let reversed = Reversed(&self.graph);
    let mut dfs = Dfs::new(reversed, start);
    let mut reachable = HashSet::new();
    while let Some(idx) = dfs.next(reversed) {
      if idx != start {
        reachable.insert(self.graph[idx].clone());
      }
    }

    Ok(
      self
        .sorted()?
        .into_iter()
        .filter(|n| reachable.contains(n))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;
  use crate::repo::compile::BundleFs;

  fn bundle(name: &str, deps: &[&str]) -> Bundle {
    Bundle {
      name: name.to_string(),
      dir: PathBuf::from("/repo").join(name),
      rel_dir: PathBuf::from(name),
      deps: deps.iter().map(|d| Input::local(*d)).collect(),
      plugins: Vec::new(),
      publish: None,
      fs: BundleFs::new(PathBuf::from("/repo").join(name)),
    }
  }

  fn position(order: &[String], name: &str) -> usize {
    order.iter().position(|n| n == name).unwrap()
  }

  mod validate_bundles {
    use super::*;

    #[test]
    fn declaration_order_is_accepted() {
      let bundles = vec![bundle("b", &[]), bundle("a", &["b"])];
      assert!(validate_bundles(&bundles).is_ok());
    }

    #[test]
    fn dependency_declared_later_is_rejected() {
      let bundles = vec![bundle("a", &["b"]), bundle("b", &[])];

      let result = validate_bundles(&bundles);

      assert!(matches!(
        result,
        Err(RepoError::UndeclaredLocalDependency { bundle, dependency }) if bundle == "a" && dependency == "b"
      ));
    }

    #[test]
    fn self_dependency_is_rejected() {
      let result = validate_bundles(&[bundle("a", &["a"])]);
      assert!(matches!(result, Err(RepoError::UndeclaredLocalDependency { .. })));
    }

    #[test]
    fn registry_dependencies_are_ignored() {
      let mut api = bundle("api", &[]);
      api.deps.push(Input::registry("acme", "types", None));
      assert!(validate_bundles(&[api]).is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
      let result = validate_bundles(&[bundle("a", &[]), bundle("a", &[])]);
      assert!(matches!(result, Err(RepoError::DuplicateBundle { bundle }) if bundle == "a"));
    }
  }

  mod bundle_graph {
    use super::*;

    #[test]
    fn sorted_respects_every_edge() {
      let bundles = vec![
        bundle("base", &[]),
        bundle("left", &["base"]),
        bundle("right", &["base"]),
        bundle("top", &["left", "right"]),
        bundle("alone", &[]),
      ];
      let graph = BundleGraph::build(&bundles).unwrap();

      let order = graph.sorted().unwrap();

      assert_eq!(order.len(), 5);
      for b in &bundles {
        for dep in &b.deps {
          if let Input::Local(dep) = dep {
            assert!(position(&order, dep) < position(&order, &b.name));
          }
        }
      }
    }

    #[test]
    fn dependencies_are_transitive_and_ordered() {
      let bundles = vec![
        bundle("base", &[]),
        bundle("mid", &["base"]),
        bundle("top", &["mid"]),
        bundle("other", &[]),
      ];
      let graph = BundleGraph::build(&bundles).unwrap();

      assert_eq!(graph.dependencies_of("top").unwrap(), vec!["base", "mid"]);
      assert!(graph.dependencies_of("base").unwrap().is_empty());
    }

    #[test]
    fn unknown_bundle_is_reported() {
      let graph = BundleGraph::build(&[bundle("a", &[])]).unwrap();
      assert!(matches!(graph.dependencies_of("zzz"), Err(RepoError::UnknownBundle { .. })));
    }
  }
}
