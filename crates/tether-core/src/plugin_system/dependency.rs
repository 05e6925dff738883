use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

/// Error that can occur when resolving dependencies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    /// A dependency's descriptor could not be found or parsed
    #[error("Descriptor for dependency '{dependency}' of '{plugin_id}' cannot be resolved: {reason}")]
    MissingDescriptor {
        plugin_id: String,
        dependency: String,
        reason: String,
    },

    /// The dependency's descriptor exists but cannot run on this framework
    #[error("Dependency '{dependency}' of '{plugin_id}' is not usable: {reason}")]
    IncompatibleDependency {
        plugin_id: String,
        dependency: String,
        reason: String,
    },

    /// Dependency cycle detected
    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// Unload refused while other loaded plugins still need this one
    #[error("Plugin '{plugin_id}' is required by loaded plugins: {}", .dependents.join(", "))]
    HasDependents {
        plugin_id: String,
        dependents: Vec<String>,
    },

    /// A dependency failed while being brought up for this plugin
    #[error("Failed to {operation} dependency: {dependency}")]
    DependencyFailed {
        plugin_id: String,
        dependency: String,
        operation: &'static str,
    },
}

/// Directed graph of plugin ids to the ids they depend on.
///
/// Edges that point at ids not present in the graph are ignored when
/// ordering, which lets callers restrict the graph to e.g. loaded plugins.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I, S>(&mut self, plugin_id: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edges.insert(
            plugin_id.to_string(),
            dependencies.into_iter().map(Into::into).collect(),
        );
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.edges.contains_key(plugin_id)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Ids in the graph that declare a dependency on `plugin_id`, sorted.
    pub fn dependents_of(&self, plugin_id: &str) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(id, deps)| id.as_str() != plugin_id && deps.iter().any(|d| d == plugin_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Dependency-respecting order of `roots` and everything they reach.
    ///
    /// Post-order depth-first traversal: each id appears after all of its
    /// dependencies, and each id appears once. A cycle is reported with the
    /// path that closes it.
    pub fn resolve_order<'a, I>(&self, roots: I) -> Result<Vec<String>, DependencyError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = Vec::new();
        for root in roots {
            self.visit(root, &mut visiting, &mut visited, &mut order)?;
        }
        Ok(order)
    }

    /// Order over every id in the graph, roots taken in id order.
    pub fn resolve_all(&self) -> Result<Vec<String>, DependencyError> {
        self.resolve_order(self.edges.keys().map(String::as_str))
    }

    fn visit(
        &self,
        plugin_id: &str,
        visiting: &mut Vec<String>,
        visited: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), DependencyError> {
        if visited.contains(plugin_id) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|id| id == plugin_id) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(plugin_id.to_string());
            return Err(DependencyError::CyclicDependency(cycle));
        }

        visiting.push(plugin_id.to_string());
        if let Some(deps) = self.edges.get(plugin_id) {
            for dep in deps.iter().filter(|d| self.edges.contains_key(d.as_str())) {
                self.visit(dep, visiting, visited, order)?;
            }
        }
        visiting.pop();

        visited.insert(plugin_id.to_string());
        order.push(plugin_id.to_string());
        Ok(())
    }
}
