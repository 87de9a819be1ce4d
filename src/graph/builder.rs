//! Dependency graph construction.
//!
//! Edges are the union of explicit `depends_on` entries and the references
//! found in a resource's inputs. The evaluation order is a topological sort
//! in which independent resources keep their declaration order, so plans stay
//! stable across runs.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::config::ResourceDefinition;
use crate::error::GraphError;

use super::resolver::ReferenceResolver;

/// Builds a [`ResourceGraph`] from resource definitions.
#[derive(Debug, Default)]
pub struct GraphBuilder;

/// A validated, acyclic resource graph.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    resources: Vec<ResourceDefinition>,
    index: HashMap<String, usize>,
    /// Indices each resource depends on.
    dependencies: Vec<BTreeSet<usize>>,
    /// Indices depending on each resource.
    dependents: Vec<BTreeSet<usize>>,
    /// Evaluation order as declaration indices.
    order: Vec<usize>,
}

impl GraphBuilder {
    /// Creates a new builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the graph and computes the evaluation order.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate ids, dependencies on unknown ids, or
    /// a cycle (reported with its full path).
    pub fn build(&self, definitions: &[ResourceDefinition]) -> Result<ResourceGraph, GraphError> {
        let mut index = HashMap::with_capacity(definitions.len());
        for (i, definition) in definitions.iter().enumerate() {
            if index.insert(definition.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateId {
                    logical_id: definition.id.clone(),
                });
            }
        }

        let mut dependencies = vec![BTreeSet::new(); definitions.len()];
        let mut dependents = vec![BTreeSet::new(); definitions.len()];

        for (i, definition) in definitions.iter().enumerate() {
            ReferenceResolver::check_self_reference(definition)?;

            let referenced = ReferenceResolver::extract_references(definition)
                .into_iter()
                .map(|r| r.source_id);
            let edges: BTreeSet<String> = definition
                .depends_on
                .iter()
                .cloned()
                .chain(referenced)
                .collect();

            for dependency in edges {
                let Some(&j) = index.get(&dependency) else {
                    return Err(GraphError::UnknownDependency {
                        logical_id: definition.id.clone(),
                        dependency,
                    });
                };
                dependencies[i].insert(j);
                dependents[j].insert(i);
            }
        }

        let order = topological_order(&dependencies, &dependents).map_err(|cycle| {
            GraphError::CyclicReference {
                path: cycle
                    .into_iter()
                    .map(|i| definitions[i].id.clone())
                    .collect(),
            }
        })?;

        debug!("Built resource graph with {} node(s)", definitions.len());

        Ok(ResourceGraph {
            resources: definitions.to_vec(),
            index,
            dependencies,
            dependents,
            order,
        })
    }
}

/// Kahn's algorithm; the lowest ready index is emitted first.
///
/// On failure returns a cycle path whose first index is repeated at the end.
fn topological_order(
    dependencies: &[BTreeSet<usize>],
    dependents: &[BTreeSet<usize>],
) -> Result<Vec<usize>, Vec<usize>> {
    let mut remaining: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &dependent in &dependents[node] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == dependencies.len() {
        Ok(order)
    } else {
        Err(find_cycle(dependencies, &remaining))
    }
}

/// Walks unsorted nodes along their unsorted dependencies until one repeats.
///
/// Every unsorted node has at least one unsorted dependency, so the walk
/// always closes a loop.
fn find_cycle(dependencies: &[BTreeSet<usize>], remaining: &[usize]) -> Vec<usize> {
    let stuck = |i: usize| remaining[i] > 0;
    let Some(start) = (0..dependencies.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position = HashMap::from([(start, 0usize)]);
    let mut current = start;

    loop {
        let Some(next) = dependencies[current].iter().copied().find(|&d| stuck(d)) else {
            return path;
        };
        if let Some(&at) = position.get(&next) {
            let mut cycle = path.split_off(at);
            cycle.push(next);
            return cycle;
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

impl ResourceGraph {
    /// Returns the definition at a declaration index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ResourceDefinition> {
        self.resources.get(index)
    }

    /// Looks up a definition by logical id.
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&ResourceDefinition> {
        self.index.get(logical_id).map(|&i| &self.resources[i])
    }

    /// Returns the declaration index of a logical id.
    #[must_use]
    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.index.get(logical_id).copied()
    }

    /// Returns definitions in evaluation order.
    pub fn evaluation_order(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.order.iter().map(|&i| &self.resources[i])
    }

    /// Returns logical ids in evaluation order.
    #[must_use]
    pub fn evaluation_ids(&self) -> Vec<&str> {
        self.evaluation_order().map(|r| r.id.as_str()).collect()
    }

    /// Returns the logical ids a resource depends on.
    #[must_use]
    pub fn dependencies_of(&self, logical_id: &str) -> BTreeSet<&str> {
        self.neighbours(logical_id, &self.dependencies)
    }

    /// Returns the logical ids that depend on a resource.
    #[must_use]
    pub fn dependents_of(&self, logical_id: &str) -> BTreeSet<&str> {
        self.neighbours(logical_id, &self.dependents)
    }

    fn neighbours<'a>(&'a self, logical_id: &str, edges: &'a [BTreeSet<usize>]) -> BTreeSet<&'a str> {
        self.index
            .get(logical_id)
            .map(|&i| {
                edges[i]
                    .iter()
                    .map(|&j| self.resources[j].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputValue;

    fn node(id: &str) -> ResourceDefinition {
        ResourceDefinition::new(id, "thing")
    }

    fn refs(id: &str, source: &str) -> ResourceDefinition {
        node(id).with_input(
            format!("from_{source}"),
            InputValue::reference(source, "out"),
        )
    }

    #[test]
    fn test_independent_resources_keep_declaration_order() {
        let graph = GraphBuilder::new()
            .build(&[node("c"), node("a"), node("b")])
            .expect("acyclic");

        assert_eq!(graph.evaluation_ids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let graph = GraphBuilder::new()
            .build(&[
                refs("app", "db").with_dependency("net"),
                node("db"),
                node("net"),
                node("logs"),
            ])
            .expect("acyclic");

        assert_eq!(graph.evaluation_ids(), vec!["db", "net", "app", "logs"]);
        assert_eq!(graph.dependencies_of("app"), BTreeSet::from(["db", "net"]));
        assert_eq!(graph.dependents_of("db"), BTreeSet::from(["app"]));
    }

    #[test]
    fn test_cycle_names_every_node() {
        let err = GraphBuilder::new()
            .build(&[refs("a", "b"), refs("b", "c"), refs("c", "a"), node("d")])
            .expect_err("cycle");

        match err {
            GraphError::CyclicReference { path } => {
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        let err = GraphBuilder::new()
            .build(&[refs("entry", "x"), refs("x", "y"), refs("y", "x")])
            .expect_err("cycle");

        assert!(matches!(err, GraphError::CyclicReference { ref path } if path == &["x", "y", "x"]));
    }

    #[test]
    fn test_self_reference() {
        let err = GraphBuilder::new()
            .build(&[node("a").with_dependency("a")])
            .expect_err("self loop");

        assert!(matches!(err, GraphError::CyclicReference { ref path } if path == &["a", "a"]));
    }

    #[test]
    fn test_unknown_and_duplicate_ids() {
        let builder = GraphBuilder::new();

        assert!(matches!(
            builder.build(&[refs("a", "ghost")]),
            Err(GraphError::UnknownDependency { ref dependency, .. }) if dependency == "ghost"
        ));
        assert!(matches!(
            builder.build(&[node("a"), node("a")]),
            Err(GraphError::DuplicateId { .. })
        ));
    }
}
