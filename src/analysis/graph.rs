use std::collections::{BTreeSet, HashMap};
use petgraph::algo::{is_cyclic_directed, kosaraju_scc, toposort};
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use tracing::debug;
use crate::error::{PgdeltaError, Result};
use crate::schema::SchemaSnapshot;

/// Schema-level dependency graph.
///
/// An edge `b -> a` means a table in `a` has a foreign key into `b`, so `b`
/// must exist before `a` and can only be dropped after it.
#[derive(Debug, Default)]
pub struct SchemaGraph {
    graph: Graph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl SchemaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every snapshot taking part in a run.
    ///
    /// Foreign keys are read from both sides, so a schema that is about to be
    /// dropped still orders after the schemas it references.
    pub fn build<'a>(snapshots: impl IntoIterator<Item = &'a SchemaSnapshot>) -> Self {
        let mut graph = Self::new();
        let mut edges: BTreeSet<(String, String)> = BTreeSet::new();

        for snapshot in snapshots {
            graph.add_schema(&snapshot.schema_name);
            for table in snapshot.tables.values() {
                for fk in &table.foreign_keys {
                    if fk.target_schema != snapshot.schema_name {
                        edges.insert((snapshot.schema_name.clone(), fk.target_schema.clone()));
                    }
                }
            }
        }

        for (dependent, dependency) in edges {
            debug!("  Schema edge: {} -> {}", dependency, dependent);
            graph.add_dependency(&dependent, &dependency);
        }

        debug!("Built schema graph with {} schemas", graph.schema_count());
        graph
    }

    /// Add a schema node
    pub fn add_schema(&mut self, schema: &str) -> NodeIndex {
        if let Some(&node_id) = self.node_map.get(schema) {
            node_id
        } else {
            let node_id = self.graph.add_node(schema.to_string());
            self.node_map.insert(schema.to_string(), node_id);
            node_id
        }
    }

    /// Record that `dependent` references `dependency`
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) {
        let from = self.add_schema(dependency);
        let to = self.add_schema(dependent);
        self.graph.update_edge(from, to, ());
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Schemas in dependency order (referenced schemas first).
    ///
    /// Schemas are ranked by their longest chain of dependencies, then by
    /// name, so plans are reproducible.
    pub fn creation_order(&self) -> Result<Vec<String>> {
        let sorted = toposort(&self.graph, None)
            .map_err(|_| PgdeltaError::SchemaCycle(self.describe_cycle()))?;

        let mut depth: HashMap<NodeIndex, usize> = HashMap::with_capacity(sorted.len());
        for &node in &sorted {
            let level = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|dependency| depth.get(&dependency))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, level);
        }

        let mut ranked: Vec<(usize, &str)> = sorted
            .iter()
            .map(|node| (depth[node], self.graph[*node].as_str()))
            .collect();
        ranked.sort_unstable();
        let order: Vec<String> = ranked.into_iter().map(|(_, name)| name.to_string()).collect();

        debug!("Schema creation order: {:?}", order);
        Ok(order)
    }

    /// Reverse of [`creation_order`](Self::creation_order): dependents first.
    pub fn deletion_order(&self) -> Result<Vec<String>> {
        let mut order = self.creation_order()?;
        order.reverse();
        Ok(order)
    }

    /// Schemas the given schema references.
    pub fn dependencies_of(&self, schema: &str) -> Vec<String> {
        self.neighbors(schema, Direction::Incoming)
    }

    /// Schemas that reference the given schema.
    pub fn dependents_of(&self, schema: &str) -> Vec<String> {
        self.neighbors(schema, Direction::Outgoing)
    }

    fn neighbors(&self, schema: &str, direction: Direction) -> Vec<String> {
        let Some(&node_id) = self.node_map.get(schema) else {
            return vec![];
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(node_id, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        names.sort();
        names
    }

    pub fn schema_count(&self) -> usize {
        self.graph.node_count()
    }

    fn describe_cycle(&self) -> String {
        let mut cycles: Vec<String> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut names: Vec<&str> = component.iter().map(|&n| self.graph[n].as_str()).collect();
                names.sort_unstable();
                names.join(" <-> ")
            })
            .collect();
        cycles.sort();
        cycles.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDefinition, ForeignKeyDefinition, TableDefinition};

    fn schema_referencing(name: &str, targets: &[&str]) -> SchemaSnapshot {
        let mut table = TableDefinition::new("t").with_column(ColumnDefinition::new("ref_id", "integer"));
        for target in targets {
            table = table.with_foreign_key(ForeignKeyDefinition::new(
                "t",
                vec!["ref_id".into()],
                *target,
                "t",
                vec!["id".into()],
            ));
        }
        SchemaSnapshot::new(name).with_table(table)
    }

    #[test]
    fn test_creation_order_follows_foreign_keys() {
        let snapshots = vec![
            schema_referencing("billing", &["auth"]),
            schema_referencing("auth", &[]),
            schema_referencing("app", &["billing", "auth"]),
        ];
        let graph = SchemaGraph::build(&snapshots);

        assert!(!graph.has_cycles());
        assert_eq!(graph.creation_order().unwrap(), vec!["auth", "billing", "app"]);
        assert_eq!(graph.deletion_order().unwrap(), vec!["app", "billing", "auth"]);
        assert_eq!(graph.dependencies_of("app"), vec!["auth", "billing"]);
        assert_eq!(graph.dependents_of("auth"), vec!["app", "billing"]);
    }

    #[test]
    fn test_independent_schemas_sorted_by_name() {
        let snapshots = vec![schema_referencing("zeta", &[]), schema_referencing("alpha", &[])];
        let graph = SchemaGraph::build(&snapshots);
        assert_eq!(graph.creation_order().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_creation_order_ranks_by_depth_then_name() {
        let snapshots = vec![
            schema_referencing("app", &["billing"]),
            schema_referencing("billing", &["core"]),
            schema_referencing("zeta", &[]),
            schema_referencing("core", &[]),
            schema_referencing("audit", &["core"]),
        ];
        let graph = SchemaGraph::build(&snapshots);
        assert_eq!(
            graph.creation_order().unwrap(),
            vec!["core", "zeta", "audit", "billing", "app"]
        );

        // Input order does not matter.
        let mut reversed = snapshots.clone();
        reversed.reverse();
        assert_eq!(
            SchemaGraph::build(&reversed).creation_order().unwrap(),
            graph.creation_order().unwrap()
        );
    }

    #[test]
    fn test_self_references_are_not_edges() {
        let snapshots = vec![schema_referencing("public", &["public"])];
        let graph = SchemaGraph::build(&snapshots);
        assert!(!graph.has_cycles());
        assert_eq!(graph.creation_order().unwrap(), vec!["public"]);
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        let snapshots = vec![schema_referencing("a", &["b"]), schema_referencing("b", &["a"])];
        let graph = SchemaGraph::build(&snapshots);

        assert!(graph.has_cycles());
        match graph.creation_order() {
            Err(PgdeltaError::SchemaCycle(details)) => assert_eq!(details, "a <-> b"),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_target_schema_becomes_node() {
        let snapshots = vec![schema_referencing("app", &["external"])];
        let graph = SchemaGraph::build(&snapshots);
        assert_eq!(graph.creation_order().unwrap(), vec!["external", "app"]);
    }
}
