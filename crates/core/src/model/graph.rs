use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GraphError, WorkflowNode};
use crate::nodes::{NodeCategory, NodeConfig};

/// Directed edge between two nodes of the same graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WorkflowEdge {
    pub fn new(workspace_id: Uuid, source_node_id: Uuid, target_node_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            workspace_id,
            source_node_id,
            target_node_id,
            label: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    fn touches(&self, node_id: Uuid) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

/// DAG of nodes and edges for one workflow version.
///
/// Referential integrity is enforced here: edges always connect nodes of this
/// graph, and removing a node removes its edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub workflow_definition_id: Uuid,
    pub workspace_id: Uuid,
    pub version: i32,
    nodes: BTreeMap<Uuid, WorkflowNode>,
    edges: BTreeMap<Uuid, WorkflowEdge>,
}

impl WorkflowGraph {
    pub fn new(workspace_id: Uuid, workflow_definition_id: Uuid, version: i32) -> Self {
        Self {
            workflow_definition_id,
            workspace_id,
            version,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn add_node(&mut self, node: WorkflowNode) -> Result<Uuid, GraphError> {
        self.check_workspace(node.workspace_id)?;
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        if self.node_by_name(&node.name).is_some() {
            return Err(GraphError::DuplicateNodeName(node.name));
        }
        let id = node.id;
        self.nodes.insert(id, node);
        Ok(id)
    }

    pub fn add_edge(&mut self, edge: WorkflowEdge) -> Result<Uuid, GraphError> {
        self.check_workspace(edge.workspace_id)?;
        let (source, target) = (edge.source_node_id, edge.target_node_id);
        for node_id in [source, target] {
            if !self.nodes.contains_key(&node_id) {
                return Err(GraphError::NodeNotFound(node_id));
            }
        }
        if source == target {
            return Err(GraphError::SelfLoop(source));
        }
        if self
            .edges()
            .any(|e| e.source_node_id == source && e.target_node_id == target)
        {
            return Err(GraphError::DuplicateEdge {
                from: source,
                to: target,
            });
        }
        if has_path_connecting(&self.digraph(), target, source, None) {
            return Err(GraphError::WouldCreateCycle {
                from: source,
                to: target,
            });
        }

        let id = edge.id;
        self.edges.insert(id, edge);
        Ok(id)
    }

    /// Remove a node and every edge touching it, returning the removed edge ids
    pub fn remove_node(&mut self, node_id: Uuid) -> Result<(WorkflowNode, Vec<Uuid>), GraphError> {
        let node = self
            .nodes
            .remove(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let removed: Vec<Uuid> = self
            .edges
            .values()
            .filter(|edge| edge.touches(node_id))
            .map(|edge| edge.id)
            .collect();
        for edge_id in &removed {
            self.edges.remove(edge_id);
        }
        Ok((node, removed))
    }

    /// Mark an edge deleted. It stays stored but no longer takes part in traversal.
    pub fn soft_delete_edge(&mut self, edge_id: Uuid) -> Result<(), GraphError> {
        let edge = self
            .edges
            .get_mut(&edge_id)
            .ok_or(GraphError::EdgeNotFound(edge_id))?;
        if edge.deleted_at.is_none() {
            edge.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Swap in a new version of a node.
    ///
    /// Edges touching the old version are soft-deleted and replaced by new
    /// edges to the new version, so edge ids captured by a published version
    /// keep their original endpoints. Returns the new node's id and the
    /// previous version.
    pub fn replace_node_version(
        &mut self,
        node_id: Uuid,
        config: NodeConfig,
    ) -> Result<(Uuid, WorkflowNode), GraphError> {
        let current = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let next = current.with_config(config)?;
        let next_id = next.id;

        let previous = self
            .nodes
            .remove(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        self.nodes.insert(next_id, next);

        let now = Utc::now();
        let repoint = |id: Uuid| if id == node_id { next_id } else { id };
        let mut replacements = Vec::new();
        for edge in self.edges.values_mut() {
            if edge.is_deleted() || !edge.touches(node_id) {
                continue;
            }
            edge.deleted_at = Some(now);
            let mut replacement = WorkflowEdge::new(
                edge.workspace_id,
                repoint(edge.source_node_id),
                repoint(edge.target_node_id),
            );
            replacement.label = edge.label.clone();
            replacements.push(replacement);
        }
        for edge in replacements {
            self.edges.insert(edge.id, edge);
        }
        Ok((next_id, previous))
    }

    pub fn node(&self, node_id: Uuid) -> Option<&WorkflowNode> {
        self.nodes.get(&node_id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&WorkflowNode> {
        self.nodes.values().find(|node| node.name == name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.values()
    }

    /// Active (not soft-deleted) edges
    pub fn edges(&self) -> impl Iterator<Item = &WorkflowEdge> {
        self.edges.values().filter(|edge| !edge.is_deleted())
    }

    pub fn edge(&self, edge_id: Uuid) -> Option<&WorkflowEdge> {
        self.edges.get(&edge_id)
    }

    pub fn successors(&self, node_id: Uuid) -> Vec<&WorkflowNode> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    pub fn predecessors(&self, node_id: Uuid) -> Vec<&WorkflowNode> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// TRIGGER nodes, where execution starts
    pub fn entry_nodes(&self) -> Vec<&WorkflowNode> {
        self.nodes
            .values()
            .filter(|node| node.category() == NodeCategory::Trigger)
            .collect()
    }

    /// Nodes ordered so every node comes after its predecessors
    pub fn topological_order(&self) -> Result<Vec<&WorkflowNode>, GraphError> {
        let order = toposort(&self.digraph(), None)
            .map_err(|cycle| GraphError::CycleDetected(cycle.node_id()))?;
        Ok(order.into_iter().filter_map(|id| self.nodes.get(&id)).collect())
    }

    /// Check integrity of a graph built outside [`WorkflowGraph::add_edge`] (e.g. deserialized)
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes.values() {
            self.check_workspace(node.workspace_id)?;
        }
        // soft-deleted edges may still point at retired node versions
        for edge in self.edges() {
            for node_id in [edge.source_node_id, edge.target_node_id] {
                if !self.nodes.contains_key(&node_id) {
                    return Err(GraphError::DanglingEdge {
                        edge_id: edge.id,
                        node_id,
                    });
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    fn neighbors(&self, node_id: Uuid, direction: Direction) -> Vec<&WorkflowNode> {
        let graph = self.digraph();
        if !graph.contains_node(node_id) {
            return Vec::new();
        }
        let neighbors: Vec<&WorkflowNode> = graph
            .neighbors_directed(node_id, direction)
            .filter_map(|id| self.nodes.get(&id))
            .collect();
        neighbors
    }

    fn digraph(&self) -> DiGraphMap<Uuid, ()> {
        let mut graph = DiGraphMap::new();
        for id in self.nodes.keys() {
            graph.add_node(*id);
        }
        for edge in self.edges() {
            graph.add_edge(edge.source_node_id, edge.target_node_id, ());
        }
        graph
    }

    fn check_workspace(&self, workspace_id: Uuid) -> Result<(), GraphError> {
        if workspace_id != self.workspace_id {
            return Err(GraphError::WorkspaceMismatch {
                expected: self.workspace_id,
                actual: workspace_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixture {
        graph: WorkflowGraph,
        workspace_id: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let workspace_id = Uuid::now_v7();
            Self {
                graph: WorkflowGraph::new(workspace_id, Uuid::now_v7(), 1),
                workspace_id,
            }
        }

        fn add(&mut self, name: &str, config: serde_json::Value) -> Uuid {
            let config = NodeConfig::from_json(config).unwrap();
            self.graph
                .add_node(WorkflowNode::new(self.workspace_id, name, name, config))
                .unwrap()
        }

        fn trigger(&mut self, name: &str) -> Uuid {
            self.add(name, json!({"type": "TRIGGER", "subType": "WEBHOOK"}))
        }

        fn function(&mut self, name: &str) -> Uuid {
            self.add(name, json!({"type": "FUNCTION", "functionName": name}))
        }

        fn connect(&mut self, source: Uuid, target: Uuid) -> Result<Uuid, GraphError> {
            self.graph
                .add_edge(WorkflowEdge::new(self.workspace_id, source, target))
        }
    }

    #[test]
    fn test_edges_require_existing_endpoints() {
        let mut f = Fixture::new();
        let a = f.trigger("a");
        let missing = Uuid::now_v7();
        assert!(matches!(
            f.connect(a, missing),
            Err(GraphError::NodeNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn test_rejects_cycles_self_loops_and_duplicates() {
        let mut f = Fixture::new();
        let a = f.trigger("a");
        let b = f.function("b");
        let c = f.function("c");
        f.connect(a, b).unwrap();
        f.connect(b, c).unwrap();

        assert!(matches!(f.connect(c, a), Err(GraphError::WouldCreateCycle { .. })));
        assert!(matches!(f.connect(b, b), Err(GraphError::SelfLoop(_))));
        assert!(matches!(f.connect(a, b), Err(GraphError::DuplicateEdge { .. })));
    }

    #[test]
    fn test_node_names_are_unique() {
        let mut f = Fixture::new();
        f.function("dup");
        let config = NodeConfig::from_json(json!({"type": "FUNCTION", "functionName": "x"})).unwrap();
        let err = f
            .graph
            .add_node(WorkflowNode::new(f.workspace_id, "other", "dup", config))
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNodeName(name) if name == "dup"));
    }

    #[test]
    fn test_remove_node_cascades_edges() {
        let mut f = Fixture::new();
        let a = f.trigger("a");
        let b = f.function("b");
        let c = f.function("c");
        let ab = f.connect(a, b).unwrap();
        let bc = f.connect(b, c).unwrap();
        let ac = f.connect(a, c).unwrap();

        let (removed, edges) = f.graph.remove_node(b).unwrap();
        assert_eq!(removed.id, b);
        assert_eq!(edges.len(), 2);
        assert!(edges.contains(&ab) && edges.contains(&bc));
        assert!(f.graph.edge(ac).is_some());
        assert!(f.graph.validate().is_ok());
    }

    #[test]
    fn test_soft_deleted_edges_are_ignored() {
        let mut f = Fixture::new();
        let a = f.trigger("a");
        let b = f.function("b");
        let ab = f.connect(a, b).unwrap();

        f.graph.soft_delete_edge(ab).unwrap();
        assert!(f.graph.edge(ab).unwrap().is_deleted());
        assert!(f.graph.successors(a).is_empty());
        // the pair can be connected again once the old edge is gone
        f.connect(a, b).unwrap();
        assert_eq!(f.graph.successors(a).len(), 1);
    }

    #[test]
    fn test_topological_order_and_entry_nodes() {
        let mut f = Fixture::new();
        let c = f.function("c");
        let b = f.function("b");
        let a = f.trigger("a");
        f.connect(a, b).unwrap();
        f.connect(b, c).unwrap();

        let order: Vec<Uuid> = f
            .graph
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(order, vec![a, b, c]);

        let entries: Vec<Uuid> = f.graph.entry_nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(entries, vec![a]);
        assert_eq!(f.graph.predecessors(c)[0].id, b);
    }

    #[test]
    fn test_replace_node_version_repoints_edges() {
        let mut f = Fixture::new();
        let a = f.trigger("a");
        let b = f.function("b");
        let c = f.function("c");
        f.connect(a, b).unwrap();
        f.connect(b, c).unwrap();

        let config = NodeConfig::from_json(json!({"type": "FUNCTION", "functionName": "b2"})).unwrap();
        let (next, previous) = f.graph.replace_node_version(b, config).unwrap();

        assert_eq!(previous.id, b);
        assert_eq!(previous.version, 1);
        assert!(f.graph.node(b).is_none());
        assert_eq!(f.graph.node(next).unwrap().source_id, Some(b));
        assert_eq!(f.graph.successors(a)[0].id, next);
        assert_eq!(f.graph.predecessors(c)[0].id, next);
        f.graph.validate().unwrap();
    }

    #[test]
    fn test_replaced_version_keeps_old_edges_intact() {
        let mut f = Fixture::new();
        let a = f.trigger("a");
        let b = f.function("b");
        let ab = f
            .graph
            .add_edge(WorkflowEdge::new(f.workspace_id, a, b).with_label("then"))
            .unwrap();
        let published = f.graph.edge(ab).unwrap().clone();

        let config = NodeConfig::from_json(json!({"type": "FUNCTION", "functionName": "b2"})).unwrap();
        let (next, _) = f.graph.replace_node_version(b, config).unwrap();

        let old = f.graph.edge(ab).unwrap();
        assert!(old.is_deleted());
        assert_eq!((old.source_node_id, old.target_node_id), (a, b));
        assert_eq!(old.id, published.id);

        let active: Vec<&WorkflowEdge> = f.graph.edges().collect();
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, ab);
        assert_eq!((active[0].source_node_id, active[0].target_node_id), (a, next));
        assert_eq!(active[0].label.as_deref(), Some("then"));
    }

    #[test]
    fn test_validate_detects_dangling_edges() {
        let mut f = Fixture::new();
        let a = f.trigger("a");
        let b = f.function("b");
        f.connect(a, b).unwrap();

        let mut value = serde_json::to_value(&f.graph).unwrap();
        value["nodes"]
            .as_object_mut()
            .unwrap()
            .remove(&b.to_string());
        let broken: WorkflowGraph = serde_json::from_value(value).unwrap();
        assert!(matches!(
            broken.validate(),
            Err(GraphError::DanglingEdge { node_id, .. }) if node_id == b
        ));
    }

    #[test]
    fn test_workspace_isolation() {
        let mut f = Fixture::new();
        let config = NodeConfig::from_json(json!({"type": "FUNCTION", "functionName": "x"})).unwrap();
        let foreign = WorkflowNode::new(Uuid::now_v7(), "x", "x", config);
        assert!(matches!(
            f.graph.add_node(foreign),
            Err(GraphError::WorkspaceMismatch { .. })
        ));
    }
}
