//! Workflow definition model
//!
//! A [`WorkflowDefinition`] owns immutable published versions. Each version is
//! a [`WorkflowGraph`] of [`WorkflowNode`]s connected by [`WorkflowEdge`]s.

mod definition;
mod graph;
mod node;

use uuid::Uuid;

use crate::nodes::NodeCategory;

pub use definition::{WorkflowDefinition, WorkflowDefinitionStatus, WorkflowDefinitionVersion};
pub use graph::{WorkflowEdge, WorkflowGraph};
pub use node::WorkflowNode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("edge not found: {0}")]
    EdgeNotFound(Uuid),

    #[error("node already exists: {0}")]
    DuplicateNode(Uuid),

    #[error("a node named '{0}' already exists in this graph")]
    DuplicateNodeName(String),

    #[error("edge {edge_id} references missing node {node_id}")]
    DanglingEdge { edge_id: Uuid, node_id: Uuid },

    #[error("node {0} cannot connect to itself")]
    SelfLoop(Uuid),

    #[error("edge {from} -> {to} already exists")]
    DuplicateEdge { from: Uuid, to: Uuid },

    #[error("edge {from} -> {to} would create a cycle")]
    WouldCreateCycle { from: Uuid, to: Uuid },

    #[error("graph contains a cycle through node {0}")]
    CycleDetected(Uuid),

    #[error("workspace mismatch: expected {expected}, got {actual}")]
    WorkspaceMismatch { expected: Uuid, actual: Uuid },

    #[error("workflow definition mismatch: expected {expected}, got {actual}")]
    DefinitionMismatch { expected: Uuid, actual: Uuid },

    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: i32, actual: i32 },

    #[error("node category cannot change from {expected} to {actual}")]
    CategoryMismatch {
        expected: NodeCategory,
        actual: NodeCategory,
    },
}
