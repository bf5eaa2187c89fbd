use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GraphError, WorkflowGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowDefinitionStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

/// Immutable snapshot of a published graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinitionVersion {
    pub id: Uuid,
    pub workflow_definition_id: Uuid,
    pub version: i32,
    pub node_ids: Vec<Uuid>,
    pub edge_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: WorkflowDefinitionStatus,
    /// 0 until the first publish
    pub current_version: i32,
    versions: Vec<WorkflowDefinitionVersion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(workspace_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workspace_id,
            name: name.into(),
            description: None,
            status: WorkflowDefinitionStatus::Draft,
            current_version: 0,
            versions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Number the next published version will get
    pub fn next_version(&self) -> i32 {
        self.current_version + 1
    }

    /// Publish `graph` as the next version
    pub fn publish(&mut self, graph: &WorkflowGraph) -> Result<&WorkflowDefinitionVersion, GraphError> {
        if graph.workflow_definition_id != self.id {
            return Err(GraphError::DefinitionMismatch {
                expected: self.id,
                actual: graph.workflow_definition_id,
            });
        }
        if graph.workspace_id != self.workspace_id {
            return Err(GraphError::WorkspaceMismatch {
                expected: self.workspace_id,
                actual: graph.workspace_id,
            });
        }
        if graph.version != self.next_version() {
            return Err(GraphError::VersionMismatch {
                expected: self.next_version(),
                actual: graph.version,
            });
        }
        graph.validate()?;

        let version = WorkflowDefinitionVersion {
            id: Uuid::now_v7(),
            workflow_definition_id: self.id,
            version: graph.version,
            node_ids: graph.nodes().map(|node| node.id).collect(),
            edge_ids: graph.edges().map(|edge| edge.id).collect(),
            created_at: Utc::now(),
        };
        self.current_version = version.version;
        self.updated_at = version.created_at;
        self.versions.push(version);
        Ok(&self.versions[self.versions.len() - 1])
    }

    pub fn version(&self, version: i32) -> Option<&WorkflowDefinitionVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn current(&self) -> Option<&WorkflowDefinitionVersion> {
        self.version(self.current_version)
    }

    pub fn versions(&self) -> &[WorkflowDefinitionVersion] {
        &self.versions
    }

    pub fn set_status(&mut self, status: WorkflowDefinitionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
