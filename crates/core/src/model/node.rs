use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::GraphError;
use crate::nodes::{NodeCategory, NodeConfig};

/// A node in a workflow graph.
///
/// Config is immutable per version: [`WorkflowNode::with_config`] derives a
/// new version and leaves this one untouched. Name and description are
/// metadata and may change in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// Stable human key, shared by every version of the node
    pub key: String,
    /// Name used by `{{ steps.<name> }}`
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: i32,
    /// Node this version was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,
    pub config: NodeConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowNode {
    pub fn new(
        workspace_id: Uuid,
        key: impl Into<String>,
        name: impl Into<String>,
        config: NodeConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workspace_id,
            key: key.into(),
            name: name.into(),
            description: None,
            version: 1,
            source_id: None,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(&self) -> NodeCategory {
        self.config.category()
    }

    /// Derive the next version of this node carrying `config`.
    ///
    /// The category cannot change across versions.
    pub fn with_config(&self, config: NodeConfig) -> Result<Self, GraphError> {
        if config.category() != self.category() {
            return Err(GraphError::CategoryMismatch {
                expected: self.category(),
                actual: config.category(),
            });
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            workspace_id: self.workspace_id,
            key: self.key.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version + 1,
            source_id: Some(self.id),
            config,
            created_at: now,
            updated_at: now,
        })
    }

    /// Update metadata in place
    pub fn rename(&mut self, name: impl Into<String>, description: Option<String>) {
        self.name = name.into();
        self.description = description;
        self.updated_at = Utc::now();
    }
}
