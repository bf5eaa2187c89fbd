//! FUNCTION node config

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::NodeError;
use crate::execution::{ExecutableNode, NodeExecutionContext, NodeInputs, NodeOutputs, NodeServices};

/// A named function invocation. The function body runs outside the core;
/// executing the node hands back its resolved arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfig {
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: NodeInputs,
}

#[async_trait]
impl ExecutableNode for FunctionConfig {
    fn inputs(&self) -> NodeInputs {
        self.arguments.clone()
    }

    async fn execute(
        &self,
        _ctx: &NodeExecutionContext,
        inputs: &NodeInputs,
        _services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError> {
        Ok(inputs.clone())
    }
}
