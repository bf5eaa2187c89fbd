//! ACTION node configs and the entity CRUD actions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::http::HttpRequestConfig;
use super::io::{required_object, required_uuid, to_inputs, to_outputs};
use super::{decode_body, NodeCategory};
use crate::datastore::{CreateEntityOutput, DeleteEntityOutput, QueryEntityOutput, UpdateEntityOutput};
use crate::error::{ConfigError, NodeError};
use crate::execution::{ExecutableNode, NodeExecutionContext, NodeInputs, NodeOutputs, NodeServices};
use crate::services::SaveEntityRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntityConfig {
    /// Entity type id, or a template resolving to one
    pub entity_type_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntityConfig {
    pub entity_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEntityConfig {
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEntityConfig {
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionConfig {
    CreateEntity(CreateEntityConfig),
    UpdateEntity(UpdateEntityConfig),
    DeleteEntity(DeleteEntityConfig),
    QueryEntity(QueryEntityConfig),
    HttpRequest(HttpRequestConfig),
}

impl ActionConfig {
    pub const fn sub_type(&self) -> &'static str {
        match self {
            Self::CreateEntity(_) => "CREATE_ENTITY",
            Self::UpdateEntity(_) => "UPDATE_ENTITY",
            Self::DeleteEntity(_) => "DELETE_ENTITY",
            Self::QueryEntity(_) => "QUERY_ENTITY",
            Self::HttpRequest(_) => "HTTP_REQUEST",
        }
    }

    pub(super) fn decode(sub_type: &str, body: Value) -> Result<Self, ConfigError> {
        let category = NodeCategory::Action;
        match sub_type {
            "CREATE_ENTITY" => decode_body(category, sub_type, body).map(Self::CreateEntity),
            "UPDATE_ENTITY" => decode_body(category, sub_type, body).map(Self::UpdateEntity),
            "DELETE_ENTITY" => decode_body(category, sub_type, body).map(Self::DeleteEntity),
            "QUERY_ENTITY" => decode_body(category, sub_type, body).map(Self::QueryEntity),
            "HTTP_REQUEST" => decode_body(category, sub_type, body).map(Self::HttpRequest),
            _ => Err(ConfigError::UnknownSubType {
                category,
                sub_type: sub_type.to_string(),
            }),
        }
    }

    pub(super) fn to_body(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::CreateEntity(config) => serde_json::to_value(config),
            Self::UpdateEntity(config) => serde_json::to_value(config),
            Self::DeleteEntity(config) => serde_json::to_value(config),
            Self::QueryEntity(config) => serde_json::to_value(config),
            Self::HttpRequest(config) => serde_json::to_value(config),
        }
    }
}

#[async_trait]
impl ExecutableNode for ActionConfig {
    fn inputs(&self) -> NodeInputs {
        match self {
            Self::CreateEntity(config) => to_inputs(config),
            Self::UpdateEntity(config) => to_inputs(config),
            Self::DeleteEntity(config) => to_inputs(config),
            Self::QueryEntity(config) => to_inputs(config),
            Self::HttpRequest(config) => config.inputs(),
        }
    }

    async fn execute(
        &self,
        ctx: &NodeExecutionContext,
        inputs: &NodeInputs,
        services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError> {
        match self {
            Self::CreateEntity(_) => create_entity(ctx, inputs, services).await,
            Self::UpdateEntity(_) => update_entity(ctx, inputs, services).await,
            Self::DeleteEntity(_) => delete_entity(ctx, inputs, services).await,
            Self::QueryEntity(_) => query_entity(ctx, inputs, services).await,
            Self::HttpRequest(config) => config.execute(ctx, inputs, services).await,
        }
    }
}

async fn create_entity(
    ctx: &NodeExecutionContext,
    inputs: &NodeInputs,
    services: &NodeServices,
) -> Result<NodeOutputs, NodeError> {
    let entity_type_id = required_uuid(inputs, "entityTypeId")?;
    let payload = required_object(inputs, "payload")?.clone();

    let entity = services
        .entities
        .save_entity(ctx.workspace_id, entity_type_id, SaveEntityRequest::create(payload))
        .await?;

    info!(entity_id = %entity.id, %entity_type_id, "created entity");
    to_outputs(&CreateEntityOutput {
        entity_id: entity.id,
        entity_type_id: entity.type_id,
        payload: entity.payload,
    })
}

async fn update_entity(
    ctx: &NodeExecutionContext,
    inputs: &NodeInputs,
    services: &NodeServices,
) -> Result<NodeOutputs, NodeError> {
    let entity_id = required_uuid(inputs, "entityId")?;
    let payload = required_object(inputs, "payload")?.clone();

    // The entity type is resolved from the stored entity, not from input
    let existing = services.entities.get_entity(entity_id).await?;
    let entity = services
        .entities
        .save_entity(
            ctx.workspace_id,
            existing.type_id,
            SaveEntityRequest::update(entity_id, payload),
        )
        .await?;

    info!(%entity_id, "updated entity");
    to_outputs(&UpdateEntityOutput {
        entity_id,
        updated: true,
        payload: entity.payload,
    })
}

async fn delete_entity(
    ctx: &NodeExecutionContext,
    inputs: &NodeInputs,
    services: &NodeServices,
) -> Result<NodeOutputs, NodeError> {
    let entity_id = required_uuid(inputs, "entityId")?;

    let result = services
        .entities
        .delete_entities(ctx.workspace_id, &[entity_id])
        .await?;

    if let Some(error) = result.error {
        return Err(NodeError::illegal_state(format!(
            "Failed to delete entity {entity_id}: {error}"
        )));
    }

    let impacted_entities = result.impacted_count();
    info!(%entity_id, impacted_entities, "deleted entity");
    to_outputs(&DeleteEntityOutput {
        entity_id,
        deleted: true,
        impacted_entities,
    })
}

async fn query_entity(
    ctx: &NodeExecutionContext,
    inputs: &NodeInputs,
    services: &NodeServices,
) -> Result<NodeOutputs, NodeError> {
    let entity_id = required_uuid(inputs, "entityId")?;
    let entity = services.entities.get_entity(entity_id).await?;

    if entity.workspace_id != ctx.workspace_id {
        return Err(NodeError::security(format!(
            "Entity {entity_id} does not belong to workspace {}",
            ctx.workspace_id
        )));
    }

    debug!(%entity_id, "queried entity");
    to_outputs(&QueryEntityOutput::from(&entity))
}
