//! Collaborator doubles for unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::execution::{NodeInputs, NodeServices};
use crate::services::{
    DeleteEntitiesResult, Entity, EntityService, HttpClient, HttpClientError, OutboundRequest,
    OutboundResponse, SaveEntityRequest, ServiceError,
};
use crate::url_guard::UrlGuard;

/// Entity service with no entities
pub(crate) struct EmptyEntities;

#[async_trait]
impl EntityService for EmptyEntities {
    async fn save_entity(
        &self,
        _workspace_id: Uuid,
        _entity_type_id: Uuid,
        _request: SaveEntityRequest,
    ) -> Result<Entity, ServiceError> {
        Err(ServiceError::Invalid("no entity store".to_string()))
    }

    async fn get_entity(&self, entity_id: Uuid) -> Result<Entity, ServiceError> {
        Err(ServiceError::NotFound(entity_id))
    }

    async fn delete_entities(
        &self,
        _workspace_id: Uuid,
        _ids: &[Uuid],
    ) -> Result<DeleteEntitiesResult, ServiceError> {
        Ok(DeleteEntitiesResult::default())
    }
}

/// Entity service backed by a map
#[derive(Default)]
pub(crate) struct MemoryEntities {
    pub(crate) entities: Mutex<HashMap<Uuid, Entity>>,
    /// Returned by every delete instead of deleting
    pub(crate) delete_error: Option<String>,
}

impl MemoryEntities {
    pub(crate) fn insert(&self, workspace_id: Uuid, payload: Map<String, Value>) -> Entity {
        let now = Utc::now();
        let entity = Entity {
            id: Uuid::now_v7(),
            workspace_id,
            type_id: Uuid::now_v7(),
            payload,
            created_at: now,
            updated_at: now,
        };
        self.entities.lock().insert(entity.id, entity.clone());
        entity
    }
}

#[async_trait]
impl EntityService for MemoryEntities {
    async fn save_entity(
        &self,
        workspace_id: Uuid,
        entity_type_id: Uuid,
        request: SaveEntityRequest,
    ) -> Result<Entity, ServiceError> {
        let now = Utc::now();
        let entity = Entity {
            id: request.id.unwrap_or_else(Uuid::now_v7),
            workspace_id,
            type_id: entity_type_id,
            payload: request.payload,
            created_at: now,
            updated_at: now,
        };
        self.entities.lock().insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn get_entity(&self, entity_id: Uuid) -> Result<Entity, ServiceError> {
        self.entities
            .lock()
            .get(&entity_id)
            .cloned()
            .ok_or(ServiceError::NotFound(entity_id))
    }

    async fn delete_entities(
        &self,
        _workspace_id: Uuid,
        ids: &[Uuid],
    ) -> Result<DeleteEntitiesResult, ServiceError> {
        if let Some(error) = &self.delete_error {
            return Ok(DeleteEntitiesResult {
                error: Some(error.clone()),
                updated_entities: None,
            });
        }
        let mut entities = self.entities.lock();
        for id in ids {
            entities.remove(id);
        }
        let impacted: Vec<Entity> = entities.values().cloned().collect();
        let mut updated = HashMap::new();
        if !impacted.is_empty() {
            updated.insert(Uuid::now_v7(), impacted);
        }
        Ok(DeleteEntitiesResult {
            error: None,
            updated_entities: Some(updated),
        })
    }
}

/// HTTP client that refuses every request
pub(crate) struct OfflineHttp;

#[async_trait]
impl HttpClient for OfflineHttp {
    async fn send(&self, _request: OutboundRequest) -> Result<OutboundResponse, HttpClientError> {
        Err(HttpClientError::Connect("offline".to_string()))
    }
}

/// HTTP client that never answers within a test's lifetime
pub(crate) struct SlowHttp;

#[async_trait]
impl HttpClient for SlowHttp {
    async fn send(&self, _request: OutboundRequest) -> Result<OutboundResponse, HttpClientError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(HttpClientError::Timeout)
    }
}

/// Records requests and answers with a fixed status
pub(crate) struct RecordingHttp {
    status: u16,
    pub(crate) requests: Mutex<Vec<OutboundRequest>>,
}

impl RecordingHttp {
    pub(crate) fn with_status(status: u16) -> Arc<Self> {
        Arc::new(Self {
            status,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl HttpClient for RecordingHttp {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HttpClientError> {
        self.requests.lock().push(request);
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Ok(OutboundResponse {
            status: self.status,
            headers,
            body: json!({"ok": self.status < 400}),
        })
    }
}

pub(crate) fn null_services() -> NodeServices {
    services(Arc::new(EmptyEntities), Arc::new(OfflineHttp))
}

/// Services over the given doubles, resolving no hostnames
pub(crate) fn services(
    entities: Arc<dyn EntityService>,
    http: Arc<dyn HttpClient>,
) -> NodeServices {
    NodeServices::new(entities, http).with_url_guard(UrlGuard::literal_only())
}

pub(crate) fn object(value: Value) -> NodeInputs {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}
