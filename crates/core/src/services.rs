//! External collaborators consumed by node execution
//!
//! The core never talks to the entity store or the network directly. Nodes
//! receive these traits through [`crate::execution::NodeServices`].

use std::collections::{BTreeMap, HashMap};
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::url_guard::{BlockedHostError, PublicOnlyResolver};

// ============================================================================
// Entity store
// ============================================================================

/// A stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub type_id: Uuid,
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create-or-update request. `id` is `None` for creation.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveEntityRequest {
    pub id: Option<Uuid>,
    pub payload: Map<String, Value>,
}

impl SaveEntityRequest {
    pub fn create(payload: Map<String, Value>) -> Self {
        Self { id: None, payload }
    }

    pub fn update(id: Uuid, payload: Map<String, Value>) -> Self {
        Self {
            id: Some(id),
            payload,
        }
    }
}

/// Outcome of a bulk delete
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteEntitiesResult {
    /// Collaborator-level failure; the delete did not happen
    pub error: Option<String>,
    /// Entities updated as a side effect (relationship cleanup), keyed by entity type
    pub updated_entities: Option<HashMap<Uuid, Vec<Entity>>>,
}

impl DeleteEntitiesResult {
    /// Number of entities touched as a side effect of the delete
    pub fn impacted_count(&self) -> usize {
        self.updated_entities
            .as_ref()
            .map(|by_type| by_type.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("entity not found: {0}")]
    NotFound(Uuid),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Entity persistence collaborator
#[async_trait]
pub trait EntityService: Send + Sync {
    async fn save_entity(
        &self,
        workspace_id: Uuid,
        entity_type_id: Uuid,
        request: SaveEntityRequest,
    ) -> Result<Entity, ServiceError>;

    async fn get_entity(&self, entity_id: Uuid) -> Result<Entity, ServiceError>;

    async fn delete_entities(
        &self,
        workspace_id: Uuid,
        ids: &[Uuid],
    ) -> Result<DeleteEntitiesResult, ServiceError>;
}

// ============================================================================
// Outbound HTTP
// ============================================================================

/// An outbound request whose URL already passed the URL guard
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the body is JSON, a string otherwise, null when empty
    pub body: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    /// The target resolved to a blocked address at connect time
    #[error("{0}")]
    Blocked(String),

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

impl From<reqwest::Error> for HttpClientError {
    fn from(err: reqwest::Error) -> Self {
        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(blocked) = cause.downcast_ref::<BlockedHostError>() {
                return Self::Blocked(blocked.to_string());
            }
            source = cause.source();
        }

        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// Outbound HTTP collaborator
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HttpClientError>;
}

/// [`HttpClient`] backed by reqwest.
///
/// Redirects are not followed: a redirect target has not been through the
/// URL guard. Hostnames are resolved through [`PublicOnlyResolver`], and
/// response bodies larger than `max_body_bytes` are refused.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ReqwestHttpClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

    pub fn new() -> Result<Self, HttpClientError> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .dns_resolver(Arc::new(PublicOnlyResolver))
            .build()?;
        Ok(Self::from_client(client))
    }

    /// Wrap a preconfigured client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, HttpClientError> {
        let mut builder = self.client.request(request.method, request.url);

        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| HttpClientError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| HttpClientError::InvalidHeader(name.clone()))?;
            builder = builder.header(header_name, header_value);
        }

        builder = match request.body {
            Some(Value::String(text)) => builder.body(text),
            Some(body) => builder.json(&body),
            None => builder,
        };

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let limit = self.max_body_bytes;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(HttpClientError::BodyTooLarge { limit });
        }
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > limit {
                return Err(HttpClientError::BodyTooLarge { limit });
            }
            bytes.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        debug!(status, bytes = bytes.len(), "Received HTTP response");

        let body = if text.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(json) => json,
                Err(_) => Value::String(text),
            }
        };

        Ok(OutboundResponse {
            status,
            headers,
            body,
        })
    }
}
