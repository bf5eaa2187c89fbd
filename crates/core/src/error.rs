//! Error types for node configuration and node execution
//!
//! [`NodeError`] is the failure shape every node `execute` returns. The
//! classifier in [`crate::classifier`] maps each variant to a workflow error
//! type, so a new variant needs a matching arm there.

use std::time::Duration;

use crate::datastore::DataStoreError;
use crate::nodes::NodeCategory;
use crate::services::{HttpClientError, ServiceError};
use crate::template::TemplateError;

/// Failure raised while executing a node
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A required input is missing or malformed
    #[error("{0}")]
    InvalidArgument(String),

    /// Input failed schema validation
    #[error("{0}")]
    SchemaValidation(String),

    /// The request was denied for security reasons (SSRF guard, workspace isolation)
    #[error("{0}")]
    Security(String),

    /// The node or a collaborator is in a state that prevents completion
    #[error("{0}")]
    IllegalState(String),

    /// Upstream HTTP call returned a failure status
    #[error("{message}")]
    Http { status: u16, message: String },

    /// Execution exceeded the caller-enforced timeout
    #[error("node execution timed out after {0:?}")]
    Timeout(Duration),

    /// A referenced resource does not exist
    #[error("{0}")]
    NotFound(String),

    /// Opaque collaborator failure (network, database, ...)
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl NodeError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::Security(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Whether this failure is shaped like a validation problem
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::SchemaValidation(_))
    }

    /// Whether this failure is a security denial
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }

    /// HTTP status carried by the failure, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TemplateError> for NodeError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::TriggerNotSet => Self::IllegalState(err.to_string()),
            _ => Self::InvalidArgument(err.to_string()),
        }
    }
}

impl From<ServiceError> for NodeError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => Self::NotFound(err.to_string()),
            ServiceError::AccessDenied(message) => Self::Security(message),
            ServiceError::Invalid(message) => Self::InvalidArgument(message),
            ServiceError::Other(source) => Self::Collaborator(source),
        }
    }
}

impl From<HttpClientError> for NodeError {
    fn from(err: HttpClientError) -> Self {
        match err {
            HttpClientError::InvalidHeader(_) => Self::InvalidArgument(err.to_string()),
            HttpClientError::Blocked(message) => Self::Security(message),
            other => Self::Collaborator(anyhow::Error::new(other)),
        }
    }
}

impl From<DataStoreError> for NodeError {
    fn from(err: DataStoreError) -> Self {
        Self::IllegalState(err.to_string())
    }
}

/// Failure decoding a node configuration payload
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("node config must be a JSON object")]
    NotAnObject,

    #[error("node config is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unknown node category '{0}'")]
    UnknownCategory(String),

    #[error("unknown subType '{sub_type}' for node category {category}")]
    UnknownSubType {
        category: NodeCategory,
        sub_type: String,
    },

    #[error("node type {category}{} is not yet implemented", display_sub_type(.sub_type))]
    NotImplemented {
        category: NodeCategory,
        sub_type: Option<String>,
    },

    #[error("invalid {category}/{sub_type} config: {source}")]
    Invalid {
        category: NodeCategory,
        sub_type: String,
        #[source]
        source: serde_json::Error,
    },
}

fn display_sub_type(sub_type: &Option<String>) -> String {
    sub_type
        .as_deref()
        .map(|s| format!("/{s}"))
        .unwrap_or_default()
}
