//! Error classification
//!
//! Maps a [`NodeError`] raised by a node to a [`WorkflowErrorType`] that
//! determines retry eligibility. Classification is total: every error gets a
//! type, with [`WorkflowErrorType::ExecutionError`] as the fallback.
//!
//! Precedence, first match wins:
//! 1. security denials
//! 2. validation-shaped errors
//! 3. errors from a CONTROL_FLOW node
//! 4. upstream HTTP status (4xx client, 5xx server)
//! 5. everything else

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::nodes::NodeCategory;

/// Workflow-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowErrorType {
    HttpClientError,
    HttpServerError,
    ValidationError,
    SecurityError,
    ControlFlowError,
    ExecutionError,
}

impl WorkflowErrorType {
    /// Whether a failure of this type may be retried.
    ///
    /// Only transient upstream failures are retryable. Retrying a 4xx, a
    /// validation failure or a security denial produces the same result.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::HttpServerError | Self::ExecutionError)
    }

    /// Error type for an HTTP status, `None` for non-failure statuses
    pub fn from_http_status(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(Self::HttpClientError),
            500.. => Some(Self::HttpServerError),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HttpClientError => "HTTP_CLIENT_ERROR",
            Self::HttpServerError => "HTTP_SERVER_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::SecurityError => "SECURITY_ERROR",
            Self::ControlFlowError => "CONTROL_FLOW_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

impl fmt::Display for WorkflowErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure with a display message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub error_type: WorkflowErrorType,
    pub message: String,
    pub retryable: bool,
}

/// Classify a node failure given the category of the node that raised it
pub fn classify(error: &NodeError, category: NodeCategory) -> WorkflowErrorType {
    if error.is_security() {
        return WorkflowErrorType::SecurityError;
    }
    if error.is_validation() {
        return WorkflowErrorType::ValidationError;
    }
    if category == NodeCategory::ControlFlow {
        return WorkflowErrorType::ControlFlowError;
    }
    error
        .http_status()
        .and_then(WorkflowErrorType::from_http_status)
        .unwrap_or(WorkflowErrorType::ExecutionError)
}

/// Classify a node failure and build the message recorded on the step
pub fn classify_with_message(error: &NodeError, category: NodeCategory) -> ClassifiedError {
    let error_type = classify(error, category);
    let message = match error_type {
        WorkflowErrorType::HttpClientError | WorkflowErrorType::HttpServerError => {
            // http_status is always present for these two types
            let status = error.http_status().unwrap_or_default();
            format!("HTTP {status}: {error}")
        }
        WorkflowErrorType::ValidationError => format!("Validation failed: {error}"),
        WorkflowErrorType::SecurityError => format!("Security error: {error}"),
        WorkflowErrorType::ControlFlowError => format!("Control flow failed: {error}"),
        WorkflowErrorType::ExecutionError => format!("Execution error: {error}"),
    };

    ClassifiedError {
        error_type,
        message,
        retryable: error_type.is_retryable(),
    }
}
