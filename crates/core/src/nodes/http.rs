//! ACTION/HTTP_REQUEST node

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::io::{optional_object, required_str, to_inputs, to_outputs};
use crate::datastore::HttpResponseOutput;
use crate::error::NodeError;
use crate::execution::{ExecutableNode, NodeExecutionContext, NodeInputs, NodeOutputs, NodeServices};
use crate::services::OutboundRequest;
use crate::template;

/// Replacement text for sensitive header values in logs
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "api-key",
    "x-api-key",
    "cookie",
    "set-cookie",
];

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestConfig {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Whether a header's value must never be logged
pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&name.as_str())
}

/// Copy of `headers` safe to log
pub fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_sensitive_header(name) {
                REDACTED.to_string()
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

fn parse_method(raw: &str) -> Result<Method, NodeError> {
    let upper = raw.trim().to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&upper.as_str()) {
        return Err(NodeError::invalid_argument(format!(
            "Unsupported HTTP method '{raw}'"
        )));
    }
    Method::from_bytes(upper.as_bytes())
        .map_err(|_| NodeError::invalid_argument(format!("Unsupported HTTP method '{raw}'")))
}

#[async_trait]
impl ExecutableNode for HttpRequestConfig {
    fn inputs(&self) -> NodeInputs {
        to_inputs(self)
    }

    async fn execute(
        &self,
        _ctx: &NodeExecutionContext,
        inputs: &NodeInputs,
        services: &NodeServices,
    ) -> Result<NodeOutputs, NodeError> {
        let raw_url = required_str(inputs, "url")?;
        let method = parse_method(required_str(inputs, "method")?)?;
        let headers: BTreeMap<String, String> = optional_object(inputs, "headers")?
            .map(|headers| {
                headers
                    .iter()
                    .map(|(name, value)| (name.clone(), template::stringify(value)))
                    .collect()
            })
            .unwrap_or_default();
        let body = inputs.get("body").filter(|body| !body.is_null()).cloned();

        let url = services.url_guard.check(raw_url).await?;

        info!(
            %method,
            %url,
            headers = ?redact_headers(&headers),
            has_body = body.is_some(),
            "Sending HTTP request"
        );

        let response = services
            .http
            .send(OutboundRequest {
                method: method.clone(),
                url: url.clone(),
                headers,
                body,
            })
            .await?;

        if response.status >= 400 {
            warn!(%method, %url, status = response.status, "HTTP request failed");
            return Err(NodeError::Http {
                status: response.status,
                message: format!("{method} {url} returned {}", response.status),
            });
        }

        debug!(
            status = response.status,
            headers = ?redact_headers(&response.headers),
            "HTTP request completed"
        );

        to_outputs(&HttpResponseOutput {
            status_code: response.status,
            headers: response.headers,
            body: response.body,
            url: url.to_string(),
            method: method.to_string(),
        })
    }
}
