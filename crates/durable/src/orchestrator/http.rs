//! HTTP client for the orchestrator's dispatch API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use tracing::{info, instrument, warn};
use url::Url;

use super::{Orchestrator, OrchestratorError, StartExecutionRequest, StartExecutionResponse};

/// Starts executions with `POST {base_url}/executions`
#[derive(Debug, Clone)]
pub struct HttpOrchestrator {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpOrchestrator {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: &str) -> Result<Self, OrchestratorError> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, OrchestratorError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| OrchestratorError::Config(format!("{base_url}: {e}")))?;
        // join() replaces the last path segment unless the base ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("executions")
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    #[instrument(skip(self, request), fields(queue_item_id = %request.queue_item_id))]
    async fn start_execution(
        &self,
        request: StartExecutionRequest,
    ) -> Result<StartExecutionResponse, OrchestratorError> {
        info!(
            workflow_definition_id = %request.workflow_definition_id,
            workspace_id = %request.workspace_id,
            "Starting workflow execution"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrchestratorError::Timeout(self.timeout)
                } else {
                    OrchestratorError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Orchestrator rejected execution");
            return Err(OrchestratorError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let started: StartExecutionResponse = response
            .json()
            .await
            .map_err(|e| OrchestratorError::InvalidResponse(e.to_string()))?;

        info!(
            execution_id = %started.execution_id,
            status = %started.status,
            "Workflow execution started"
        );
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> StartExecutionRequest {
        StartExecutionRequest {
            workflow_definition_id: Uuid::now_v7(),
            workspace_id: Uuid::now_v7(),
            input: json!({"entityId": "e-1"}),
            queue_item_id: Uuid::now_v7(),
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let root = HttpOrchestrator::new("http://localhost:8233").unwrap();
        assert_eq!(root.endpoint().as_str(), "http://localhost:8233/executions");

        let nested = HttpOrchestrator::new("https://orchestrator.internal/api/v1").unwrap();
        assert_eq!(
            nested.endpoint().as_str(),
            "https://orchestrator.internal/api/v1/executions"
        );

        assert!(matches!(
            HttpOrchestrator::new("not a url"),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_execution_posts_request() {
        let server = MockServer::start().await;
        let request = request();
        Mock::given(method("POST"))
            .and(path("/executions"))
            .and(body_partial_json(json!({
                "queueItemId": request.queue_item_id,
                "input": {"entityId": "e-1"}
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"executionId": "exec-42", "status": "RUNNING"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let orchestrator = HttpOrchestrator::new(&server.uri()).unwrap();
        let response = orchestrator.start_execution(request).await.unwrap();

        assert_eq!(response.execution_id, "exec-42");
        assert_eq!(response.status, "RUNNING");
    }

    #[tokio::test]
    async fn test_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/executions"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unknown workflow"))
            .mount(&server)
            .await;

        let orchestrator = HttpOrchestrator::new(&server.uri()).unwrap();
        let err = orchestrator.start_execution(request()).await.unwrap_err();

        match &err {
            OrchestratorError::Rejected { status, body } => {
                assert_eq!(*status, 422);
                assert_eq!(body, "unknown workflow");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let orchestrator = HttpOrchestrator::new(&server.uri()).unwrap();
        let err = orchestrator.start_execution(request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let orchestrator = HttpOrchestrator::new(&server.uri()).unwrap();
        let err = orchestrator.start_execution(request()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_slow_orchestrator_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"executionId": "late", "status": "RUNNING"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let orchestrator =
            HttpOrchestrator::with_timeout(&server.uri(), Duration::from_millis(100)).unwrap();
        let err = orchestrator.start_execution(request()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
        assert!(err.is_retryable());
    }
}
