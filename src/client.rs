//! Client used by the workflow engine to reach the execution boundary.
//!
//! The transport is a trait so the engine can run against a remote boundary
//! over HTTP or against an in-process one in tests and single-binary
//! deployments. Retry applies only to transport faults; a structured
//! failure response (policy rejection, auth failure) is returned as-is and
//! never retried here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::boundary::types::{ExecuteRequest, ExecuteResponse};
use crate::boundary::ExecutionBoundary;
use crate::config::Settings;
use crate::error::{DiscoveryError, DiscoveryResult};

/// Correlation identifiers threaded through every boundary call of a run.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub correlation_id: String,
    pub session_id: String,
}

impl TraceContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
pub trait ExecuteTransport: Send + Sync {
    async fn call(&self, request: &ExecuteRequest) -> DiscoveryResult<ExecuteResponse>;
}

/// Transport that POSTs to a remote execution boundary.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> DiscoveryResult<Self> {
        let base = settings.boundary_base_url.clone().ok_or_else(|| {
            DiscoveryError::Configuration(
                "boundary base URL is required for the HTTP transport".to_string(),
            )
        })?;
        url::Url::parse(&base).map_err(|e| {
            DiscoveryError::Configuration(format!("invalid boundary base URL: {}", e))
        })?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: format!(
                "{}{}",
                base.trim_end_matches('/'),
                settings.boundary_execute_path
            ),
            timeout: settings.boundary_timeout,
        })
    }
}

#[async_trait]
impl ExecuteTransport for HttpTransport {
    async fn call(&self, request: &ExecuteRequest) -> DiscoveryResult<ExecuteResponse> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .json(request)
            .timeout(self.timeout);
        if let Some(trace_id) = &request.trace_id {
            builder = builder.header("X-Trace-ID", trace_id);
        }
        if let Some(correlation_id) = &request.correlation_id {
            builder = builder.header("X-Correlation-ID", correlation_id);
        }

        let response = builder.send().await.map_err(|e| DiscoveryError::Transport {
            message: format!("Boundary call failed: {}", e),
            status: e.status().map(|s| s.as_u16()),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Transport {
                message: format!(
                    "Boundary returned HTTP {}: {}",
                    status.as_u16(),
                    body.chars().take(300).collect::<String>()
                ),
                status: Some(status.as_u16()),
            });
        }

        response
            .json::<ExecuteResponse>()
            .await
            .map_err(|e| DiscoveryError::Transport {
                message: format!("Failed to decode boundary response: {}", e),
                status: None,
            })
    }
}

/// Transport that calls an in-process execution boundary directly.
pub struct InProcessTransport {
    boundary: Arc<ExecutionBoundary>,
}

impl InProcessTransport {
    pub fn new(boundary: Arc<ExecutionBoundary>) -> Self {
        Self { boundary }
    }
}

#[async_trait]
impl ExecuteTransport for InProcessTransport {
    async fn call(&self, request: &ExecuteRequest) -> DiscoveryResult<ExecuteResponse> {
        self.boundary.execute(request.clone()).await
    }
}

pub struct ToolClient {
    transport: Arc<dyn ExecuteTransport>,
    max_retries: u32,
}

impl ToolClient {
    pub fn new(transport: Arc<dyn ExecuteTransport>, max_retries: u32) -> Self {
        Self {
            transport,
            max_retries,
        }
    }

    /// Call the boundary, retrying transport faults with capped exponential
    /// backoff. Terminal statuses (401/403/404) are raised immediately.
    pub async fn execute(
        &self,
        trace: &TraceContext,
        operation_id: &str,
        args: serde_json::Value,
        connection_id: &str,
        agent_step: u32,
    ) -> DiscoveryResult<ExecuteResponse> {
        let mut attempt: u32 = 1;
        loop {
            let request = ExecuteRequest {
                session_id: trace.session_id.clone(),
                operation_id: operation_id.to_string(),
                args: args.clone(),
                connection_id: connection_id.to_string(),
                trace_id: Some(trace.trace_id.clone()),
                correlation_id: Some(trace.correlation_id.clone()),
                agent_step,
                attempt,
            };

            match self.transport.call(&request).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.is_retryable() || attempt > self.max_retries {
                        log::error!(
                            "tool_call_failed operation={} attempt={} error={}",
                            operation_id,
                            attempt,
                            error
                        );
                        return Err(error);
                    }
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt).min(5));
                    log::warn!(
                        "tool_call_retry operation={} attempt={} backoff={:?} error={}",
                        operation_id,
                        attempt,
                        backoff,
                        error
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
