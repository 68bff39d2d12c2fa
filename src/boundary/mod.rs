//! The trust boundary: every operation execution funnels through here.
//!
//! Order of checks mirrors the request lifecycle: load policy, resolve the
//! operation, enforce the policy gate, resolve the connection, then hand
//! off to the remote executor. Each rejection produces a structured,
//! sanitized `ExecuteResponse` rather than a transport error.

pub mod executor;
pub mod policy;
pub mod types;

use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use crate::catalog::OperationSpec;
use crate::config::Settings;
use crate::error::DiscoveryResult;
use crate::repository::Repositories;

use executor::RemoteExecutor;
use policy::PolicyGate;
use types::{ErrorCode, ErrorInfo, ExecuteRequest, ExecuteResponse, ExecuteStatus, ExecutionMetadata};

pub struct ExecutionBoundary {
    repos: Repositories,
    executor: RemoteExecutor,
}

impl ExecutionBoundary {
    pub fn new(settings: &Settings, repos: Repositories) -> Self {
        Self {
            executor: RemoteExecutor::new(settings),
            repos,
        }
    }

    /// Validate and execute one operation request.
    ///
    /// Returns `Err` only for infrastructure faults (repository access);
    /// policy, validation, and auth rejections come back as `Failure`
    /// responses with an `ErrorInfo`.
    pub async fn execute(&self, request: ExecuteRequest) -> DiscoveryResult<ExecuteResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        log::info!(
            "boundary_execute operation={} session_id={} attempt={}",
            request.operation_id,
            request.session_id,
            request.attempt
        );

        let policy = self.repos.policies.get_default().await?;
        let gate = PolicyGate::new(&policy);

        let op = match self.lookup_operation(&request).await? {
            Ok(op) => op,
            Err(error) => return Ok(rejection(error, started, request_id)),
        };

        if let Err(error) = gate.enforce(&request, &op) {
            return Ok(rejection(error, started, request_id));
        }

        let connection = match self.repos.connections.get_by_id(&request.connection_id).await? {
            Some(c) => c,
            None => {
                log::warn!(
                    "boundary_connection_missing connection_id={}",
                    request.connection_id
                );
                let error = ErrorInfo::new(
                    ErrorCode::AuthFailed,
                    "Connection not found or not authorized",
                )
                .with_details(json!({ "connection_id": request.connection_id }));
                return Ok(rejection(error, started, request_id));
            }
        };

        let response = self.executor.execute(&request, &op, &connection).await;
        log::info!(
            "boundary_result operation={} status={:?} latency_ms={}",
            request.operation_id,
            response.status,
            response.metadata.latency_ms
        );
        Ok(response)
    }

    /// The catalog a caller is allowed to see: approved operations only,
    /// sorted by id.
    pub async fn approved_operations(&self) -> DiscoveryResult<Vec<OperationSpec>> {
        self.repos.operations.list_approved().await
    }

    async fn lookup_operation(
        &self,
        request: &ExecuteRequest,
    ) -> DiscoveryResult<Result<OperationSpec, ErrorInfo>> {
        match self.repos.operations.get_by_id(&request.operation_id).await? {
            Some(op) => Ok(Ok(op)),
            None => {
                log::warn!("boundary_unknown_operation operation={}", request.operation_id);
                Ok(Err(ErrorInfo::new(
                    ErrorCode::ValidationError,
                    format!("Unknown operation: {}", request.operation_id),
                )
                .with_details(json!({ "operation_id": request.operation_id }))))
            }
        }
    }
}

fn rejection(error: ErrorInfo, started: Instant, request_id: String) -> ExecuteResponse {
    ExecuteResponse {
        status: ExecuteStatus::Failure,
        result: None,
        error: Some(error),
        metadata: ExecutionMetadata {
            latency_ms: started.elapsed().as_millis() as u64,
            status_code: None,
            request_id,
        },
    }
}
