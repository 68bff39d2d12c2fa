//! Wire types for the execution boundary surface.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Request to execute a named collection operation across the trust boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub session_id: String,
    pub operation_id: String,
    pub args: JsonValue,
    pub connection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Step number in the execution plan.
    #[serde(default = "default_step")]
    pub agent_step: u32,
    /// Retry attempt number, checked against the policy retry budget.
    #[serde(default = "default_step")]
    pub attempt: u32,
}

fn default_step() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteStatus {
    Success,
    Failure,
}

/// Sanitized result of a boundary execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub status: ExecuteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub request_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "AUTH_FAILED")]
    AuthFailed,
    #[serde(rename = "POLICY_VIOLATION")]
    PolicyViolation,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "EXECUTION_ERROR")]
    ExecutionError,
}

/// Structured error carried inside a failure response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: JsonValue,
    pub retryable: bool,
    pub policy_violation: bool,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: JsonValue::Null,
            retryable: false,
            policy_violation: false,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn policy_violation(message: impl Into<String>, details: JsonValue) -> Self {
        Self {
            code: ErrorCode::PolicyViolation,
            message: message.into(),
            details,
            retryable: false,
            policy_violation: true,
        }
    }
}

/// Normalized shape of a successful collection: a per-operation summary plus
/// the flattened record list, with an opaque passthrough for anything that
/// does not fit the known shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub summary: String,
    pub counts: IndexMap<String, u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_breakdown: Option<IndexMap<String, u64>>,
    /// Server-reported total; authoritative over `resources.len()` under
    /// eventual-consistency skew.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    /// Query text for graph-style operations, surfaced for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<JsonValue>,
}

impl OperationResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            counts: IndexMap::new(),
            timestamp: Utc::now(),
            resources: Vec::new(),
            type_breakdown: None,
            total_records: None,
            query: None,
            raw: None,
        }
    }
}

/// Boundary-side policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub policy_id: String,
    pub allowed_domains: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub max_payload_bytes: usize,
    pub max_retries: u32,
    pub approval_required: bool,
    #[serde(default = "default_execution_timeout_ms")]
    pub max_execution_timeout_ms: u64,
}

fn default_execution_timeout_ms() -> u64 {
    30_000
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            policy_id: "default".to_string(),
            allowed_domains: vec!["management.azure.com".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            max_payload_bytes: 10 * 1024 * 1024,
            max_retries: 3,
            approval_required: true,
            max_execution_timeout_ms: default_execution_timeout_ms(),
        }
    }
}
