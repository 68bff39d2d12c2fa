//! Shared domain documents: connections, discoveries, and run-time plans.
//!
//! `Connection` and `Discovery` mirror the documents held by the external
//! document store; `LayerPlan`/`ToolStep` are derived per run and discarded
//! once the response is returned (only the aggregated `results` survive in
//! the Discovery record).

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Bearer credential that must never appear in logs, errors, or responses.
///
/// Deliberately not `Serialize`: connections flow into the core, never out.
#[derive(Clone, Deserialize)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Read the raw credential. Call sites are limited to header injection.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken([redacted])")
    }
}

/// An authorized tenant/subscription scope with its access credential.
///
/// Owned by the calling context; the orchestration core only reads it.
#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    pub connection_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub subscription_ids: Vec<String>,
    pub provider: String,
    pub access_token: Option<SecretToken>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub rbac_tier: String,
    pub status: String,
}

/// Connection shape safe to return to callers (no credential).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    pub connection_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub subscription_ids: Vec<String>,
    pub provider: String,
    pub rbac_tier: String,
    pub status: String,
}

impl From<&Connection> for ConnectionView {
    fn from(c: &Connection) -> Self {
        Self {
            connection_id: c.connection_id.clone(),
            user_id: c.user_id.clone(),
            tenant_id: c.tenant_id.clone(),
            subscription_ids: c.subscription_ids.clone(),
            provider: c.provider.clone(),
            rbac_tier: c.rbac_tier.clone(),
            status: c.status.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    InProgress,
    Completed,
    Failed,
}

/// A discovery run record, persisted via the document-store contract.
///
/// Exclusively written by the workflow engine; immutable once
/// `status == Completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub discovery_id: String,
    pub connection_id: String,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
    /// `validate`, a layer id, `aggregate`, or `persist`.
    pub stage: String,
    pub status: DiscoveryStatus,
    pub snapshot_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<DiscoveryResults>,
    pub trace_id: String,
    pub correlation_id: String,
    pub session_id: String,
}

/// Aggregated results of a completed (or partially failed) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResults {
    pub layers: IndexMap<String, LayerResult>,
    /// Backward-compatible flat inventory view, derived from the inventory
    /// layer when it was part of the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryView>,
    /// Provider-namespace grouping of inventory resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<IndexMap<String, CategoryView>>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub status: StepStatus,
    pub collection: IndexMap<String, OperationOutcome>,
    pub analysis: AnalysisResult,
    pub summary: String,
}

/// Outcome of a single collection operation within a layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub status: StepStatus,
    pub resource_count: usize,
    pub resources: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Stub analysis output; populated once layer analysis is wired to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: String,
    pub insights: Vec<String>,
    pub summary: String,
    pub model: Option<String>,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryView {
    pub total_resources: usize,
    pub providers_found: Vec<String>,
    pub resources: Vec<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryView {
    pub status: StepStatus,
    pub label: String,
    pub resource_count: usize,
    pub resources: Vec<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

/// One step in the flattened backward-compatible plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    pub status: StepStatus,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}

/// One collection-operation (or analysis) step inside a layer plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStep {
    pub name: String,
    pub status: StepStatus,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}

/// Run-time plan for one resolved layer. Derived each run, not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerPlan {
    pub layer_id: String,
    pub layer_number: u32,
    pub label: String,
    pub status: StepStatus,
    /// True when the layer was pulled in only as a dependency.
    pub auto_resolved: bool,
    pub steps: Vec<ToolStep>,
    pub analysis: ToolStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}
