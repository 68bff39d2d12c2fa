//! Layered discovery workflow engine.
//!
//! A run moves through four stages: validate, one stage per resolved
//! layer, aggregate, persist. The discovery record is re-persisted at each
//! stage transition so an observer always sees current progress.
//!
//! Operation failures are recorded in the layer result and the run keeps
//! going; only validation problems (unknown layer, invalid scope, missing
//! connection) abort the run before it starts.

use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::boundary::types::{ErrorCode, ExecuteResponse, ExecuteStatus};
use crate::client::{ToolClient, TraceContext};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::layers::{LayerDefinition, LayerRegistry};
use crate::repository::Repositories;
use crate::types::{
    AnalysisResult, CategoryView, Connection, Discovery, DiscoveryResults, DiscoveryStatus,
    InventoryView, LayerPlan, LayerResult, OperationOutcome, PlanStep, StepStatus, ToolStep,
};

/// Input for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub connection_id: String,
    /// Explicitly requested layer ids; dependencies are pulled in
    /// automatically. Empty means every enabled layer.
    pub layer_ids: Vec<String>,
    /// When present, must match the connection's tenant.
    pub tenant_id: Option<String>,
    /// Restrict the run to one subscription of the connection. Must belong
    /// to the connection's authorized scope.
    pub subscription_id: Option<String>,
    pub session_id: Option<String>,
}

/// Everything a caller gets back from a run: the persisted record plus the
/// per-layer plans and the flattened step view.
#[derive(Debug, Clone)]
pub struct DiscoveryRunOutcome {
    pub discovery: Discovery,
    pub layer_plans: Vec<LayerPlan>,
    pub plan: Vec<PlanStep>,
}

pub struct DiscoveryEngine {
    registry: &'static LayerRegistry,
    client: Arc<ToolClient>,
    repos: Repositories,
}

impl DiscoveryEngine {
    pub fn new(client: Arc<ToolClient>, repos: Repositories) -> Self {
        Self {
            registry: LayerRegistry::builtin(),
            client,
            repos,
        }
    }

    /// Execute a full layered discovery run.
    pub async fn run(&self, request: DiscoveryRequest) -> DiscoveryResult<DiscoveryRunOutcome> {
        let trace = TraceContext::new(
            request
                .session_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        );
        log::info!(
            "discovery_start connection_id={} trace_id={} layers={:?}",
            request.connection_id,
            trace.trace_id,
            request.layer_ids
        );

        // Stage: validate.
        let connection = self
            .repos
            .connections
            .get_by_id(&request.connection_id)
            .await?
            .ok_or_else(|| DiscoveryError::ConnectionNotFound(request.connection_id.clone()))?;

        if let Some(tenant) = &request.tenant_id {
            if tenant != &connection.tenant_id {
                return Err(DiscoveryError::InvalidScope(format!(
                    "tenant '{}' does not match the connection's tenant",
                    tenant
                )));
            }
        }
        let subscription_ids = validate_scope(&connection, request.subscription_id.as_deref())?;

        let requested: Vec<String> = if request.layer_ids.is_empty() {
            self.registry
                .enabled_layers()
                .iter()
                .map(|l| l.layer_id.clone())
                .collect()
        } else {
            request.layer_ids.clone()
        };
        let resolved = self.registry.resolve(&requested)?;
        for layer_id in &resolved {
            let def = self
                .registry
                .get(layer_id)
                .ok_or_else(|| DiscoveryError::UnknownLayer(layer_id.clone()))?;
            if !def.enabled {
                return Err(DiscoveryError::UnknownLayer(format!(
                    "{} (layer is not enabled)",
                    layer_id
                )));
            }
        }
        log::info!(
            "discovery_layers_resolved requested={:?} resolved={:?}",
            requested,
            resolved
        );

        let mut discovery = Discovery {
            discovery_id: Uuid::new_v4().to_string(),
            connection_id: connection.connection_id.clone(),
            tenant_id: Some(connection.tenant_id.clone()),
            subscription_id: request.subscription_id.clone(),
            stage: "validate".to_string(),
            status: DiscoveryStatus::InProgress,
            snapshot_timestamp: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            results: None,
            trace_id: trace.trace_id.clone(),
            correlation_id: trace.correlation_id.clone(),
            session_id: trace.session_id.clone(),
        };
        self.repos.discoveries.create(discovery.clone()).await?;

        let mut layer_plans = build_layer_plans(self.registry, &resolved, &requested);

        // Stage per layer.
        let args = json!({
            "subscription_ids": subscription_ids,
            "tenant_id": connection.tenant_id,
        });
        let mut layer_results: IndexMap<String, LayerResult> = IndexMap::new();
        for plan in layer_plans.iter_mut() {
            discovery.stage = plan.layer_id.clone();
            discovery.updated_at = Utc::now();
            self.repos.discoveries.update(discovery.clone()).await?;

            plan.status = StepStatus::InProgress;
            let result = self
                .run_layer(&trace, plan, &args, &connection.connection_id)
                .await?;
            plan.status = result.status;
            layer_results.insert(plan.layer_id.clone(), result);
        }

        // Stage: aggregate.
        discovery.stage = "aggregate".to_string();
        discovery.updated_at = Utc::now();
        self.repos.discoveries.update(discovery.clone()).await?;
        let results = aggregate_results(layer_results);

        // Stage: persist. The run completes even when every operation
        // failed; per-operation status carries the failures.
        discovery.stage = "persist".to_string();
        discovery.status = DiscoveryStatus::Completed;
        discovery.results = Some(results);
        discovery.updated_at = Utc::now();
        self.repos.discoveries.update(discovery.clone()).await?;
        log::info!(
            "discovery_complete discovery_id={} layers={}",
            discovery.discovery_id,
            layer_plans.len()
        );

        let plan = flatten_plan(&layer_plans);
        Ok(DiscoveryRunOutcome {
            discovery,
            layer_plans,
            plan,
        })
    }

    /// Run every collection operation of one layer sequentially, then
    /// attach the (stubbed) analysis step.
    async fn run_layer(
        &self,
        trace: &TraceContext,
        plan: &mut LayerPlan,
        args: &JsonValue,
        connection_id: &str,
    ) -> DiscoveryResult<LayerResult> {
        log::info!(
            "layer_start layer={} operations={}",
            plan.layer_id,
            plan.steps.len()
        );
        let mut collection: IndexMap<String, OperationOutcome> = IndexMap::new();
        let mut any_succeeded = false;
        let mut any_failed = false;

        for (index, step) in plan.steps.iter_mut().enumerate() {
            step.status = StepStatus::InProgress;
            let outcome = match self
                .client
                .execute(trace, &step.name, args.clone(), connection_id, index as u32 + 1)
                .await
            {
                Ok(response) => outcome_from_response(&step.name, response),
                Err(error) => {
                    log::error!(
                        "operation_transport_failed layer={} operation={} error={}",
                        plan.layer_id,
                        step.name,
                        error
                    );
                    OperationOutcome {
                        status: StepStatus::Failed,
                        resource_count: 0,
                        resources: Vec::new(),
                        error: Some(error.to_string()),
                        query: None,
                    }
                }
            };
            step.status = outcome.status;
            step.detail = Some(json!({
                "resource_count": outcome.resource_count,
                "error": outcome.error.clone(),
            }));
            match outcome.status {
                StepStatus::Completed => any_succeeded = true,
                _ => any_failed = true,
            }
            collection.insert(step.name.clone(), outcome);
        }

        let total: usize = collection.values().map(|o| o.resource_count).sum();
        let status = if any_failed && !any_succeeded {
            StepStatus::Failed
        } else {
            StepStatus::Completed
        };
        let analysis = stub_analysis(plan, total);
        plan.analysis.status = StepStatus::Completed;

        let summary = format!(
            "{}: {} resources from {} operations{}",
            plan.label,
            total,
            collection.len(),
            if any_failed { " (with failures)" } else { "" }
        );
        log::info!(
            "layer_complete layer={} status={:?} resources={}",
            plan.layer_id,
            status,
            total
        );
        Ok(LayerResult {
            status,
            collection,
            analysis,
            summary,
        })
    }
}

/// Check the requested subscription against the connection's authorized
/// scope; return the subscription set the run will cover.
fn validate_scope(
    connection: &Connection,
    subscription_id: Option<&str>,
) -> DiscoveryResult<Vec<String>> {
    match subscription_id {
        Some(sub) => {
            if connection.subscription_ids.iter().any(|s| s == sub) {
                Ok(vec![sub.to_string()])
            } else {
                Err(DiscoveryError::InvalidScope(format!(
                    "subscription '{}' is not in the connection's authorized scope",
                    sub
                )))
            }
        }
        None => {
            if connection.subscription_ids.is_empty() {
                Err(DiscoveryError::InvalidScope(
                    "connection has no authorized subscriptions".to_string(),
                ))
            } else {
                Ok(connection.subscription_ids.clone())
            }
        }
    }
}

fn build_layer_plans(
    registry: &LayerRegistry,
    resolved: &[String],
    requested: &[String],
) -> Vec<LayerPlan> {
    resolved
        .iter()
        .filter_map(|layer_id| registry.get(layer_id))
        .map(|def| layer_plan_for(def, !requested.contains(&def.layer_id)))
        .collect()
}

/// Friendly display labels for collection operations in the plan stepper.
static OPERATION_LABELS: &[(&str, &str)] = &[
    ("graph_inventory_discovery", "Resource Graph: Inventory"),
    ("graph_topology_discovery", "Resource Graph: Topology"),
    ("graph_identity_discovery", "Resource Graph: Identity & Roles"),
    ("graph_policy_discovery", "Resource Graph: Policy Assignments"),
    ("inventory_discovery", "Inventory Scan"),
];

fn operation_label(op_id: &str) -> String {
    if let Some((_, label)) = OPERATION_LABELS.iter().find(|(id, _)| *id == op_id) {
        return (*label).to_string();
    }
    // Title-cased fallback for operations outside the table.
    op_id
        .trim_end_matches("_discovery")
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn layer_plan_for(def: &LayerDefinition, auto_resolved: bool) -> LayerPlan {
    let steps = def
        .collection_operation_ids
        .iter()
        .map(|op_id| ToolStep {
            name: op_id.clone(),
            status: StepStatus::Pending,
            label: operation_label(op_id),
            detail: None,
        })
        .collect();
    LayerPlan {
        layer_id: def.layer_id.clone(),
        layer_number: def.layer_number,
        label: def.label.clone(),
        status: StepStatus::Pending,
        auto_resolved,
        steps,
        analysis: ToolStep {
            name: format!("{}_analysis", def.layer_id),
            status: StepStatus::Pending,
            label: format!("{} Analysis", def.label),
            detail: None,
        },
        detail: None,
    }
}

fn outcome_from_response(operation_id: &str, response: ExecuteResponse) -> OperationOutcome {
    match response.status {
        ExecuteStatus::Success => match response.result {
            Some(result) => OperationOutcome {
                status: StepStatus::Completed,
                resource_count: result.resources.len(),
                resources: result.resources,
                error: None,
                query: result.query,
            },
            None => OperationOutcome {
                status: StepStatus::Completed,
                resource_count: 0,
                resources: Vec::new(),
                error: None,
                query: None,
            },
        },
        ExecuteStatus::Failure => {
            let message = response
                .error
                .as_ref()
                .map(|e| {
                    if e.code == ErrorCode::PolicyViolation {
                        format!("Denied by policy: {}", e.message)
                    } else {
                        e.message.clone()
                    }
                })
                .unwrap_or_else(|| "operation failed".to_string());
            log::warn!(
                "operation_failed operation={} error={}",
                operation_id,
                message
            );
            OperationOutcome {
                status: StepStatus::Failed,
                resource_count: 0,
                resources: Vec::new(),
                error: Some(message),
                query: None,
            }
        }
    }
}

/// Placeholder until per-layer analysis is wired to a model backend.
fn stub_analysis(plan: &LayerPlan, total: usize) -> AnalysisResult {
    AnalysisResult {
        status: "completed".to_string(),
        insights: Vec::new(),
        summary: format!(
            "Collected {} resources for {}; model-backed analysis not yet enabled",
            total, plan.label
        ),
        model: None,
        tokens_used: 0,
    }
}

fn aggregate_results(layers: IndexMap<String, LayerResult>) -> DiscoveryResults {
    let total: usize = layers
        .values()
        .flat_map(|l| l.collection.values())
        .map(|o| o.resource_count)
        .sum();
    let layer_summaries: Vec<String> = layers
        .values()
        .map(|l| l.summary.clone())
        .collect();
    let summary = format!(
        "Discovered {} resources across {} layers: {}",
        total,
        layers.len(),
        layer_summaries.join("; ")
    );

    let inventory = layers.get("inventory").map(inventory_view);
    let categories = inventory.as_ref().map(|inv| categorize(&inv.resources));

    DiscoveryResults {
        layers,
        inventory,
        categories,
        summary,
    }
}

/// Flat inventory view derived from the inventory layer's collection.
fn inventory_view(layer: &LayerResult) -> InventoryView {
    let resources: Vec<JsonValue> = layer
        .collection
        .values()
        .flat_map(|o| o.resources.iter().cloned())
        .collect();
    let mut providers: Vec<String> = resources
        .iter()
        .filter_map(|r| r.get("type").and_then(|t| t.as_str()))
        .filter_map(|t| t.split('/').next())
        .map(|ns| ns.to_lowercase())
        .collect();
    providers.sort();
    providers.dedup();
    InventoryView {
        total_resources: resources.len(),
        providers_found: providers,
        resources,
    }
}

/// Human label for a provider namespace in the category view.
fn namespace_label(namespace: &str) -> String {
    match namespace {
        "microsoft.compute" => "Compute".to_string(),
        "microsoft.storage" => "Storage".to_string(),
        "microsoft.network" => "Networking".to_string(),
        "microsoft.sql" => "Databases".to_string(),
        "microsoft.documentdb" => "Databases".to_string(),
        "microsoft.web" => "App Services".to_string(),
        "microsoft.keyvault" => "Key Vaults".to_string(),
        "microsoft.containerservice" => "Containers".to_string(),
        "microsoft.operationalinsights" => "Monitoring".to_string(),
        "microsoft.insights" => "Monitoring".to_string(),
        other => other
            .strip_prefix("microsoft.")
            .unwrap_or(other)
            .to_string(),
    }
}

fn categorize(resources: &[JsonValue]) -> IndexMap<String, CategoryView> {
    let mut categories: IndexMap<String, CategoryView> = IndexMap::new();
    for resource in resources {
        let namespace = resource
            .get("type")
            .and_then(|t| t.as_str())
            .and_then(|t| t.split('/').next())
            .unwrap_or("unknown")
            .to_lowercase();
        let entry = categories
            .entry(namespace.clone())
            .or_insert_with(|| CategoryView {
                status: StepStatus::Completed,
                label: namespace_label(&namespace),
                resource_count: 0,
                resources: Vec::new(),
            });
        entry.resource_count += 1;
        entry.resources.push(resource.clone());
    }
    categories
}

/// Flatten layer plans into the legacy step-list shape: a `validate` step,
/// one step per layer, then `aggregate` and `persist`.
fn flatten_plan(layer_plans: &[LayerPlan]) -> Vec<PlanStep> {
    let mut steps = vec![PlanStep {
        name: "validate".to_string(),
        status: StepStatus::Completed,
        label: "Validate".to_string(),
        detail: None,
    }];
    for plan in layer_plans {
        steps.push(PlanStep {
            name: plan.layer_id.clone(),
            status: plan.status,
            label: plan.label.clone(),
            detail: plan.detail.clone(),
        });
    }
    steps.push(PlanStep {
        name: "aggregate".to_string(),
        status: StepStatus::Completed,
        label: "Aggregate".to_string(),
        detail: None,
    });
    steps.push(PlanStep {
        name: "persist".to_string(),
        status: StepStatus::Completed,
        label: "Persist".to_string(),
        detail: None,
    });
    steps
}
