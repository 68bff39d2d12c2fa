//! Full layered discovery runs with an in-process boundary against a mock
//! management API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use cloudscope::build_engine;
use cloudscope::config::Settings;
use cloudscope::error::{DiscoveryError, DiscoveryResult};
use cloudscope::repository::{
    DiscoveryRepository, InMemoryConnectionRepository, InMemoryDiscoveryRepository, Repositories,
};
use cloudscope::types::{Connection, Discovery, DiscoveryStatus, SecretToken, StepStatus};
use cloudscope::workflow::DiscoveryRequest;

#[derive(Clone, Copy)]
struct MockState {
    identity_fails: bool,
}

async fn graph_handler(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let query = body.get("query").and_then(|q| q.as_str()).unwrap_or("");

    if query.starts_with("authorizationresources") || query.starts_with("policyresources") {
        if state.identity_fails {
            return (StatusCode::FORBIDDEN, Json(json!({ "error": "no access" })))
                .into_response();
        }
        let data = if query.starts_with("authorizationresources") {
            json!([{
                "id": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleAssignments/ra-1",
                "type": "microsoft.authorization/roleassignments",
                "properties": { "scope": "/subscriptions/sub-1" },
            }])
        } else {
            json!([{
                "id": "/subscriptions/sub-1/providers/Microsoft.Authorization/policyAssignments/pa-1",
                "type": "microsoft.authorization/policyassignments",
                "properties": { "scope": "/subscriptions/sub-1" },
            }])
        };
        let total = data.as_array().map(|a| a.len()).unwrap_or(0);
        return (StatusCode::OK, Json(json!({ "data": data, "totalRecords": total })))
            .into_response();
    }

    // Inventory query.
    let data = json!([
        {
            "id": "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Compute/virtualMachines/vm-1",
            "name": "vm-1",
            "type": "Microsoft.Compute/virtualMachines",
            "location": "westeurope",
        },
        {
            "id": "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Storage/storageAccounts/sa-1",
            "name": "sa-1",
            "type": "Microsoft.Storage/storageAccounts",
            "location": "westeurope",
        },
    ]);
    (StatusCode::OK, Json(json!({ "data": data, "totalRecords": 2 }))).into_response()
}

async fn spawn_mock(identity_fails: bool) -> SocketAddr {
    let app = Router::new()
        .route(
            "/providers/Microsoft.ResourceGraph/resources",
            post(graph_handler),
        )
        .with_state(MockState { identity_fails });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn repos_with_connection() -> Repositories {
    let connections = InMemoryConnectionRepository::new();
    connections
        .insert(Connection {
            connection_id: "conn-1".to_string(),
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            subscription_ids: vec!["sub-1".to_string()],
            provider: "azure".to_string(),
            access_token: Some(SecretToken::new("live-token")),
            token_expiry: Some(Utc::now() + Duration::hours(1)),
            rbac_tier: "reader".to_string(),
            status: "active".to_string(),
        })
        .await;
    Repositories {
        connections: Arc::new(connections),
        ..Repositories::in_memory()
    }
}

#[tokio::test]
async fn identity_run_auto_resolves_inventory_dependency() {
    cloudscope::telemetry::init("warn");
    let addr = spawn_mock(false).await;
    let settings = Settings {
        management_base_url: format!("http://{}", addr),
        ..Settings::default()
    };
    let repos = repos_with_connection().await;
    let engine = build_engine(&settings, repos.clone()).unwrap();

    let outcome = engine
        .run(DiscoveryRequest {
            connection_id: "conn-1".to_string(),
            layer_ids: vec!["identity_access".to_string()],
            tenant_id: None,
            subscription_id: None,
            session_id: Some("sess-1".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(outcome.layer_plans.len(), 2);
    assert_eq!(outcome.layer_plans[0].layer_id, "inventory");
    assert!(outcome.layer_plans[0].auto_resolved);
    assert_eq!(outcome.layer_plans[1].layer_id, "identity_access");
    assert!(!outcome.layer_plans[1].auto_resolved);

    let discovery = &outcome.discovery;
    assert_eq!(discovery.status, DiscoveryStatus::Completed);
    assert_eq!(discovery.stage, "persist");
    let results = discovery.results.as_ref().unwrap();
    assert!(results.summary.contains("2 layers"));
    assert_eq!(results.layers["inventory"].status, StepStatus::Completed);
    assert_eq!(
        results.layers["identity_access"].collection.len(),
        2,
        "identity layer runs both its operations"
    );

    // Inventory compatibility views.
    let inventory = results.inventory.as_ref().unwrap();
    assert_eq!(inventory.total_resources, 2);
    assert_eq!(
        inventory.providers_found,
        vec!["microsoft.compute", "microsoft.storage"]
    );
    let categories = results.categories.as_ref().unwrap();
    assert_eq!(categories["microsoft.compute"].label, "Compute");

    // The persisted record matches what was returned.
    let stored = repos
        .discoveries
        .get_by_id(&discovery.discovery_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DiscoveryStatus::Completed);

    // validate + one step per layer + aggregate + persist.
    let step_names: Vec<&str> = outcome.plan.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        step_names,
        vec!["validate", "inventory", "identity_access", "aggregate", "persist"]
    );
    assert_eq!(outcome.plan[2].label, "Identity & Access");
}

#[tokio::test]
async fn operation_failures_do_not_abort_the_run() {
    let addr = spawn_mock(true).await;
    let settings = Settings {
        management_base_url: format!("http://{}", addr),
        ..Settings::default()
    };
    let repos = repos_with_connection().await;
    let engine = build_engine(&settings, repos).unwrap();

    let outcome = engine
        .run(DiscoveryRequest {
            connection_id: "conn-1".to_string(),
            layer_ids: vec!["identity_access".to_string()],
            tenant_id: None,
            subscription_id: None,
            session_id: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.discovery.status, DiscoveryStatus::Completed);
    let results = outcome.discovery.results.as_ref().unwrap();
    assert_eq!(results.layers["inventory"].status, StepStatus::Completed);
    // Both identity operations hit 403 and failed; the layer records that.
    let identity = &results.layers["identity_access"];
    assert_eq!(identity.status, StepStatus::Failed);
    for op in identity.collection.values() {
        assert_eq!(op.status, StepStatus::Failed);
        assert!(op.error.is_some());
    }
}

#[tokio::test]
async fn unknown_layer_is_rejected_before_any_work() {
    let settings = Settings::default();
    let repos = repos_with_connection().await;
    let engine = build_engine(&settings, repos).unwrap();

    let err = engine
        .run(DiscoveryRequest {
            connection_id: "conn-1".to_string(),
            layer_ids: vec!["quantum".to_string()],
            tenant_id: None,
            subscription_id: None,
            session_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::UnknownLayer(_)));
}

#[tokio::test]
async fn foreign_subscription_is_rejected() {
    let settings = Settings::default();
    let repos = repos_with_connection().await;
    let engine = build_engine(&settings, repos).unwrap();

    let err = engine
        .run(DiscoveryRequest {
            connection_id: "conn-1".to_string(),
            layer_ids: vec!["inventory".to_string()],
            tenant_id: None,
            subscription_id: Some("sub-other".to_string()),
            session_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::InvalidScope(_)));
}

/// Delegating repository that records every stage value as it is written.
struct StageRecorder {
    inner: InMemoryDiscoveryRepository,
    stages: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl DiscoveryRepository for StageRecorder {
    async fn create(&self, discovery: Discovery) -> DiscoveryResult<()> {
        self.stages.lock().unwrap().push(discovery.stage.clone());
        self.inner.create(discovery).await
    }

    async fn update(&self, discovery: Discovery) -> DiscoveryResult<()> {
        self.stages.lock().unwrap().push(discovery.stage.clone());
        self.inner.update(discovery).await
    }

    async fn get_by_id(&self, discovery_id: &str) -> DiscoveryResult<Option<Discovery>> {
        self.inner.get_by_id(discovery_id).await
    }
}

#[tokio::test]
async fn persisted_stages_follow_the_documented_sequence() {
    let addr = spawn_mock(false).await;
    let settings = Settings {
        management_base_url: format!("http://{}", addr),
        ..Settings::default()
    };
    let recorder = Arc::new(StageRecorder {
        inner: InMemoryDiscoveryRepository::new(),
        stages: std::sync::Mutex::new(Vec::new()),
    });
    let mut repos = repos_with_connection().await;
    repos.discoveries = recorder.clone();
    let engine = build_engine(&settings, repos).unwrap();

    engine
        .run(DiscoveryRequest {
            connection_id: "conn-1".to_string(),
            layer_ids: vec!["topology".to_string()],
            tenant_id: None,
            subscription_id: None,
            session_id: None,
        })
        .await
        .unwrap();

    // Layer stages carry the bare layer id.
    let stages = recorder.stages.lock().unwrap().clone();
    assert_eq!(
        stages,
        vec!["validate", "inventory", "topology", "aggregate", "persist"]
    );
}

#[tokio::test]
async fn mismatched_tenant_is_rejected() {
    let settings = Settings::default();
    let repos = repos_with_connection().await;
    let engine = build_engine(&settings, repos).unwrap();

    let err = engine
        .run(DiscoveryRequest {
            connection_id: "conn-1".to_string(),
            layer_ids: vec!["inventory".to_string()],
            tenant_id: Some("other-tenant".to_string()),
            subscription_id: None,
            session_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::InvalidScope(_)));
}

#[tokio::test]
async fn missing_connection_is_fatal() {
    let settings = Settings::default();
    let repos = Repositories::in_memory();
    let engine = build_engine(&settings, repos).unwrap();

    let err = engine
        .run(DiscoveryRequest {
            connection_id: "ghost".to_string(),
            layer_ids: vec![],
            tenant_id: None,
            subscription_id: None,
            session_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::ConnectionNotFound(_)));
}
