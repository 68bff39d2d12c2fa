//! Graph-query pagination and throttle handling against a mock
//! management API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use cloudscope::boundary::types::{ErrorCode, ExecuteRequest, ExecuteStatus};
use cloudscope::boundary::ExecutionBoundary;
use cloudscope::config::Settings;
use cloudscope::repository::{InMemoryConnectionRepository, Repositories};
use cloudscope::types::{Connection, SecretToken};

#[derive(Clone)]
struct MockState {
    calls: Arc<AtomicUsize>,
    mode: &'static str,
}

async fn graph_handler(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let call = state.calls.fetch_add(1, Ordering::SeqCst) + 1;
    let skip_token = body
        .get("options")
        .and_then(|o| o.get("$skipToken"))
        .and_then(|v| v.as_str())
        .map(String::from);

    match state.mode {
        // Three pages of 1000/1000/500 records, totalRecords always 2500.
        "paged" => {
            let (count, next) = match skip_token.as_deref() {
                None => (1000, Some("page2")),
                Some("page2") => (1000, Some("page3")),
                Some("page3") => (500, None),
                other => panic!("unexpected skip token: {:?}", other),
            };
            let data: Vec<Value> = (0..count)
                .map(|i| json!({ "id": format!("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-{}-{}", call, i), "type": "Microsoft.Compute/virtualMachines" }))
                .collect();
            let mut payload = json!({ "data": data, "totalRecords": 2500 });
            if let Some(next) = next {
                payload["$skipToken"] = json!(next);
            }
            (StatusCode::OK, Json(payload)).into_response()
        }
        // First call throttled; the retry must reissue the same page.
        "throttled" => {
            if call == 1 {
                let mut headers = HeaderMap::new();
                headers.insert("retry-after", "0".parse().unwrap());
                return (StatusCode::TOO_MANY_REQUESTS, headers, Json(json!({}))).into_response();
            }
            assert!(skip_token.is_none(), "retry advanced the cursor");
            let payload = json!({
                "data": [{ "id": "/subscriptions/s/providers/Microsoft.Network/virtualNetworks/v", "type": "x" }],
                "totalRecords": 1,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        // Throttled with an explicit wait; the reissue must not come early.
        "throttled_wait" => {
            if call == 1 {
                let mut headers = HeaderMap::new();
                headers.insert("retry-after", "2".parse().unwrap());
                return (StatusCode::TOO_MANY_REQUESTS, headers, Json(json!({}))).into_response();
            }
            let payload = json!({
                "data": [{ "id": "/subscriptions/s/providers/Microsoft.Network/virtualNetworks/v", "type": "x" }],
                "totalRecords": 1,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        "forbidden" => (StatusCode::FORBIDDEN, Json(json!({ "error": "denied" }))).into_response(),
        _ => unreachable!(),
    }
}

async fn spawn_mock(mode: &'static str) -> (SocketAddr, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = MockState {
        calls: calls.clone(),
        mode,
    };
    let app = Router::new()
        .route("/providers/Microsoft.ResourceGraph/resources", post(graph_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls)
}

async fn boundary_for(addr: SocketAddr) -> ExecutionBoundary {
    let settings = Settings {
        management_base_url: format!("http://{}", addr),
        ..Settings::default()
    };
    let connections = InMemoryConnectionRepository::new();
    connections
        .insert(Connection {
            connection_id: "conn-1".to_string(),
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            subscription_ids: vec!["sub-1".to_string()],
            provider: "azure".to_string(),
            access_token: Some(SecretToken::new("token-abc")),
            token_expiry: Some(Utc::now() + Duration::hours(1)),
            rbac_tier: "reader".to_string(),
            status: "active".to_string(),
        })
        .await;
    let repos = Repositories {
        connections: Arc::new(connections),
        ..Repositories::in_memory()
    };
    ExecutionBoundary::new(&settings, repos)
}

fn request(operation_id: &str) -> ExecuteRequest {
    ExecuteRequest {
        session_id: "sess-1".to_string(),
        operation_id: operation_id.to_string(),
        args: json!({ "subscription_ids": ["sub-1"] }),
        connection_id: "conn-1".to_string(),
        trace_id: Some("trace-1".to_string()),
        correlation_id: Some("corr-1".to_string()),
        agent_step: 1,
        attempt: 1,
    }
}

#[tokio::test]
async fn follows_continuation_tokens_across_pages() {
    let (addr, calls) = spawn_mock("paged").await;
    let boundary = boundary_for(addr).await;

    let response = boundary
        .execute(request("graph_inventory_discovery"))
        .await
        .unwrap();

    assert_eq!(response.status, ExecuteStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let result = response.result.unwrap();
    assert_eq!(result.resources.len(), 2500);
    assert_eq!(result.total_records, Some(2500));
    assert!(result.query.is_some());
}

#[tokio::test]
async fn throttled_page_is_reissued_without_advancing() {
    let (addr, calls) = spawn_mock("throttled").await;
    let boundary = boundary_for(addr).await;

    let response = boundary
        .execute(request("graph_topology_discovery"))
        .await
        .unwrap();

    assert_eq!(response.status, ExecuteStatus::Success);
    // One throttled attempt plus one successful reissue.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(response.result.unwrap().resources.len(), 1);
}

#[tokio::test]
async fn throttle_reissue_waits_for_the_advertised_interval() {
    let (addr, calls) = spawn_mock("throttled_wait").await;
    let boundary = boundary_for(addr).await;

    let started = std::time::Instant::now();
    let response = boundary
        .execute(request("graph_topology_discovery"))
        .await
        .unwrap();

    assert_eq!(response.status, ExecuteStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(
        started.elapsed() >= std::time::Duration::from_secs(2),
        "reissue came {}ms after the 429, before the Retry-After interval",
        started.elapsed().as_millis()
    );
}

#[tokio::test]
async fn forbidden_is_a_terminal_execution_failure() {
    let (addr, calls) = spawn_mock("forbidden").await;
    let boundary = boundary_for(addr).await;

    let response = boundary
        .execute(request("graph_identity_discovery"))
        .await
        .unwrap();

    assert_eq!(response.status, ExecuteStatus::Failure);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::ExecutionError);
    assert!(!error.retryable);
}

#[tokio::test]
async fn expired_token_fails_before_any_network_call() {
    let (addr, calls) = spawn_mock("paged").await;
    let settings = Settings {
        management_base_url: format!("http://{}", addr),
        ..Settings::default()
    };
    let connections = InMemoryConnectionRepository::new();
    connections
        .insert(Connection {
            connection_id: "conn-1".to_string(),
            user_id: "user-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            subscription_ids: vec!["sub-1".to_string()],
            provider: "azure".to_string(),
            access_token: Some(SecretToken::new("stale")),
            token_expiry: Some(Utc::now() - Duration::minutes(5)),
            rbac_tier: "reader".to_string(),
            status: "active".to_string(),
        })
        .await;
    let repos = Repositories {
        connections: Arc::new(connections),
        ..Repositories::in_memory()
    };
    let boundary = ExecutionBoundary::new(&settings, repos);

    let response = boundary
        .execute(request("graph_inventory_discovery"))
        .await
        .unwrap();

    assert_eq!(response.status, ExecuteStatus::Failure);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::AuthFailed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // The credential value itself must never surface.
    assert!(!serde_json::to_string(&error).unwrap().contains("stale"));
}
