//! Remote executor: performs the actual management-API calls.
//!
//! Two execution styles, dispatched on whether the operation declares a
//! query template:
//!   * direct — single REST call against the operation's endpoint template;
//!   * graph query — repeated POST calls following a continuation cursor,
//!     with 429 handling and proactive quota-based backoff.
//!
//! The bearer credential is injected here and never written to any log
//! line, error message, or returned payload.

use std::time::{Duration, Instant};

use chrono::Utc;
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::config::Settings;
use crate::catalog::OperationSpec;
use crate::types::Connection;

use super::types::{
    ErrorCode, ErrorInfo, ExecuteRequest, ExecuteResponse, ExecuteStatus, ExecutionMetadata,
    OperationResult,
};

const QUOTA_REMAINING_HEADER: &str = "x-ms-user-quota-remaining";
const QUOTA_RESETS_AFTER_HEADER: &str = "x-ms-user-quota-resets-after";

/// Remaining-quota level below which the executor yields before the next page.
const QUOTA_LOW_WATERMARK: i64 = 2;
/// Cap on the proactive quota sleep, seconds.
const QUOTA_SLEEP_CAP_SECS: f64 = 10.0;
/// Consecutive throttled replies tolerated for a single page.
const MAX_THROTTLE_RETRIES: u32 = 5;

pub struct RemoteExecutor {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    page_size: u32,
    max_pages: u32,
}

impl RemoteExecutor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.management_base_url.trim_end_matches('/').to_string(),
            timeout: settings.management_timeout,
            page_size: settings.graph_page_size,
            max_pages: settings.graph_max_pages,
        }
    }

    /// Execute one operation against the management API.
    ///
    /// Failures are reported inside the response envelope; this method does
    /// not return `Err` so that the boundary always produces a structured,
    /// sanitized outcome.
    pub async fn execute(
        &self,
        request: &ExecuteRequest,
        op: &OperationSpec,
        connection: &Connection,
    ) -> ExecuteResponse {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let mut headers = correlation_headers(request, &request_id);
        if let Err(error) = inject_token(connection, &mut headers) {
            return failure(error, Some(401), started, request_id);
        }

        if op.query_template.is_some() {
            self.execute_graph_query(request, op, headers, started, request_id)
                .await
        } else {
            self.execute_direct(request, op, headers, started, request_id)
                .await
        }
    }

    async fn execute_direct(
        &self,
        request: &ExecuteRequest,
        op: &OperationSpec,
        headers: HeaderMap,
        started: Instant,
        request_id: String,
    ) -> ExecuteResponse {
        let url = self.build_direct_url(op, &request.args);
        let method = op
            .allowed_methods
            .first()
            .map(String::as_str)
            .unwrap_or("GET");
        log::info!(
            "direct_call operation={} method={} session_id={}",
            request.operation_id,
            method,
            request.session_id
        );

        let builder = match method {
            "GET" => self.http.get(&url),
            "POST" => {
                let body = direct_request_body(&request.operation_id, &request.args);
                self.http.post(&url).json(&body)
            }
            other => {
                let error = ErrorInfo::new(
                    ErrorCode::ValidationError,
                    format!("Unsupported HTTP method: {}", other),
                );
                return failure(error, None, started, request_id);
            }
        };

        let response = match builder
            .headers(headers)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let error = if e.is_timeout() {
                    ErrorInfo::new(
                        ErrorCode::ExecutionError,
                        format!("Operation timed out after {:?}", self.timeout),
                    )
                    .retryable()
                } else {
                    ErrorInfo::new(
                        ErrorCode::ExecutionError,
                        format!("Management API call failed: {}", e),
                    )
                };
                return failure(error, None, started, request_id);
            }
        };

        let status = response.status();
        let latency_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "direct_response operation={} status={} latency_ms={}",
            request.operation_id,
            status.as_u16(),
            latency_ms
        );

        if status.is_success() {
            let raw: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
            let result = normalize_direct(&request.operation_id, raw);
            ExecuteResponse {
                status: ExecuteStatus::Success,
                result: Some(result),
                error: None,
                metadata: ExecutionMetadata {
                    latency_ms,
                    status_code: Some(status.as_u16()),
                    request_id,
                },
            }
        } else {
            let code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                format!("HTTP {}", code)
            } else {
                body.chars().take(500).collect()
            };
            let mut error = ErrorInfo::new(
                ErrorCode::ExecutionError,
                format!("Management API call failed: {}", message),
            )
            .with_details(json!({ "status_code": code }));
            if code >= 500 || code == 429 {
                error = error.retryable();
            }
            failure(error, Some(code), started, request_id)
        }
    }

    async fn execute_graph_query(
        &self,
        request: &ExecuteRequest,
        op: &OperationSpec,
        headers: HeaderMap,
        started: Instant,
        request_id: String,
    ) -> ExecuteResponse {
        let query = op.query_template.clone().unwrap_or_default();
        let subscription_ids = subscription_ids_from_args(&request.args);
        log::info!(
            "graph_query_start operation={} subs={} trace_id={}",
            request.operation_id,
            subscription_ids.len(),
            request.trace_id.as_deref().unwrap_or("")
        );

        match self
            .run_graph_pages(request, op, &query, &headers, &subscription_ids)
            .await
        {
            Ok((resources, total_records)) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let mut result =
                    normalize_graph(&request.operation_id, resources, total_records);
                result.query = Some(query);
                ExecuteResponse {
                    status: ExecuteStatus::Success,
                    result: Some(result),
                    error: None,
                    metadata: ExecutionMetadata {
                        latency_ms,
                        status_code: Some(200),
                        request_id,
                    },
                }
            }
            Err(error) => {
                log::error!(
                    "graph_query_failed operation={} error={}",
                    request.operation_id,
                    error.message
                );
                let status_code = error
                    .details
                    .get("status_code")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u16);
                failure(error, status_code, started, request_id)
            }
        }
    }

    /// Follow the continuation cursor until it is absent or the page ceiling
    /// is hit. Returns the aggregated records and the authoritative
    /// server-reported total.
    async fn run_graph_pages(
        &self,
        request: &ExecuteRequest,
        op: &OperationSpec,
        query: &str,
        headers: &HeaderMap,
        subscription_ids: &[String],
    ) -> Result<(Vec<JsonValue>, u64), ErrorInfo> {
        let url = format!(
            "{}{}?api-version={}",
            self.base_url, op.endpoint, op.api_version
        );

        let mut all_resources: Vec<JsonValue> = Vec::new();
        let mut skip_token: Option<String> = None;
        let mut total_records: Option<u64> = None;
        let mut page: u32 = 0;
        let mut throttle_retries: u32 = 0;

        while page < self.max_pages {
            page += 1;
            let mut options = json!({
                "resultFormat": "objectArray",
                "$top": self.page_size,
            });
            if let Some(token) = &skip_token {
                options["$skipToken"] = json!(token);
            }
            let body = json!({
                "subscriptions": subscription_ids,
                "query": query,
                "options": options,
            });

            log::info!(
                "graph_query_page page={} operation={} trace_id={}",
                page,
                request.operation_id,
                request.trace_id.as_deref().unwrap_or("")
            );

            let response = self
                .http
                .post(&url)
                .headers(headers.clone())
                .json(&body)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| {
                    ErrorInfo::new(
                        ErrorCode::ExecutionError,
                        format!("Graph query request failed: {}", e),
                    )
                    .retryable()
                })?;

            let status = response.status();
            if status.as_u16() == 429 {
                throttle_retries += 1;
                if throttle_retries > MAX_THROTTLE_RETRIES {
                    return Err(ErrorInfo::new(
                        ErrorCode::ExecutionError,
                        format!(
                            "Graph query throttled {} times in a row",
                            throttle_retries
                        ),
                    )
                    .with_details(json!({ "status_code": 429 }))
                    .retryable());
                }
                let wait = retry_after_seconds(response.headers());
                log::warn!(
                    "graph_query_throttled retry_after={:.1}s operation={}",
                    wait,
                    request.operation_id
                );
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                // Reissue the same page without advancing the cursor.
                page -= 1;
                continue;
            }
            throttle_retries = 0;
            if !status.is_success() {
                let code = status.as_u16();
                let body_text = response.text().await.unwrap_or_default();
                let mut error = ErrorInfo::new(
                    ErrorCode::ExecutionError,
                    format!(
                        "Graph query failed with HTTP {}: {}",
                        code,
                        body_text.chars().take(500).collect::<String>()
                    ),
                )
                .with_details(json!({ "status_code": code }));
                if code >= 500 {
                    error = error.retryable();
                }
                return Err(error);
            }

            let (remaining, resets_after) = parse_throttle_headers(response.headers());
            let payload: JsonValue = response.json().await.map_err(|e| {
                ErrorInfo::new(
                    ErrorCode::ExecutionError,
                    format!("Failed to parse graph query response: {}", e),
                )
            })?;

            if let Some(data) = payload.get("data").and_then(|d| d.as_array()) {
                all_resources.extend(data.iter().cloned());
            }
            if let Some(total) = payload.get("totalRecords").and_then(|v| v.as_u64()) {
                total_records = Some(total);
            }

            skip_token = payload
                .get("$skipToken")
                .and_then(|v| v.as_str())
                .map(String::from);
            if skip_token.is_none() {
                break;
            }

            // Yield before the quota runs dry rather than eating a hard 429.
            if let (Some(remaining), Some(resets)) = (remaining, resets_after) {
                if remaining < QUOTA_LOW_WATERMARK {
                    let wait = resets.min(QUOTA_SLEEP_CAP_SECS);
                    log::warn!(
                        "graph_query_quota_low remaining={} resets_after={:.1}s",
                        remaining,
                        resets
                    );
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
            }
        }

        let total = total_records.unwrap_or(all_resources.len() as u64);
        log::info!(
            "graph_query_complete operation={} pages={} resources={} total_records={}",
            request.operation_id,
            page,
            all_resources.len(),
            total
        );
        Ok((all_resources, total))
    }

    fn build_direct_url(&self, op: &OperationSpec, args: &JsonValue) -> String {
        let subscription_id = args
            .get("subscription_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let endpoint = op.endpoint.replace("{subscription_id}", subscription_id);
        format!("{}{}?api-version={}", self.base_url, endpoint, op.api_version)
    }
}

fn correlation_headers(request: &ExecuteRequest, request_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let trace_id = request
        .trace_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let correlation_id = request
        .correlation_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    for (name, value) in [
        ("x-trace-id", trace_id.as_str()),
        ("x-correlation-id", correlation_id.as_str()),
        ("x-session-id", request.session_id.as_str()),
        ("x-request-id", request_id),
    ] {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    }
    headers
}

/// Inject the bearer credential, rejecting missing or expired tokens.
/// The token value itself must never reach a log line or error message.
fn inject_token(connection: &Connection, headers: &mut HeaderMap) -> Result<(), ErrorInfo> {
    let token = connection.access_token.as_ref().ok_or_else(|| {
        log::error!(
            "connection_missing_token connection_id={}",
            connection.connection_id
        );
        ErrorInfo::new(
            ErrorCode::AuthFailed,
            "Connection does not have a valid access token",
        )
        .with_details(json!({ "connection_id": connection.connection_id }))
    })?;

    if let Some(expiry) = connection.token_expiry {
        if expiry < Utc::now() {
            log::warn!(
                "token_expired connection_id={} expired_at={}",
                connection.connection_id,
                expiry
            );
            return Err(ErrorInfo::new(
                ErrorCode::AuthFailed,
                "Access token has expired, please re-authenticate",
            )
            .with_details(json!({
                "connection_id": connection.connection_id,
                "expired_at": expiry.to_rfc3339(),
            })));
        }
    }

    let value = HeaderValue::from_str(&format!("Bearer {}", token.expose())).map_err(|_| {
        ErrorInfo::new(ErrorCode::AuthFailed, "Access token is not header-safe")
    })?;
    headers.insert(AUTHORIZATION, value);
    Ok(())
}

fn retry_after_seconds(headers: &HeaderMap) -> f64 {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(5.0)
}

/// Parse provider throttle headers: remaining call quota and the reset
/// window in `HH:MM:SS` form. Either may be absent.
fn parse_throttle_headers(headers: &HeaderMap) -> (Option<i64>, Option<f64>) {
    let remaining = headers
        .get(QUOTA_REMAINING_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok());

    let resets_after = headers
        .get(QUOTA_RESETS_AFTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| {
            let parts: Vec<&str> = s.split(':').collect();
            if parts.len() != 3 {
                return None;
            }
            let hours: f64 = parts[0].parse().ok()?;
            let minutes: f64 = parts[1].parse().ok()?;
            let seconds: f64 = parts[2].parse().ok()?;
            Some(hours * 3600.0 + minutes * 60.0 + seconds)
        });

    (remaining, resets_after)
}

fn subscription_ids_from_args(args: &JsonValue) -> Vec<String> {
    if let Some(ids) = args.get("subscription_ids").and_then(|v| v.as_array()) {
        return ids
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
    }
    args.get("subscription_id")
        .and_then(|v| v.as_str())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default()
}

fn type_breakdown(resources: &[JsonValue]) -> IndexMap<String, u64> {
    let mut counts: IndexMap<String, u64> = IndexMap::new();
    for r in resources {
        let rtype = r
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        *counts.entry(rtype).or_insert(0) += 1;
    }
    counts
}

/// Normalize graph-query results into the standard per-operation shape.
fn normalize_graph(
    operation_id: &str,
    resources: Vec<JsonValue>,
    total_records: u64,
) -> OperationResult {
    match operation_id {
        "graph_inventory_discovery" | "graph_topology_discovery" => {
            let breakdown = type_breakdown(&resources);
            let kind = if operation_id == "graph_topology_discovery" {
                "network resources"
            } else {
                "resources"
            };
            let mut result = OperationResult::new(format!(
                "Found {} {} across {} types via graph query",
                resources.len(),
                kind,
                breakdown.len()
            ));
            result
                .counts
                .insert("resources".to_string(), resources.len() as u64);
            result
                .counts
                .insert("types".to_string(), breakdown.len() as u64);
            result.type_breakdown = Some(breakdown);
            result.total_records = Some(total_records);
            result.resources = resources;
            result
        }
        "graph_identity_discovery" => {
            let assignments = resources
                .iter()
                .filter(|r| type_contains(r, "roleassignments"))
                .count();
            let definitions = resources
                .iter()
                .filter(|r| type_contains(r, "roledefinitions"))
                .count();
            let mut result = OperationResult::new(format!(
                "Found {} identity resources ({} assignments, {} definitions) via graph query",
                resources.len(),
                assignments,
                definitions
            ));
            result
                .counts
                .insert("role_assignments".to_string(), assignments as u64);
            result
                .counts
                .insert("role_definitions".to_string(), definitions as u64);
            result.total_records = Some(total_records);
            result.resources = resources;
            result
        }
        "graph_policy_discovery" => {
            let mut result = OperationResult::new(format!(
                "Found {} policy assignments via graph query",
                resources.len()
            ));
            result
                .counts
                .insert("policy_assignments".to_string(), resources.len() as u64);
            result.total_records = Some(total_records);
            result.resources = resources;
            result
        }
        _ => {
            let mut result = OperationResult::new(format!(
                "{} returned {} resources",
                operation_id,
                resources.len()
            ));
            result
                .counts
                .insert("resources".to_string(), resources.len() as u64);
            result.total_records = Some(total_records);
            result.resources = resources;
            result
        }
    }
}

fn type_contains(resource: &JsonValue, needle: &str) -> bool {
    resource
        .get("type")
        .and_then(|v| v.as_str())
        .map(|t| t.to_lowercase().contains(needle))
        .unwrap_or(false)
}

/// Normalize a direct management-API response. A closed table keyed by
/// operation id; unknown operations pass through as an opaque bag.
fn normalize_direct(operation_id: &str, raw: JsonValue) -> OperationResult {
    let listed = |key: &str| -> Vec<JsonValue> {
        raw.get(key)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };

    let simple_listing = |count_key: &str, noun: &str| -> OperationResult {
        let resources = listed("value");
        let mut result =
            OperationResult::new(format!("Found {} {}", resources.len(), noun));
        result
            .counts
            .insert(count_key.to_string(), resources.len() as u64);
        result.resources = resources;
        result
    };

    match operation_id {
        "inventory_discovery" => {
            let resources = listed("value");
            let breakdown = type_breakdown(&resources);
            let mut result = OperationResult::new(format!(
                "Found {} resources across {} types",
                resources.len(),
                breakdown.len()
            ));
            result
                .counts
                .insert("resources".to_string(), resources.len() as u64);
            result
                .counts
                .insert("types".to_string(), breakdown.len() as u64);
            result.type_breakdown = Some(breakdown);
            result.resources = resources;
            result
        }
        "compute_discovery" => simple_listing("virtual_machines", "virtual machines"),
        "storage_discovery" => simple_listing("storage_accounts", "storage accounts"),
        "database_discovery" => simple_listing("sql_servers", "SQL servers"),
        "networking_discovery" => simple_listing("virtual_networks", "virtual networks"),
        "appservice_discovery" => simple_listing("web_apps", "web/function apps"),
        "nic_discovery" => simple_listing("nics", "network interfaces"),
        "nsg_discovery" => simple_listing("nsgs", "network security groups"),
        "public_ip_discovery" => simple_listing("public_ips", "public IP addresses"),
        "vnet_peering_discovery" => {
            simple_listing("vnets_with_peerings", "virtual networks with peerings")
        }
        "route_table_discovery" => simple_listing("route_tables", "route tables"),
        "private_endpoint_discovery" => simple_listing("private_endpoints", "private endpoints"),
        "load_balancer_discovery" => simple_listing("load_balancers", "load balancers"),
        "role_assignment_discovery" => simple_listing("role_assignments", "role assignments"),
        "role_definition_discovery" => simple_listing("role_definitions", "role definitions"),
        "policy_assignment_discovery" => simple_listing("policy_assignments", "policy assignments"),
        "security_discovery" => {
            let assessments = listed("value");
            let mut result = OperationResult::new(format!(
                "Found {} security assessments",
                assessments.len()
            ));
            result
                .counts
                .insert("assessments".to_string(), assessments.len() as u64);
            result.resources = assessments;
            result
        }
        "cost_discovery" => {
            let rows = raw
                .get("properties")
                .and_then(|p| p.get("rows"))
                .and_then(|r| r.as_array())
                .map(|r| r.len())
                .unwrap_or(0);
            let mut result =
                OperationResult::new(format!("Cost query returned {} line items", rows));
            result.counts.insert("line_items".to_string(), rows as u64);
            result.raw = Some(raw);
            result
        }
        _ => {
            let mut result = OperationResult::new(format!("{} completed", operation_id));
            result.raw = Some(raw);
            result
        }
    }
}

/// Build the POST body for direct operations that require one.
fn direct_request_body(operation_id: &str, _args: &JsonValue) -> JsonValue {
    if operation_id == "cost_discovery" {
        return json!({
            "type": "ActualCost",
            "dataSet": {
                "granularity": "None",
                "aggregation": {
                    "totalCost": { "name": "Cost", "function": "Sum" },
                    "totalCostUSD": { "name": "CostUSD", "function": "Sum" },
                },
                "grouping": [
                    { "type": "Dimension", "name": "ServiceName" },
                ],
            },
            "timeframe": "MonthToDate",
        });
    }
    json!({})
}

fn failure(
    error: ErrorInfo,
    status_code: Option<u16>,
    started: Instant,
    request_id: String,
) -> ExecuteResponse {
    ExecuteResponse {
        status: ExecuteStatus::Failure,
        result: None,
        error: Some(error),
        metadata: ExecutionMetadata {
            latency_ms: started.elapsed().as_millis() as u64,
            status_code,
            request_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_headers_parse_hms_format() {
        let mut headers = HeaderMap::new();
        headers.insert(
            QUOTA_REMAINING_HEADER,
            HeaderValue::from_static("1"),
        );
        headers.insert(
            QUOTA_RESETS_AFTER_HEADER,
            HeaderValue::from_static("00:00:07.5"),
        );
        let (remaining, resets) = parse_throttle_headers(&headers);
        assert_eq!(remaining, Some(1));
        assert_eq!(resets, Some(7.5));
    }

    #[test]
    fn throttle_headers_tolerate_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(QUOTA_REMAINING_HEADER, HeaderValue::from_static("many"));
        headers.insert(QUOTA_RESETS_AFTER_HEADER, HeaderValue::from_static("soon"));
        assert_eq!(parse_throttle_headers(&headers), (None, None));
    }

    #[test]
    fn retry_after_defaults_to_five_seconds() {
        assert_eq!(retry_after_seconds(&HeaderMap::new()), 5.0);
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(retry_after_seconds(&headers), 2.0);
    }

    #[test]
    fn subscription_ids_fall_back_to_single_id() {
        let args = json!({ "subscription_id": "sub-9" });
        assert_eq!(subscription_ids_from_args(&args), vec!["sub-9"]);
        let args = json!({ "subscription_ids": ["a", "b"], "subscription_id": "ignored" });
        assert_eq!(subscription_ids_from_args(&args), vec!["a", "b"]);
    }

    #[test]
    fn identity_normalization_splits_assignments_and_definitions() {
        let resources = vec![
            json!({ "id": "1", "type": "microsoft.authorization/roleassignments" }),
            json!({ "id": "2", "type": "microsoft.authorization/roleassignments" }),
            json!({ "id": "3", "type": "microsoft.authorization/roledefinitions" }),
        ];
        let result = normalize_graph("graph_identity_discovery", resources, 3);
        assert_eq!(result.counts["role_assignments"], 2);
        assert_eq!(result.counts["role_definitions"], 1);
        assert_eq!(result.total_records, Some(3));
    }

    #[test]
    fn unknown_direct_operation_passes_raw_through() {
        let result = normalize_direct("mystery_discovery", json!({ "value": [1, 2] }));
        assert!(result.raw.is_some());
        assert!(result.resources.is_empty());
    }
}
