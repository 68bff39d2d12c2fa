//! cloudscope: layered cloud resource discovery orchestration.
//!
//! The crate is organized around a single pipeline:
//!
//! - [`layers`] declares the concern-based discovery layers and resolves a
//!   requested set into dependency order.
//! - [`workflow`] drives a run — validate, collect per layer, aggregate,
//!   persist — recording progress in a [`types::Discovery`] document.
//! - [`client`] carries tool calls to the execution boundary with retry on
//!   transport faults.
//! - [`boundary`] is the trust boundary: policy enforcement, operation
//!   lookup, credential handling, and the remote executor that performs the
//!   actual management-API calls (direct and paginated graph queries).
//! - [`catalog`] is the approved-operation catalog the boundary enforces
//!   against.
//! - [`graph`] turns aggregated results into a deduplicated resource graph
//!   with containment, network, and identity edges.
//!
//! Credentials never leave the boundary: `Connection` documents are not
//! serializable and the bearer token is redacted from every debug
//! representation.

pub mod boundary;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod layers;
pub mod repository;
pub mod telemetry;
pub mod types;
pub mod workflow;

use std::sync::Arc;

use boundary::ExecutionBoundary;
use client::{ExecuteTransport, HttpTransport, InProcessTransport, ToolClient};
use config::Settings;
use error::DiscoveryResult;
use repository::Repositories;
use workflow::DiscoveryEngine;

/// Wire up a full discovery engine from settings and repositories.
///
/// When `boundary_base_url` is set the engine talks to a remote boundary
/// over HTTP; otherwise the boundary runs in-process against the same
/// repository bundle.
pub fn build_engine(settings: &Settings, repos: Repositories) -> DiscoveryResult<DiscoveryEngine> {
    let transport: Arc<dyn ExecuteTransport> = if settings.boundary_base_url.is_some() {
        Arc::new(HttpTransport::new(settings)?)
    } else {
        let boundary = Arc::new(ExecutionBoundary::new(settings, repos.clone()));
        Arc::new(InProcessTransport::new(boundary))
    };
    let client = Arc::new(ToolClient::new(transport, settings.max_total_retries));
    Ok(DiscoveryEngine::new(client, repos))
}
