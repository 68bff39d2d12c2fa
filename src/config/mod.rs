//! Environment-driven configuration for the discovery core.

use std::env;
use std::time::Duration;

pub const DEFAULT_MANAGEMENT_BASE_URL: &str = "https://management.azure.com";

/// Runtime settings, loaded once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of a remote execution boundary, when tool calls cross a
    /// process boundary. `None` means in-process execution.
    pub boundary_base_url: Option<String>,
    pub boundary_execute_path: String,
    pub boundary_timeout: Duration,
    /// Retry budget the workflow engine hands to the tool execution client.
    pub max_total_retries: u32,
    /// Base URL of the cloud management API (or an API-gateway front).
    pub management_base_url: String,
    pub management_timeout: Duration,
    /// `$top` page size for graph-query operations.
    pub graph_page_size: u32,
    /// Hard ceiling on pages per graph query, guarding against unbounded
    /// continuation loops.
    pub graph_max_pages: u32,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            boundary_base_url: None,
            boundary_execute_path: "/execute".to_string(),
            boundary_timeout: Duration::from_secs(30),
            max_total_retries: 3,
            management_base_url: DEFAULT_MANAGEMENT_BASE_URL.to_string(),
            management_timeout: Duration::from_secs(30),
            graph_page_size: 1000,
            graph_max_pages: 100,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            boundary_base_url: env::var("CLOUDSCOPE_BOUNDARY_URL").ok(),
            boundary_execute_path: env::var("CLOUDSCOPE_BOUNDARY_EXECUTE_PATH")
                .unwrap_or(defaults.boundary_execute_path),
            boundary_timeout: env_secs("CLOUDSCOPE_BOUNDARY_TIMEOUT_SECONDS")
                .unwrap_or(defaults.boundary_timeout),
            max_total_retries: env_parse("CLOUDSCOPE_MAX_TOTAL_RETRIES")
                .unwrap_or(defaults.max_total_retries),
            management_base_url: env::var("CLOUDSCOPE_MANAGEMENT_BASE_URL")
                .unwrap_or(defaults.management_base_url),
            management_timeout: env_secs("CLOUDSCOPE_MANAGEMENT_TIMEOUT_SECONDS")
                .unwrap_or(defaults.management_timeout),
            graph_page_size: env_parse("CLOUDSCOPE_GRAPH_PAGE_SIZE")
                .unwrap_or(defaults.graph_page_size),
            graph_max_pages: env_parse("CLOUDSCOPE_GRAPH_MAX_PAGES")
                .unwrap_or(defaults.graph_max_pages),
            log_level: env::var("CLOUDSCOPE_LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
