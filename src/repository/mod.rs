//! Persistence traits and in-memory implementations.
//!
//! The engine only ever talks to these traits; swapping in a durable store
//! is a matter of providing new implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::boundary::types::PolicyDocument;
use crate::catalog::{builtin_operations, ApprovalStatus, OperationSpec};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::types::{Connection, Discovery};

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get_by_id(&self, connection_id: &str) -> DiscoveryResult<Option<Connection>>;
    /// All connections authorized for a tenant.
    async fn list_for_scope(&self, tenant_id: &str) -> DiscoveryResult<Vec<Connection>>;
}

#[async_trait]
pub trait DiscoveryRepository: Send + Sync {
    async fn create(&self, discovery: Discovery) -> DiscoveryResult<()>;
    async fn update(&self, discovery: Discovery) -> DiscoveryResult<()>;
    async fn get_by_id(&self, discovery_id: &str) -> DiscoveryResult<Option<Discovery>>;
}

#[async_trait]
pub trait OperationRepository: Send + Sync {
    async fn get_by_id(&self, operation_id: &str) -> DiscoveryResult<Option<OperationSpec>>;
    async fn list_approved(&self) -> DiscoveryResult<Vec<OperationSpec>>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn get_default(&self) -> DiscoveryResult<PolicyDocument>;
}

#[derive(Default)]
pub struct InMemoryConnectionRepository {
    connections: RwLock<HashMap<String, Connection>>,
}

impl InMemoryConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, connection: Connection) {
        self.connections
            .write()
            .await
            .insert(connection.connection_id.clone(), connection);
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    async fn get_by_id(&self, connection_id: &str) -> DiscoveryResult<Option<Connection>> {
        Ok(self.connections.read().await.get(connection_id).cloned())
    }

    async fn list_for_scope(&self, tenant_id: &str) -> DiscoveryResult<Vec<Connection>> {
        Ok(self
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryDiscoveryRepository {
    discoveries: RwLock<HashMap<String, Discovery>>,
}

impl InMemoryDiscoveryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscoveryRepository for InMemoryDiscoveryRepository {
    async fn create(&self, discovery: Discovery) -> DiscoveryResult<()> {
        self.discoveries
            .write()
            .await
            .insert(discovery.discovery_id.clone(), discovery);
        Ok(())
    }

    async fn update(&self, discovery: Discovery) -> DiscoveryResult<()> {
        let mut guard = self.discoveries.write().await;
        if !guard.contains_key(&discovery.discovery_id) {
            return Err(DiscoveryError::Repository(format!(
                "Discovery not found: {}",
                discovery.discovery_id
            )));
        }
        guard.insert(discovery.discovery_id.clone(), discovery);
        Ok(())
    }

    async fn get_by_id(&self, discovery_id: &str) -> DiscoveryResult<Option<Discovery>> {
        Ok(self.discoveries.read().await.get(discovery_id).cloned())
    }
}

pub struct InMemoryOperationRepository {
    operations: RwLock<HashMap<String, OperationSpec>>,
}

impl InMemoryOperationRepository {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
        }
    }

    /// Seed with the built-in operation catalog.
    pub fn with_builtin() -> Self {
        let map: HashMap<String, OperationSpec> = builtin_operations()
            .into_iter()
            .map(|op| (op.operation_id.clone(), op))
            .collect();
        Self {
            operations: RwLock::new(map),
        }
    }

    pub async fn insert(&self, op: OperationSpec) {
        self.operations
            .write()
            .await
            .insert(op.operation_id.clone(), op);
    }
}

#[async_trait]
impl OperationRepository for InMemoryOperationRepository {
    async fn get_by_id(&self, operation_id: &str) -> DiscoveryResult<Option<OperationSpec>> {
        Ok(self.operations.read().await.get(operation_id).cloned())
    }

    async fn list_approved(&self) -> DiscoveryResult<Vec<OperationSpec>> {
        let mut approved: Vec<OperationSpec> = self
            .operations
            .read()
            .await
            .values()
            .filter(|op| op.status == ApprovalStatus::Approved)
            .cloned()
            .collect();
        approved.sort_by(|a, b| a.operation_id.cmp(&b.operation_id));
        Ok(approved)
    }
}

pub struct InMemoryPolicyRepository {
    default_policy: PolicyDocument,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self {
            default_policy: PolicyDocument::default(),
        }
    }

    pub fn with_policy(policy: PolicyDocument) -> Self {
        Self {
            default_policy: policy,
        }
    }
}

impl Default for InMemoryPolicyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn get_default(&self) -> DiscoveryResult<PolicyDocument> {
        Ok(self.default_policy.clone())
    }
}

/// Bundle of repository handles threaded through the engine.
#[derive(Clone)]
pub struct Repositories {
    pub connections: Arc<dyn ConnectionRepository>,
    pub discoveries: Arc<dyn DiscoveryRepository>,
    pub operations: Arc<dyn OperationRepository>,
    pub policies: Arc<dyn PolicyRepository>,
}

impl Repositories {
    /// All-in-memory bundle with the built-in operation catalog and default
    /// policy, suitable for tests and local runs.
    pub fn in_memory() -> Self {
        Self {
            connections: Arc::new(InMemoryConnectionRepository::new()),
            discoveries: Arc::new(InMemoryDiscoveryRepository::new()),
            operations: Arc::new(InMemoryOperationRepository::with_builtin()),
            policies: Arc::new(InMemoryPolicyRepository::new()),
        }
    }
}
