//! Built-in catalog of collection operations.
//!
//! Every operation is a single named read-only remote call with a declared
//! endpoint, methods, domains, and approval status. Operations carrying a
//! `query_template` execute through the paginated graph-query path; the rest
//! are direct management-API calls.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Approved,
    Pending,
    Disabled,
}

/// Declarative definition of a collection operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    pub operation_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_namespace: Option<String>,
    /// Endpoint template; `{subscription_id}` is substituted from args.
    pub endpoint: String,
    pub api_version: String,
    pub allowed_methods: Vec<String>,
    pub allowed_domains: Vec<String>,
    pub status: ApprovalStatus,
    pub provenance: String,
    /// Present for bulk graph-query operations; drives pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_template: Option<String>,
}

impl OperationSpec {
    fn direct(
        operation_id: &str,
        name: &str,
        description: &str,
        category: &str,
        endpoint: &str,
        api_version: &str,
    ) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            provider_namespace: None,
            endpoint: endpoint.to_string(),
            api_version: api_version.to_string(),
            allowed_methods: vec!["GET".to_string()],
            allowed_domains: vec!["management.azure.com".to_string()],
            status: ApprovalStatus::Approved,
            provenance: "built-in".to_string(),
            query_template: None,
        }
    }

    fn graph_query(operation_id: &str, name: &str, description: &str, query: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category: "resource_graph".to_string(),
            provider_namespace: None,
            endpoint: "/providers/Microsoft.ResourceGraph/resources".to_string(),
            api_version: "2022-10-01".to_string(),
            allowed_methods: vec!["POST".to_string()],
            allowed_domains: vec!["management.azure.com".to_string()],
            status: ApprovalStatus::Approved,
            provenance: "built-in".to_string(),
            query_template: Some(query.to_string()),
        }
    }

    fn namespace(mut self, ns: &str) -> Self {
        self.provider_namespace = Some(ns.to_string());
        self
    }

    fn method(mut self, method: &str) -> Self {
        self.allowed_methods = vec![method.to_string()];
        self
    }
}

/// Default read-only operation definitions seeded into the operation store.
pub fn builtin_operations() -> Vec<OperationSpec> {
    vec![
        // Bulk graph queries (layers 1-3).
        OperationSpec::graph_query(
            "graph_inventory_discovery",
            "Graph Inventory",
            "Full resource inventory via the bulk query API.",
            "resources | project id, name, type, tenantId, kind, location, resourceGroup, \
             subscriptionId, managedBy, sku, plan, properties, identity, zones, \
             extendedLocation, tags | order by id asc",
        ),
        OperationSpec::graph_query(
            "graph_topology_discovery",
            "Graph Topology",
            "Network topology resources via the bulk query API.",
            "resources | where type in~ ('microsoft.network/networkinterfaces', \
             'microsoft.network/networksecuritygroups', 'microsoft.network/publicipaddresses', \
             'microsoft.network/virtualnetworks', 'microsoft.network/routetables', \
             'microsoft.network/privateendpoints', 'microsoft.network/loadbalancers') \
             | project id, name, type, location, resourceGroup, subscriptionId, properties, tags \
             | order by id asc",
        ),
        OperationSpec::graph_query(
            "graph_identity_discovery",
            "Graph Identity",
            "Role assignments and definitions via the bulk query API.",
            "authorizationresources | where type in~ ('microsoft.authorization/roleassignments', \
             'microsoft.authorization/roledefinitions') \
             | project id, name, type, properties, tenantId, subscriptionId | order by id asc",
        ),
        OperationSpec::graph_query(
            "graph_policy_discovery",
            "Graph Policy",
            "Policy assignments via the bulk query API.",
            "policyresources | where type =~ 'microsoft.authorization/policyassignments' \
             | project id, name, type, properties, location, subscriptionId | order by id asc",
        ),
        // Core inventory (direct).
        OperationSpec::direct(
            "inventory_discovery",
            "Inventory Discovery",
            "Read-only inventory of resources for a given subscription.",
            "inventory",
            "/subscriptions/{subscription_id}/resources",
            "2021-04-01",
        ),
        // Per-service direct scans.
        OperationSpec::direct(
            "compute_discovery",
            "Compute Discovery",
            "List VM instances and their configurations.",
            "compute",
            "/subscriptions/{subscription_id}/providers/Microsoft.Compute/virtualMachines",
            "2024-03-01",
        )
        .namespace("Microsoft.Compute"),
        OperationSpec::direct(
            "storage_discovery",
            "Storage Discovery",
            "List storage accounts and their configurations.",
            "storage",
            "/subscriptions/{subscription_id}/providers/Microsoft.Storage/storageAccounts",
            "2023-05-01",
        )
        .namespace("Microsoft.Storage"),
        OperationSpec::direct(
            "database_discovery",
            "Database Discovery",
            "List SQL servers and database configurations.",
            "databases",
            "/subscriptions/{subscription_id}/providers/Microsoft.Sql/servers",
            "2023-05-01-preview",
        )
        .namespace("Microsoft.Sql"),
        OperationSpec::direct(
            "networking_discovery",
            "Networking Discovery",
            "List virtual networks and network configurations.",
            "networking",
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/virtualNetworks",
            "2024-01-01",
        )
        .namespace("Microsoft.Network"),
        OperationSpec::direct(
            "appservice_discovery",
            "App Services Discovery",
            "List web apps and function apps.",
            "app_services",
            "/subscriptions/{subscription_id}/providers/Microsoft.Web/sites",
            "2023-12-01",
        )
        .namespace("Microsoft.Web"),
        // Topology detail scans (direct).
        OperationSpec::direct(
            "nic_discovery",
            "Network Interface Discovery",
            "List network interfaces and their IP configurations.",
            "topology",
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/networkInterfaces",
            "2024-01-01",
        )
        .namespace("Microsoft.Network"),
        OperationSpec::direct(
            "nsg_discovery",
            "NSG Discovery",
            "List network security groups and their rules.",
            "topology",
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/networkSecurityGroups",
            "2024-01-01",
        )
        .namespace("Microsoft.Network"),
        OperationSpec::direct(
            "public_ip_discovery",
            "Public IP Discovery",
            "List public IP addresses.",
            "topology",
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/publicIPAddresses",
            "2024-01-01",
        )
        .namespace("Microsoft.Network"),
        OperationSpec::direct(
            "route_table_discovery",
            "Route Table Discovery",
            "List route tables and their routes.",
            "topology",
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/routeTables",
            "2024-01-01",
        )
        .namespace("Microsoft.Network"),
        OperationSpec::direct(
            "private_endpoint_discovery",
            "Private Endpoint Discovery",
            "List private endpoints.",
            "topology",
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/privateEndpoints",
            "2024-01-01",
        )
        .namespace("Microsoft.Network"),
        OperationSpec::direct(
            "load_balancer_discovery",
            "Load Balancer Discovery",
            "List load balancers and their configurations.",
            "topology",
            "/subscriptions/{subscription_id}/providers/Microsoft.Network/loadBalancers",
            "2024-01-01",
        )
        .namespace("Microsoft.Network"),
        // Identity & access detail scans (direct).
        OperationSpec::direct(
            "role_assignment_discovery",
            "Role Assignment Discovery",
            "List RBAC role assignments at subscription scope.",
            "identity_access",
            "/subscriptions/{subscription_id}/providers/Microsoft.Authorization/roleAssignments",
            "2022-04-01",
        )
        .namespace("Microsoft.Authorization"),
        OperationSpec::direct(
            "role_definition_discovery",
            "Role Definition Discovery",
            "List RBAC role definitions at subscription scope.",
            "identity_access",
            "/subscriptions/{subscription_id}/providers/Microsoft.Authorization/roleDefinitions",
            "2022-04-01",
        )
        .namespace("Microsoft.Authorization"),
        OperationSpec::direct(
            "policy_assignment_discovery",
            "Policy Assignment Discovery",
            "List policy assignments at subscription scope.",
            "identity_access",
            "/subscriptions/{subscription_id}/providers/Microsoft.Authorization/policyAssignments",
            "2023-04-01",
        )
        .namespace("Microsoft.Authorization"),
        // Add-on scans, not part of the default layer flow.
        OperationSpec::direct(
            "cost_discovery",
            "Cost Discovery",
            "Retrieve cost/usage data for an authorized scope.",
            "addon",
            "/subscriptions/{subscription_id}/providers/Microsoft.CostManagement/query",
            "2023-03-01",
        )
        .method("POST"),
        OperationSpec::direct(
            "security_discovery",
            "Security Discovery",
            "Fetch security posture assessments for an authorized scope.",
            "addon",
            "/subscriptions/{subscription_id}/providers/Microsoft.Security/assessments",
            "2021-06-01",
        ),
    ]
}
