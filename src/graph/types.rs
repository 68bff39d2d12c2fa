//! Graph document shapes: nodes, edges, and summary stats.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Tenant,
    Subscription,
    ResourceGroup,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    /// Hierarchy membership: tenant > subscription > resource group > resource.
    Contains,
    /// Inferred network relationship between two resources.
    NetworkLink,
    /// Role assignment applied at the target's scope.
    AssignedTo,
    /// Policy assignment governing the target's scope.
    GovernedBy,
}

/// One node in the resource graph. Node ids are lowercased resource ids
/// (or synthetic ids for tenant/subscription/resource-group levels).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, JsonValue>,
    /// Number of directly contained nodes; zero for leaf resources.
    #[serde(default)]
    pub children_count: usize,
}

/// One level of the nested containment tree, for tree-panel consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HierarchyNode>,
}

/// Directed edge. Both endpoints are guaranteed to exist in the node set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub label: EdgeLabel,
    /// Sub-type tag for inferred edges, e.g. `nic-vnet` or the role name
    /// carried by an assignment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_kind: IndexMap<String, usize>,
    pub edges_by_label: IndexMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceGraph {
    pub nodes: IndexMap<String, GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Nested containment tree rooted at the tenant node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<HierarchyNode>,
}

impl ResourceGraph {
    pub fn stats(&self) -> GraphStats {
        let mut nodes_by_kind: IndexMap<String, usize> = IndexMap::new();
        for node in self.nodes.values() {
            let key = match node.kind {
                NodeKind::Tenant => "tenant",
                NodeKind::Subscription => "subscription",
                NodeKind::ResourceGroup => "resource_group",
                NodeKind::Resource => "resource",
            };
            *nodes_by_kind.entry(key.to_string()).or_insert(0) += 1;
        }
        let mut edges_by_label: IndexMap<String, usize> = IndexMap::new();
        for edge in &self.edges {
            let key = match edge.label {
                EdgeLabel::Contains => "contains",
                EdgeLabel::NetworkLink => "network_link",
                EdgeLabel::AssignedTo => "assigned_to",
                EdgeLabel::GovernedBy => "governed_by",
            };
            *edges_by_label.entry(key.to_string()).or_insert(0) += 1;
        }
        GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edges.len(),
            nodes_by_kind,
            edges_by_label,
        }
    }

    /// Edges carrying one specific label.
    pub fn edges_labeled(&self, label: EdgeLabel) -> Vec<&GraphEdge> {
        self.edges.iter().filter(|e| e.label == label).collect()
    }
}
