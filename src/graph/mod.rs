//! Resource graph construction from aggregated discovery results.
//!
//! Builds a deduplicated node set, the containment hierarchy
//! (tenant > subscription > resource group > resource), inferred network
//! edges from well-known property references, and identity/governance
//! edges from role and policy assignments.
//!
//! Every edge is checked against the node set before insertion, so the
//! resulting graph never contains a dangling endpoint.

pub mod types;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::types::DiscoveryResults;

pub use types::{
    EdgeLabel, GraphEdge, GraphNode, GraphStats, HierarchyNode, NodeKind, ResourceGraph,
};

static RESOURCE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    // Lowercased ids only; resource group and provider segments are optional
    // so subscription- and group-level ids parse too.
    match Regex::new(
        r"(?x)^/subscriptions/(?P<sub>[^/]+)
          (?:/resourcegroups/(?P<rg>[^/]+))?
          (?:/providers/(?P<provider>[^/]+)/(?P<rtype>[^/]+)/(?P<name>[^/]+))?",
    ) {
        Ok(re) => re,
        Err(e) => panic!("resource id pattern is invalid: {e}"),
    }
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResourceId {
    pub subscription_id: String,
    pub resource_group: Option<String>,
    pub provider: Option<String>,
    pub resource_type: Option<String>,
    pub name: Option<String>,
}

/// Parse a management-plane resource id. Ids are matched case-insensitively
/// by lowercasing first, which is also how node ids are keyed.
pub fn parse_resource_id(id: &str) -> Option<ParsedResourceId> {
    let lowered = id.to_lowercase();
    let caps = RESOURCE_ID_RE.captures(&lowered)?;
    Some(ParsedResourceId {
        subscription_id: caps.name("sub")?.as_str().to_string(),
        resource_group: caps.name("rg").map(|m| m.as_str().to_string()),
        provider: caps.name("provider").map(|m| m.as_str().to_string()),
        resource_type: caps.name("rtype").map(|m| m.as_str().to_string()),
        name: caps.name("name").map(|m| m.as_str().to_string()),
    })
}

/// A reference extracted from one resource's properties: the sub-type tag
/// for the inferred edge plus the raw target id.
type Reference = (&'static str, String);

/// Property paths that reference other resources, keyed by resource type.
type ReferenceRule = fn(&Map<String, JsonValue>) -> Vec<Reference>;

static TOPOLOGY_RULES: &[(&str, ReferenceRule)] = &[
    ("microsoft.compute/virtualmachines", vm_references),
    ("microsoft.network/networkinterfaces", nic_references),
    ("microsoft.network/loadbalancers", lb_references),
    ("microsoft.network/privateendpoints", pe_references),
];

fn vm_references(props: &Map<String, JsonValue>) -> Vec<Reference> {
    let mut refs = Vec::new();
    if let Some(nics) = props
        .get("networkProfile")
        .and_then(|v| v.get("networkInterfaces"))
        .and_then(|v| v.as_array())
    {
        for nic in nics {
            if let Some(id) = nic.get("id").and_then(|v| v.as_str()) {
                refs.push(("vm-nic", id.to_string()));
            }
        }
    }
    refs
}

fn nic_references(props: &Map<String, JsonValue>) -> Vec<Reference> {
    let mut refs = Vec::new();
    if let Some(id) = props
        .get("virtualMachine")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
    {
        refs.push(("nic-vm", id.to_string()));
    }
    if let Some(id) = props
        .get("networkSecurityGroup")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
    {
        refs.push(("nic-nsg", id.to_string()));
    }
    if let Some(configs) = props.get("ipConfigurations").and_then(|v| v.as_array()) {
        for config in configs {
            let cprops = config.get("properties").unwrap_or(&JsonValue::Null);
            if let Some(subnet_id) = cprops
                .get("subnet")
                .and_then(|v| v.get("id"))
                .and_then(|v| v.as_str())
            {
                // A subnet reference links the NIC to its parent vnet.
                let vnet_id = subnet_id
                    .to_lowercase()
                    .split("/subnets/")
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if !vnet_id.is_empty() {
                    refs.push(("nic-vnet", vnet_id));
                }
            }
            if let Some(pip_id) = cprops
                .get("publicIPAddress")
                .and_then(|v| v.get("id"))
                .and_then(|v| v.as_str())
            {
                refs.push(("nic-pip", pip_id.to_string()));
            }
        }
    }
    refs
}

fn lb_references(props: &Map<String, JsonValue>) -> Vec<Reference> {
    let mut refs = Vec::new();
    if let Some(fronts) = props
        .get("frontendIPConfigurations")
        .and_then(|v| v.as_array())
    {
        for front in fronts {
            if let Some(id) = front
                .get("properties")
                .and_then(|p| p.get("publicIPAddress"))
                .and_then(|v| v.get("id"))
                .and_then(|v| v.as_str())
            {
                refs.push(("lb-pip", id.to_string()));
            }
        }
    }
    refs
}

fn pe_references(props: &Map<String, JsonValue>) -> Vec<Reference> {
    let mut refs = Vec::new();
    if let Some(conns) = props
        .get("privateLinkServiceConnections")
        .and_then(|v| v.as_array())
    {
        for conn in conns {
            if let Some(id) = conn
                .get("properties")
                .and_then(|p| p.get("privateLinkServiceId"))
                .and_then(|v| v.as_str())
            {
                refs.push(("pe-target", id.to_string()));
            }
        }
    }
    refs
}

pub struct GraphBuilder {
    tenant_id: String,
}

impl GraphBuilder {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }

    /// Build the graph from aggregated run results.
    pub fn build(&self, results: &DiscoveryResults) -> ResourceGraph {
        let mut graph = ResourceGraph::default();

        let tenant_node_id = format!("/tenants/{}", self.tenant_id.to_lowercase());
        graph.nodes.insert(
            tenant_node_id.clone(),
            GraphNode {
                id: tenant_node_id.clone(),
                kind: NodeKind::Tenant,
                label: self.tenant_id.clone(),
                resource_type: None,
                location: None,
                subscription_id: None,
                resource_group: None,
                properties: Map::new(),
                tags: Map::new(),
                children_count: 0,
            },
        );

        // Pass 1: deduplicated resource nodes from every layer's collection.
        for layer in results.layers.values() {
            for outcome in layer.collection.values() {
                for resource in &outcome.resources {
                    self.add_resource(&mut graph, resource);
                }
            }
        }

        // Pass 2: scope nodes, containment edges, child counts, and the
        // nested hierarchy tree.
        self.build_hierarchy(&mut graph, &tenant_node_id);
        finalize_hierarchy(&mut graph, &tenant_node_id);

        // Pass 3: inferred network edges.
        self.infer_topology(&mut graph);

        // Pass 4: identity and governance edges.
        self.link_assignments(&mut graph);

        log::info!(
            "graph_built nodes={} edges={}",
            graph.nodes.len(),
            graph.edges.len()
        );
        graph
    }

    /// Insert one resource node, deduplicating by lowercased id. When the
    /// same id is seen twice (different layers surface overlapping sets),
    /// the copy with the richer property map wins.
    fn add_resource(&self, graph: &mut ResourceGraph, resource: &JsonValue) {
        let raw_id = match resource.get("id").and_then(|v| v.as_str()) {
            Some(id) => id,
            None => return,
        };
        let id = raw_id.to_lowercase();
        let rtype = resource
            .get("type")
            .and_then(|v| v.as_str())
            .map(|t| t.to_lowercase());
        let properties = resource
            .get("properties")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let tags = resource
            .get("tags")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        if let Some(existing) = graph.nodes.get(&id) {
            if existing.properties.len() >= properties.len() {
                return;
            }
        }

        let parsed = parse_resource_id(&id);
        graph.nodes.insert(
            id.clone(),
            GraphNode {
                id,
                kind: NodeKind::Resource,
                label: resource
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(raw_id)
                    .to_string(),
                resource_type: rtype,
                location: resource
                    .get("location")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                subscription_id: parsed.as_ref().map(|p| p.subscription_id.clone()),
                resource_group: parsed.as_ref().and_then(|p| p.resource_group.clone()),
                properties,
                tags,
                children_count: 0,
            },
        );
    }

    /// Create subscription and resource-group nodes and the `contains`
    /// chain down to each resource.
    fn build_hierarchy(&self, graph: &mut ResourceGraph, tenant_node_id: &str) {
        let resource_ids: Vec<String> = graph
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Resource)
            .map(|n| n.id.clone())
            .collect();

        for id in resource_ids {
            let (sub, rg) = match graph.nodes.get(&id) {
                Some(node) => (node.subscription_id.clone(), node.resource_group.clone()),
                None => continue,
            };
            let sub = match sub {
                Some(s) => s,
                None => continue,
            };

            let sub_node_id = format!("/subscriptions/{}", sub);
            if !graph.nodes.contains_key(&sub_node_id) {
                graph.nodes.insert(
                    sub_node_id.clone(),
                    GraphNode {
                        id: sub_node_id.clone(),
                        kind: NodeKind::Subscription,
                        label: sub.clone(),
                        resource_type: None,
                        location: None,
                        subscription_id: Some(sub.clone()),
                        resource_group: None,
                        properties: Map::new(),
                        tags: Map::new(),
                        children_count: 0,
                    },
                );
                push_edge(
                    graph,
                    tenant_node_id.to_string(),
                    sub_node_id.clone(),
                    EdgeLabel::Contains,
                    None,
                );
            }

            let parent = match rg {
                Some(rg) => {
                    let rg_node_id = format!("/subscriptions/{}/resourcegroups/{}", sub, rg);
                    if !graph.nodes.contains_key(&rg_node_id) {
                        graph.nodes.insert(
                            rg_node_id.clone(),
                            GraphNode {
                                id: rg_node_id.clone(),
                                kind: NodeKind::ResourceGroup,
                                label: rg.clone(),
                                resource_type: None,
                                location: None,
                                subscription_id: Some(sub.clone()),
                                resource_group: Some(rg.clone()),
                                properties: Map::new(),
                                tags: Map::new(),
                                children_count: 0,
                            },
                        );
                        push_edge(
                            graph,
                            sub_node_id.clone(),
                            rg_node_id.clone(),
                            EdgeLabel::Contains,
                            None,
                        );
                    }
                    rg_node_id
                }
                None => sub_node_id,
            };
            push_edge(graph, parent, id, EdgeLabel::Contains, None);
        }
    }

    fn infer_topology(&self, graph: &mut ResourceGraph) {
        let mut pending: Vec<(String, String, &'static str)> = Vec::new();
        for node in graph.nodes.values() {
            let rtype = match node.resource_type.as_deref() {
                Some(t) => t,
                None => continue,
            };
            for (rule_type, rule) in TOPOLOGY_RULES {
                if rtype != *rule_type {
                    continue;
                }
                for (relation, target) in rule(&node.properties) {
                    pending.push((node.id.clone(), target.to_lowercase(), relation));
                }
            }
        }
        for (source, target, relation) in pending {
            // Skip references to resources outside the discovered set.
            if graph.nodes.contains_key(&target) {
                push_edge(
                    graph,
                    source,
                    target,
                    EdgeLabel::NetworkLink,
                    Some(relation.to_string()),
                );
            }
        }
    }

    /// Turn role and policy assignments into edges against the node their
    /// scope resolves to: exact resource first, then the enclosing resource
    /// group, then the subscription.
    fn link_assignments(&self, graph: &mut ResourceGraph) {
        let mut pending: Vec<(String, String, EdgeLabel, Option<String>)> = Vec::new();
        for node in graph.nodes.values() {
            let label = match node.resource_type.as_deref() {
                Some("microsoft.authorization/roleassignments") => EdgeLabel::AssignedTo,
                Some("microsoft.authorization/policyassignments") => EdgeLabel::GovernedBy,
                _ => continue,
            };
            let scope = match node.properties.get("scope").and_then(|v| v.as_str()) {
                Some(s) => s.to_lowercase(),
                None => continue,
            };
            // Principal (role) or policy-definition metadata rides on the edge.
            let relation = node
                .properties
                .get("principalId")
                .or_else(|| node.properties.get("policyDefinitionId"))
                .and_then(|v| v.as_str())
                .map(String::from);
            if let Some(target) = resolve_scope(graph, &scope) {
                pending.push((node.id.clone(), target, label, relation));
            }
        }
        for (source, target, label, relation) in pending {
            push_edge(graph, source, target, label, relation);
        }
    }
}

/// Set each node's direct child count from the containment edges and
/// attach the nested hierarchy tree rooted at the tenant.
fn finalize_hierarchy(graph: &mut ResourceGraph, tenant_node_id: &str) {
    let mut children: IndexMap<String, Vec<String>> = IndexMap::new();
    for edge in graph.edges_labeled(EdgeLabel::Contains) {
        children
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
    }
    for kids in children.values_mut() {
        kids.sort();
    }
    for (parent, kids) in &children {
        if let Some(node) = graph.nodes.get_mut(parent) {
            node.children_count = kids.len();
        }
    }
    let tree = hierarchy_tree(graph, tenant_node_id, &children);
    graph.hierarchy = tree;
}

/// Recursion depth is bounded by the four containment levels.
fn hierarchy_tree(
    graph: &ResourceGraph,
    id: &str,
    children: &IndexMap<String, Vec<String>>,
) -> Option<HierarchyNode> {
    let node = graph.nodes.get(id)?;
    let kids = children
        .get(id)
        .map(|ids| {
            ids.iter()
                .filter_map(|child| hierarchy_tree(graph, child, children))
                .collect()
        })
        .unwrap_or_default();
    Some(HierarchyNode {
        id: node.id.clone(),
        kind: node.kind,
        label: node.label.clone(),
        resource_type: node.resource_type.clone(),
        children: kids,
    })
}

/// Resolve an assignment scope to an existing node: the exact id, otherwise
/// the enclosing resource group, otherwise the subscription.
fn resolve_scope(graph: &ResourceGraph, scope: &str) -> Option<String> {
    if graph.nodes.contains_key(scope) {
        return Some(scope.to_string());
    }
    let parsed = parse_resource_id(scope)?;
    if let Some(rg) = &parsed.resource_group {
        let rg_node = format!(
            "/subscriptions/{}/resourcegroups/{}",
            parsed.subscription_id, rg
        );
        if graph.nodes.contains_key(&rg_node) {
            return Some(rg_node);
        }
    }
    let sub_node = format!("/subscriptions/{}", parsed.subscription_id);
    if graph.nodes.contains_key(&sub_node) {
        return Some(sub_node);
    }
    None
}

fn push_edge(
    graph: &mut ResourceGraph,
    source: String,
    target: String,
    label: EdgeLabel,
    relation: Option<String>,
) {
    let edge = GraphEdge {
        source,
        target,
        label,
        relation,
    };
    if !graph.edges.contains(&edge) {
        graph.edges.push(edge);
    }
}
