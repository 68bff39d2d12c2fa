//! Graph construction from aggregated discovery results: deduplication,
//! hierarchy, inferred network links, and identity edges.

use indexmap::IndexMap;
use serde_json::json;

use cloudscope::graph::{EdgeLabel, GraphBuilder, NodeKind};
use cloudscope::types::{
    AnalysisResult, DiscoveryResults, LayerResult, OperationOutcome, StepStatus,
};

fn layer(ops: Vec<(&str, Vec<serde_json::Value>)>) -> LayerResult {
    let mut collection = IndexMap::new();
    for (op_id, resources) in ops {
        collection.insert(
            op_id.to_string(),
            OperationOutcome {
                status: StepStatus::Completed,
                resource_count: resources.len(),
                resources,
                error: None,
                query: None,
            },
        );
    }
    LayerResult {
        status: StepStatus::Completed,
        collection,
        analysis: AnalysisResult {
            status: "skipped".to_string(),
            insights: vec![],
            summary: String::new(),
            model: None,
            tokens_used: 0,
        },
        summary: String::new(),
    }
}

fn results(layers: Vec<(&str, LayerResult)>) -> DiscoveryResults {
    DiscoveryResults {
        layers: layers
            .into_iter()
            .map(|(id, l)| (id.to_string(), l))
            .collect(),
        inventory: None,
        categories: None,
        summary: String::new(),
    }
}

const VM_ID: &str =
    "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Compute/virtualMachines/vm-1";
const NIC_ID: &str =
    "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Network/networkInterfaces/nic-1";
const VNET_ID: &str =
    "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Network/virtualNetworks/vnet-1";

#[test]
fn duplicate_resources_keep_the_richer_copy() {
    // Inventory carries the bare projection; topology carries properties.
    let inventory = layer(vec![(
        "graph_inventory_discovery",
        vec![json!({ "id": NIC_ID, "name": "nic-1", "type": "Microsoft.Network/networkInterfaces" })],
    )]);
    let topology = layer(vec![(
        "graph_topology_discovery",
        vec![json!({
            "id": NIC_ID,
            "name": "nic-1",
            "type": "Microsoft.Network/networkInterfaces",
            "properties": { "primary": true, "macAddress": "00-0D-3A" },
        })],
    )]);
    let graph = GraphBuilder::new("tenant-1").build(&results(vec![
        ("inventory", inventory),
        ("topology", topology),
    ]));

    let node = &graph.nodes[&NIC_ID.to_lowercase()];
    assert_eq!(node.kind, NodeKind::Resource);
    assert_eq!(node.properties.len(), 2, "richer property map wins");
    assert_eq!(
        graph
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::Resource)
            .count(),
        1
    );
}

#[test]
fn hierarchy_chains_tenant_to_resource() {
    let inventory = layer(vec![(
        "graph_inventory_discovery",
        vec![json!({ "id": VM_ID, "name": "vm-1", "type": "Microsoft.Compute/virtualMachines" })],
    )]);
    let graph = GraphBuilder::new("tenant-1").build(&results(vec![("inventory", inventory)]));

    let contains = graph.edges_labeled(EdgeLabel::Contains);
    assert_eq!(contains.len(), 3);
    assert!(contains
        .iter()
        .any(|e| e.source == "/tenants/tenant-1" && e.target == "/subscriptions/sub-1"));
    assert!(contains.iter().any(|e| {
        e.source == "/subscriptions/sub-1" && e.target == "/subscriptions/sub-1/resourcegroups/rg-a"
    }));
    assert!(contains.iter().any(|e| {
        e.source == "/subscriptions/sub-1/resourcegroups/rg-a" && e.target == VM_ID.to_lowercase()
    }));
}

#[test]
fn hierarchy_tree_carries_child_counts_per_level() {
    let inventory = layer(vec![(
        "graph_inventory_discovery",
        vec![
            json!({ "id": VM_ID, "name": "vm-1", "type": "Microsoft.Compute/virtualMachines" }),
            json!({ "id": NIC_ID, "name": "nic-1", "type": "Microsoft.Network/networkInterfaces" }),
        ],
    )]);
    let graph = GraphBuilder::new("tenant-1").build(&results(vec![("inventory", inventory)]));

    assert_eq!(graph.nodes["/tenants/tenant-1"].children_count, 1);
    assert_eq!(graph.nodes["/subscriptions/sub-1"].children_count, 1);
    assert_eq!(
        graph.nodes["/subscriptions/sub-1/resourcegroups/rg-a"].children_count,
        2
    );
    assert_eq!(graph.nodes[&VM_ID.to_lowercase()].children_count, 0);

    let tree = graph.hierarchy.as_ref().unwrap();
    assert_eq!(tree.id, "/tenants/tenant-1");
    assert_eq!(tree.kind, NodeKind::Tenant);
    assert_eq!(tree.children.len(), 1);
    let sub = &tree.children[0];
    assert_eq!(sub.id, "/subscriptions/sub-1");
    let rg = &sub.children[0];
    assert_eq!(rg.kind, NodeKind::ResourceGroup);
    // Children are sorted by id within each level.
    let leaf_ids: Vec<&str> = rg.children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(leaf_ids, vec![VM_ID.to_lowercase(), NIC_ID.to_lowercase()]);
    assert_eq!(
        rg.children[0].resource_type.as_deref(),
        Some("microsoft.compute/virtualmachines")
    );
}

#[test]
fn resource_tags_survive_onto_nodes() {
    let inventory = layer(vec![(
        "graph_inventory_discovery",
        vec![json!({
            "id": VM_ID,
            "name": "vm-1",
            "type": "Microsoft.Compute/virtualMachines",
            "tags": { "env": "prod", "owner": "platform" },
        })],
    )]);
    let graph = GraphBuilder::new("tenant-1").build(&results(vec![("inventory", inventory)]));

    let node = &graph.nodes[&VM_ID.to_lowercase()];
    assert_eq!(node.tags["env"], "prod");
    assert_eq!(node.tags.len(), 2);
}

#[test]
fn network_links_are_inferred_only_for_known_nodes() {
    let topology = layer(vec![(
        "graph_topology_discovery",
        vec![
            json!({
                "id": NIC_ID,
                "name": "nic-1",
                "type": "Microsoft.Network/networkInterfaces",
                "properties": {
                    "ipConfigurations": [{
                        "properties": {
                            "subnet": { "id": format!("{}/subnets/default", VNET_ID) },
                            "publicIPAddress": { "id": "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Network/publicIPAddresses/absent-pip" },
                        }
                    }],
                },
            }),
            json!({ "id": VNET_ID, "name": "vnet-1", "type": "Microsoft.Network/virtualNetworks" }),
        ],
    )]);
    let graph = GraphBuilder::new("tenant-1").build(&results(vec![("topology", topology)]));

    let links = graph.edges_labeled(EdgeLabel::NetworkLink);
    // The subnet reference resolves to the vnet; the public IP was not
    // discovered, so no dangling edge is created for it.
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].source, NIC_ID.to_lowercase());
    assert_eq!(links[0].target, VNET_ID.to_lowercase());
    assert_eq!(links[0].relation.as_deref(), Some("nic-vnet"));

    for edge in &graph.edges {
        assert!(graph.nodes.contains_key(&edge.source));
        assert!(graph.nodes.contains_key(&edge.target));
    }
}

#[test]
fn role_assignment_scope_falls_back_to_resource_group() {
    let inventory = layer(vec![(
        "graph_inventory_discovery",
        vec![json!({ "id": VM_ID, "name": "vm-1", "type": "Microsoft.Compute/virtualMachines" })],
    )]);
    let identity = layer(vec![(
        "graph_identity_discovery",
        vec![json!({
            "id": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleAssignments/ra-1",
            "name": "ra-1",
            "type": "microsoft.authorization/roleassignments",
            "properties": {
                // Not a discovered resource; resolves to the enclosing group.
                "scope": "/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Storage/storageAccounts/ghost",
            },
        })],
    )]);
    let graph = GraphBuilder::new("tenant-1")
        .build(&results(vec![("inventory", inventory), ("identity_access", identity)]));

    let assigned = graph.edges_labeled(EdgeLabel::AssignedTo);
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].target, "/subscriptions/sub-1/resourcegroups/rg-a");
}

#[test]
fn stats_count_nodes_and_edges_by_kind() {
    let inventory = layer(vec![(
        "graph_inventory_discovery",
        vec![json!({ "id": VM_ID, "name": "vm-1", "type": "Microsoft.Compute/virtualMachines" })],
    )]);
    let graph = GraphBuilder::new("tenant-1").build(&results(vec![("inventory", inventory)]));
    let stats = graph.stats();

    assert_eq!(stats.node_count, 4);
    assert_eq!(stats.nodes_by_kind["tenant"], 1);
    assert_eq!(stats.nodes_by_kind["subscription"], 1);
    assert_eq!(stats.nodes_by_kind["resource_group"], 1);
    assert_eq!(stats.nodes_by_kind["resource"], 1);
    assert_eq!(stats.edges_by_label["contains"], 3);
}
