//! Discovery layer definitions, registry, and dependency resolution.
//!
//! Each layer represents a concern-based view of a cloud subscription:
//!   Layer 1: Inventory — what exists
//!   Layer 2: Topology — how it is connected
//!   Layer 3: Identity & Access — who can do what
//!   Layers 4-8 are scaffolds, registered but disabled.
//!
//! The registry is immutable after initialization and acyclic by
//! construction: every dependency must carry a strictly lower layer number
//! than its dependent, which `LayerRegistry::new` verifies once at startup.

use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::error::{DiscoveryError, DiscoveryResult};

/// Declarative definition of a single discovery layer.
#[derive(Debug, Clone)]
pub struct LayerDefinition {
    pub layer_id: String,
    /// Unique; defines topological order across layers.
    pub layer_number: u32,
    pub label: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub collection_operation_ids: Vec<String>,
    pub collection_uses_ai: bool,
    pub analysis_uses_ai: bool,
    pub enabled: bool,
}

impl LayerDefinition {
    fn new(layer_id: &str, layer_number: u32, label: &str, description: &str) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            layer_number,
            label: label.to_string(),
            description: description.to_string(),
            depends_on: Vec::new(),
            collection_operation_ids: Vec::new(),
            collection_uses_ai: false,
            analysis_uses_ai: true,
            enabled: true,
        }
    }

    fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    fn operations(mut self, ids: &[&str]) -> Self {
        self.collection_operation_ids = ids.iter().map(|d| d.to_string()).collect();
        self
    }

    fn collection_uses_ai(mut self) -> Self {
        self.collection_uses_ai = true;
        self
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Static catalog of discovery layers. No run-time mutation.
#[derive(Debug)]
pub struct LayerRegistry {
    layers: IndexMap<String, LayerDefinition>,
}

impl LayerRegistry {
    /// Build a registry, verifying the dependency invariant: every
    /// `depends_on` entry exists and has a strictly lower layer number.
    pub fn new(definitions: Vec<LayerDefinition>) -> DiscoveryResult<Self> {
        let mut layers: IndexMap<String, LayerDefinition> = IndexMap::new();
        for def in definitions {
            if layers.contains_key(&def.layer_id) {
                return Err(DiscoveryError::InvalidRegistry(format!(
                    "duplicate layer id '{}'",
                    def.layer_id
                )));
            }
            layers.insert(def.layer_id.clone(), def);
        }
        let mut numbers = HashSet::new();
        for def in layers.values() {
            if !numbers.insert(def.layer_number) {
                return Err(DiscoveryError::InvalidRegistry(format!(
                    "duplicate layer number {}",
                    def.layer_number
                )));
            }
            for dep in &def.depends_on {
                let dep_def = layers.get(dep).ok_or_else(|| {
                    DiscoveryError::InvalidRegistry(format!(
                        "layer '{}' depends on unknown layer '{}'",
                        def.layer_id, dep
                    ))
                })?;
                if dep_def.layer_number >= def.layer_number {
                    return Err(DiscoveryError::InvalidRegistry(format!(
                        "layer '{}' (#{}) depends on '{}' (#{}), which does not precede it",
                        def.layer_id, def.layer_number, dep, dep_def.layer_number
                    )));
                }
            }
        }
        Ok(Self { layers })
    }

    /// The process-wide built-in registry.
    pub fn builtin() -> &'static LayerRegistry {
        static REGISTRY: Lazy<LayerRegistry> = Lazy::new(|| {
            match LayerRegistry::new(builtin_definitions()) {
                Ok(registry) => registry,
                Err(e) => panic!("built-in layer registry is invalid: {e}"),
            }
        });
        &REGISTRY
    }

    pub fn get(&self, layer_id: &str) -> Option<&LayerDefinition> {
        self.layers.get(layer_id)
    }

    /// All enabled layers, sorted by layer number.
    pub fn enabled_layers(&self) -> Vec<&LayerDefinition> {
        let mut enabled: Vec<&LayerDefinition> =
            self.layers.values().filter(|l| l.enabled).collect();
        enabled.sort_by_key(|l| l.layer_number);
        enabled
    }

    /// Expand a requested layer set into its full transitive closure,
    /// ordered by ascending layer number.
    ///
    /// Idempotent under repeated or duplicate ids; fails with
    /// [`DiscoveryError::UnknownLayer`] if any id (requested or
    /// depended-upon) is absent from the registry.
    pub fn resolve(&self, requested: &[String]) -> DiscoveryResult<Vec<String>> {
        let mut resolved: HashSet<String> = HashSet::new();
        for layer_id in requested {
            self.resolve_into(layer_id, &mut resolved)?;
        }
        let mut ordered: Vec<String> = resolved.into_iter().collect();
        ordered.sort_by_key(|id| self.layers[id].layer_number);
        Ok(ordered)
    }

    fn resolve_into(&self, layer_id: &str, resolved: &mut HashSet<String>) -> DiscoveryResult<()> {
        if resolved.contains(layer_id) {
            return Ok(());
        }
        let def = self
            .layers
            .get(layer_id)
            .ok_or_else(|| DiscoveryError::UnknownLayer(layer_id.to_string()))?;
        for dep in &def.depends_on {
            self.resolve_into(dep, resolved)?;
        }
        resolved.insert(layer_id.to_string());
        Ok(())
    }
}

fn builtin_definitions() -> Vec<LayerDefinition> {
    vec![
        LayerDefinition::new("inventory", 1, "Inventory", "What exists in this subscription")
            .operations(&["graph_inventory_discovery"]),
        LayerDefinition::new("topology", 2, "Topology", "How resources are connected")
            .depends_on(&["inventory"])
            .operations(&["graph_topology_discovery"]),
        LayerDefinition::new("identity_access", 3, "Identity & Access", "Who can do what")
            .depends_on(&["inventory"])
            .operations(&["graph_identity_discovery", "graph_policy_discovery"]),
        LayerDefinition::new("data_flow", 4, "Data Flow", "How data moves between resources")
            .depends_on(&["inventory", "topology"])
            .collection_uses_ai()
            .disabled(),
        LayerDefinition::new(
            "dependencies",
            5,
            "Dependencies",
            "Runtime and configuration dependencies",
        )
        .depends_on(&["inventory", "topology"])
        .collection_uses_ai()
        .disabled(),
        LayerDefinition::new(
            "governance",
            6,
            "Governance",
            "Policy compliance and tagging standards",
        )
        .depends_on(&["inventory"])
        .disabled(),
        LayerDefinition::new(
            "ha_dr",
            7,
            "HA/DR",
            "High availability and disaster recovery posture",
        )
        .depends_on(&["inventory", "topology"])
        .disabled(),
        LayerDefinition::new(
            "operations_cost",
            8,
            "Operations & Cost",
            "Operational health and cost optimization",
        )
        .depends_on(&["inventory"])
        .operations(&["cost_discovery"])
        .disabled(),
    ]
}
