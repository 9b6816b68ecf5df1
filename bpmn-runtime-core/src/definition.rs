//! Static process graph, read-only at runtime.
//!
//! Definitions are assembled through [`ProcessDefinitionBuilder`]; how they are
//! authored or parsed is left to the caller.

use crate::error::{FlowError, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Maps a signal-derived value onto a variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataMapping {
    /// `"event"` for the raw payload, a payload field name, or a variable
    /// name handed to the resolver.
    pub source: String,
    pub target: String,
}

/// Subscription carried by event and boundary nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub event_type: String,
    /// Variable receiving the raw payload, if any.
    #[serde(default)]
    pub variable_name: Option<String>,
    #[serde(default)]
    pub output_mappings: Vec<DataMapping>,
}

impl EventSpec {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            variable_name: None,
            output_mappings: Vec::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    pub fn with_mapping(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.output_mappings.push(DataMapping {
            source: source.into(),
            target: target.into(),
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Any wait-state activity (task, call). Completed from outside.
    Activity,
    /// Composite scope; starts `start_nodes` inside its own container.
    SubProcess { start_nodes: Vec<String> },
    /// Intermediate catch event.
    Event { event: EventSpec },
    /// Event handler attached to `attached_to`.
    Boundary {
        event: EventSpec,
        attached_to: String,
        #[serde(default = "default_cancel_activity")]
        cancel_activity: bool,
    },
}

fn default_cancel_activity() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub unique_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl NodeDefinition {
    pub fn activity(unique_id: impl Into<String>) -> Self {
        Self::new(unique_id, NodeKind::Activity)
    }

    pub fn sub_process(unique_id: impl Into<String>, start_nodes: &[&str]) -> Self {
        Self::new(
            unique_id,
            NodeKind::SubProcess {
                start_nodes: start_nodes.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn event(unique_id: impl Into<String>, event: EventSpec) -> Self {
        Self::new(unique_id, NodeKind::Event { event })
    }

    pub fn boundary(
        unique_id: impl Into<String>,
        attached_to: impl Into<String>,
        event: EventSpec,
        cancel_activity: bool,
    ) -> Self {
        Self::new(
            unique_id,
            NodeKind::Boundary {
                event,
                attached_to: attached_to.into(),
                cancel_activity,
            },
        )
    }

    fn new(unique_id: impl Into<String>, kind: NodeKind) -> Self {
        let unique_id = unique_id.into();
        Self {
            name: unique_id.clone(),
            unique_id,
            kind,
        }
    }

    pub fn event_spec(&self) -> Option<&EventSpec> {
        match &self.kind {
            NodeKind::Event { event } | NodeKind::Boundary { event, .. } => Some(event),
            _ => None,
        }
    }

    pub fn attached_to(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Boundary { attached_to, .. } => Some(attached_to),
            _ => None,
        }
    }
}

/// A loaded process: nodes plus the sequence-flow graph between them.
#[derive(Debug)]
pub struct ProcessDefinition {
    id: String,
    nodes: BTreeMap<String, NodeDefinition>,
    start_nodes: Vec<String>,
    graph: DiGraph<String, ()>,
    node_index_map: HashMap<String, NodeIndex>,
}

impl ProcessDefinition {
    pub fn builder(id: impl Into<String>) -> ProcessDefinitionBuilder {
        ProcessDefinitionBuilder {
            id: id.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            start_nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node(&self, unique_id: &str) -> Result<&NodeDefinition> {
        self.nodes
            .get(unique_id)
            .ok_or_else(|| FlowError::UnknownNode(unique_id.to_string()))
    }

    pub fn start_nodes(&self) -> &[String] {
        &self.start_nodes
    }

    /// Targets of the outgoing connections of `unique_id`, in declaration order.
    pub fn successors(&self, unique_id: &str) -> Vec<&str> {
        let Some(&idx) = self.node_index_map.get(unique_id) else {
            return Vec::new();
        };
        // petgraph walks edges newest-first
        let mut targets: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].as_str())
            .collect();
        targets.reverse();
        targets
    }

    /// Boundary nodes attached to `unique_id`, ordered by unique id.
    pub fn boundaries_attached_to(&self, unique_id: &str) -> Vec<&NodeDefinition> {
        self.nodes
            .values()
            .filter(|n| n.attached_to() == Some(unique_id))
            .collect()
    }
}

pub struct ProcessDefinitionBuilder {
    id: String,
    nodes: Vec<NodeDefinition>,
    connections: Vec<(String, String)>,
    start_nodes: Vec<String>,
}

impl ProcessDefinitionBuilder {
    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn connect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.connections.push((from.into(), to.into()));
        self
    }

    pub fn start_node(mut self, unique_id: impl Into<String>) -> Self {
        self.start_nodes.push(unique_id.into());
        self
    }

    /// Validate references and build the graph.
    pub fn build(self) -> Result<ProcessDefinition> {
        let mut graph = DiGraph::new();
        let mut node_index_map: HashMap<String, NodeIndex> = HashMap::new();
        let mut nodes = BTreeMap::new();

        for node in self.nodes {
            if nodes.contains_key(&node.unique_id) {
                return Err(FlowError::InvalidDefinition(format!(
                    "duplicate node id: {}",
                    node.unique_id
                )));
            }
            let idx = graph.add_node(node.unique_id.clone());
            node_index_map.insert(node.unique_id.clone(), idx);
            nodes.insert(node.unique_id.clone(), node);
        }

        for (from, to) in &self.connections {
            let (Some(&a), Some(&b)) = (node_index_map.get(from), node_index_map.get(to)) else {
                return Err(FlowError::InvalidDefinition(format!(
                    "connection {from} -> {to} references an unknown node"
                )));
            };
            graph.add_edge(a, b, ());
        }

        for node in nodes.values() {
            match &node.kind {
                NodeKind::Boundary { attached_to, .. } => {
                    if attached_to == &node.unique_id || !nodes.contains_key(attached_to) {
                        return Err(FlowError::InvalidDefinition(format!(
                            "boundary {} attached to unknown node {attached_to}",
                            node.unique_id
                        )));
                    }
                }
                NodeKind::SubProcess { start_nodes } => {
                    if let Some(missing) = start_nodes.iter().find(|s| !nodes.contains_key(*s)) {
                        return Err(FlowError::InvalidDefinition(format!(
                            "sub-process {} starts unknown node {missing}",
                            node.unique_id
                        )));
                    }
                }
                NodeKind::Activity | NodeKind::Event { .. } => {}
            }
        }

        if let Some(missing) = self.start_nodes.iter().find(|s| !nodes.contains_key(*s)) {
            return Err(FlowError::InvalidDefinition(format!(
                "unknown start node {missing}"
            )));
        }

        Ok(ProcessDefinition {
            id: self.id,
            nodes,
            start_nodes: self.start_nodes,
            graph,
            node_index_map,
        })
    }
}
