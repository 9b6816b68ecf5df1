use crate::container::{collect_node_instances, NodeInstanceContainer};
use crate::definition::ProcessDefinition;
use crate::error::{FlowError, Result};
use crate::event::{NodeScopeResolver, VarResolver};
use crate::events::RuntimeEvent;
use crate::listener::ListenerRegistry;
use crate::node::{NodeInstance, NodeInstanceKind};
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// A running process: the top-level node-instance container plus the
/// process-wide bookkeeping every nested node instance reads.
///
/// All mutation goes through `&mut self`; callers serialise access per
/// instance (see `ProcessRuntime`).
#[derive(Debug)]
pub struct ProcessInstance {
    id: Uuid,
    definition: Arc<ProcessDefinition>,
    state: ProcessState,
    root: NodeInstanceContainer,
    arena: BTreeMap<NodeInstanceId, NodeInstance>,
    next_id: u64,
    /// Unique ids of nodes currently inside their entry procedure.
    activating_node_ids: BTreeSet<String>,
    /// Unique ids of nodes that finished normally.
    completed_node_ids: BTreeSet<String>,
    listeners: ListenerRegistry,
    variables: BTreeMap<String, Value>,
    pending_events: Vec<RuntimeEvent>,
}

impl ProcessInstance {
    pub fn new(definition: Arc<ProcessDefinition>, variables: BTreeMap<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            definition,
            state: ProcessState::Active,
            root: NodeInstanceContainer::new(ContainerScope::Process),
            arena: BTreeMap::new(),
            next_id: 1,
            activating_node_ids: BTreeSet::new(),
            completed_node_ids: BTreeSet::new(),
            listeners: ListenerRegistry::new(),
            variables,
            pending_events: Vec::new(),
        }
    }

    /// Trigger every start node of the definition in the top-level scope.
    pub fn start(&mut self) -> Result<()> {
        self.record(RuntimeEvent::InstanceStarted {
            process_id: self.definition.id().to_string(),
        });
        info!(process_instance = %self.id, process_id = %self.definition.id(), "process instance started");
        let definition = Arc::clone(&self.definition);
        for node_id in definition.start_nodes() {
            self.start_node(node_id, ContainerScope::Process)?;
        }
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn definition(&self) -> &Arc<ProcessDefinition> {
        &self.definition
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn activating_node_ids(&self) -> &BTreeSet<String> {
        &self.activating_node_ids
    }

    pub fn completed_node_ids(&self) -> &BTreeSet<String> {
        &self.completed_node_ids
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub(crate) fn listeners_mut(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    pub fn remove_event_listener(
        &mut self,
        event_type: &str,
        token: ListenerToken,
        recursive: bool,
    ) -> bool {
        self.listeners
            .remove_event_listener(event_type, token, recursive)
    }

    // ── Node instances ──

    pub fn node_instance(&self, id: NodeInstanceId) -> Result<&NodeInstance> {
        self.arena.get(&id).ok_or(FlowError::UnknownNodeInstance(id))
    }

    pub(crate) fn node_instance_mut(&mut self, id: NodeInstanceId) -> Result<&mut NodeInstance> {
        self.arena
            .get_mut(&id)
            .ok_or(FlowError::UnknownNodeInstance(id))
    }

    pub(crate) fn arena_mut(&mut self) -> &mut BTreeMap<NodeInstanceId, NodeInstance> {
        &mut self.arena
    }

    pub(crate) fn next_node_instance_id(&mut self) -> NodeInstanceId {
        let id = NodeInstanceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Live node instances of the top-level scope, and with `recursive` of
    /// every nested sub-process scope as well.
    pub fn get_node_instances(&self, recursive: bool) -> Result<Vec<&NodeInstance>> {
        collect_node_instances(&self.root, &self.arena, recursive)
    }

    pub fn container(&self, scope: ContainerScope) -> Result<&NodeInstanceContainer> {
        match scope {
            ContainerScope::Process => Ok(&self.root),
            ContainerScope::Composite(id) => {
                self.node_instance(id)?.nested_container().ok_or_else(|| {
                    FlowError::Inconsistent(format!("node instance {id} is not a container"))
                })
            }
        }
    }

    pub(crate) fn container_mut(
        &mut self,
        scope: ContainerScope,
    ) -> Result<&mut NodeInstanceContainer> {
        match scope {
            ContainerScope::Process => Ok(&mut self.root),
            ContainerScope::Composite(id) => {
                self.node_instance_mut(id)?
                    .nested_container_mut()
                    .ok_or_else(|| {
                        FlowError::Inconsistent(format!("node instance {id} is not a container"))
                    })
            }
        }
    }

    // ── Entry / exit bookkeeping ──

    /// Returns false if the node was already marked by an outer entry.
    pub(crate) fn begin_activation(&mut self, node_id: &str) -> bool {
        self.activating_node_ids.insert(node_id.to_string())
    }

    pub(crate) fn end_activation(&mut self, node_id: &str) {
        self.activating_node_ids.remove(node_id);
    }

    pub(crate) fn mark_completed(&mut self, node_id: &str) {
        self.completed_node_ids.insert(node_id.to_string());
    }

    /// Complete the process once nothing but compensation handlers is left
    /// at the top level and at least one node finished normally. The
    /// leftover handlers are cancelled with it.
    pub(crate) fn complete_if_idle(&mut self) -> Result<()> {
        if self.state != ProcessState::Active || self.completed_node_ids.is_empty() {
            return Ok(());
        }
        let remaining = self.root.node_instance_ids();
        if !remaining.iter().all(|id| self.is_compensation_boundary(*id)) {
            return Ok(());
        }

        // flip first: the teardown below re-enters this check
        self.state = ProcessState::Completed;
        for id in remaining {
            if self.is_live(id) {
                self.cancel(id, CancelType::Obsolete)?;
            }
        }
        self.record(RuntimeEvent::ProcessCompleted);
        info!(process_instance = %self.id, "process instance completed");
        Ok(())
    }

    // ── Signals ──

    /// Deliver a signal to every listener subscribed to `event_type`.
    ///
    /// Listeners are snapshotted first; one handler may tear down another
    /// subscriber, which is then skipped.
    pub fn signal_event(
        &mut self,
        event_type: &str,
        payload: Value,
    ) -> Result<Vec<(NodeInstanceId, SignalOutcome)>> {
        let tokens = self.listeners.listeners_for(event_type);
        debug!(process_instance = %self.id, event_type, listeners = tokens.len(), "dispatching signal");
        self.record(RuntimeEvent::SignalReceived {
            event_type: event_type.to_string(),
            payload: payload.clone(),
        });

        let mut outcomes = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !self.listeners.is_registered(event_type, token) {
                continue;
            }
            let outcome =
                self.signal_node_with(token.0, event_type, payload.clone(), &NodeScopeResolver)?;
            outcomes.push((token.0, outcome));
        }
        Ok(outcomes)
    }

    /// Signal one node instance, resolving variables from its own scope.
    pub fn signal_node(
        &mut self,
        id: NodeInstanceId,
        event_type: &str,
        payload: Value,
    ) -> Result<SignalOutcome> {
        self.signal_node_with(id, event_type, payload, &NodeScopeResolver)
    }

    pub fn signal_node_with(
        &mut self,
        id: NodeInstanceId,
        event_type: &str,
        payload: Value,
        resolver: &dyn VarResolver,
    ) -> Result<SignalOutcome> {
        let (boundary, event) = match self.node_instance(id)?.kind() {
            NodeInstanceKind::Boundary { .. } => (true, false),
            NodeInstanceKind::Event { .. } => (false, true),
            NodeInstanceKind::Activity | NodeInstanceKind::SubProcess { .. } => (false, false),
        };
        if boundary {
            self.signal_boundary_with(id, event_type, &payload, resolver)
        } else if event {
            self.fire_event_node(id, event_type, &payload, resolver, None)
        } else {
            Ok(SignalOutcome::Ignored)
        }
    }

    /// Cancel every live node instance and stop the process.
    pub fn abort(&mut self) -> Result<()> {
        // set before teardown so emptying the root cannot complete the process
        self.state = ProcessState::Aborted;
        for id in self.root.node_instance_ids() {
            if self.is_live(id) {
                self.cancel(id, CancelType::Aborted)?;
            }
        }
        self.record(RuntimeEvent::ProcessAborted);
        info!(process_instance = %self.id, "process instance aborted");
        Ok(())
    }

    // ── Variables ──

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    /// Look `name` up in the node instance's scope, then each enclosing
    /// sub-process scope, then the process variables.
    pub fn resolve_variable(&self, id: NodeInstanceId, name: &str) -> Result<Value> {
        let mut instance = self.node_instance(id)?;
        loop {
            if let Some(value) = instance.variable(name) {
                return Ok(value.clone());
            }
            match instance.container() {
                ContainerScope::Composite(parent) => instance = self.node_instance(parent)?,
                ContainerScope::Process => break,
            }
        }
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnresolvedVariable(name.to_string()))
    }

    /// Write into the variables of `scope`: the sub-process instance for a
    /// composite scope, the process otherwise.
    pub fn set_variable_in_scope(
        &mut self,
        scope: ContainerScope,
        name: &str,
        value: Value,
    ) -> Result<()> {
        match scope {
            ContainerScope::Process => {
                self.set_variable(name, value);
            }
            ContainerScope::Composite(id) => {
                self.node_instance_mut(id)?
                    .variables
                    .insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    // ── Audit ──

    pub(crate) fn record(&mut self, event: RuntimeEvent) {
        self.pending_events.push(event);
    }

    /// Take the audit events buffered since the last drain.
    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.pending_events)
    }
}
