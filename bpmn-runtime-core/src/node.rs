//! Generic node-instance lifecycle: `Created → Active → {Completed | Cancelled}`.
//!
//! Node instances live in the process instance's arena; the transitions are
//! methods on [`ProcessInstance`] so they can reach the container, the
//! listener registry and the process-wide bookkeeping sets. Variant-specific
//! behaviour is dispatched on [`NodeInstanceKind`].

use crate::container::NodeInstanceContainer;
use crate::definition::NodeKind;
use crate::error::{FlowError, Result};
use crate::event::EventSubscription;
use crate::events::RuntimeEvent;
use crate::process::ProcessInstance;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Variant data. Boundary-only fields live on the boundary variant.
#[derive(Clone, Debug)]
pub enum NodeInstanceKind {
    Activity,
    SubProcess {
        container: NodeInstanceContainer,
    },
    Event {
        subscription: EventSubscription,
    },
    Boundary {
        subscription: EventSubscription,
        attached_to: String,
        /// Host occurrence this boundary was created for, if any.
        host_instance: Option<NodeInstanceId>,
        cancel_activity: bool,
    },
}

/// One runtime activation of a node definition.
#[derive(Clone, Debug)]
pub struct NodeInstance {
    id: NodeInstanceId,
    node_id: String,
    container: ContainerScope,
    state: NodeInstanceState,
    pub(crate) trigger_time: Option<DateTime<Utc>>,
    pub(crate) variables: BTreeMap<String, Value>,
    pub(crate) kind: NodeInstanceKind,
}

impl NodeInstance {
    pub fn id(&self) -> NodeInstanceId {
        self.id
    }

    /// Unique id of the node definition this instance activates.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn container(&self) -> ContainerScope {
        self.container
    }

    pub fn state(&self) -> NodeInstanceState {
        self.state
    }

    pub fn trigger_time(&self) -> Option<DateTime<Utc>> {
        self.trigger_time
    }

    pub fn kind(&self) -> &NodeInstanceKind {
        &self.kind
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn subscription(&self) -> Option<&EventSubscription> {
        match &self.kind {
            NodeInstanceKind::Event { subscription }
            | NodeInstanceKind::Boundary { subscription, .. } => Some(subscription),
            _ => None,
        }
    }

    pub fn nested_container(&self) -> Option<&NodeInstanceContainer> {
        match &self.kind {
            NodeInstanceKind::SubProcess { container } => Some(container),
            _ => None,
        }
    }

    /// Snapshot of the nested container's members; empty for non-composites.
    pub fn nested_member_ids(&self) -> Vec<NodeInstanceId> {
        self.nested_container()
            .map(NodeInstanceContainer::node_instance_ids)
            .unwrap_or_default()
    }

    pub(crate) fn nested_container_mut(&mut self) -> Option<&mut NodeInstanceContainer> {
        match &mut self.kind {
            NodeInstanceKind::SubProcess { container } => Some(container),
            _ => None,
        }
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, NodeInstanceKind::Boundary { .. })
    }

    fn expect_state(&self, expected: NodeInstanceState, action: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(FlowError::IllegalTransition {
                id: self.id,
                from: self.state,
                action,
            });
        }
        Ok(())
    }
}

impl ProcessInstance {
    /// Instantiate `node_id` inside `scope`. The instance starts in `Created`
    /// and joins its container only when triggered.
    pub fn create_node_instance(
        &mut self,
        node_id: &str,
        scope: ContainerScope,
    ) -> Result<NodeInstanceId> {
        let definition = Arc::clone(self.definition());
        let node = definition.node(node_id)?;
        // scope must exist before anything is allocated
        self.container(scope)?;

        let id = self.next_node_instance_id();
        let kind = match &node.kind {
            NodeKind::Activity => NodeInstanceKind::Activity,
            NodeKind::SubProcess { .. } => NodeInstanceKind::SubProcess {
                container: NodeInstanceContainer::new(ContainerScope::Composite(id)),
            },
            NodeKind::Event { event } => NodeInstanceKind::Event {
                subscription: EventSubscription::new(&event.event_type, id),
            },
            NodeKind::Boundary {
                event,
                attached_to,
                cancel_activity,
            } => NodeInstanceKind::Boundary {
                subscription: EventSubscription::new(&event.event_type, id),
                attached_to: attached_to.clone(),
                host_instance: None,
                cancel_activity: *cancel_activity,
            },
        };

        self.arena_mut().insert(
            id,
            NodeInstance {
                id,
                node_id: node_id.to_string(),
                container: scope,
                state: NodeInstanceState::Created,
                trigger_time: None,
                variables: BTreeMap::new(),
                kind,
            },
        );
        debug!(node_instance = %id, node_id, %scope, "node instance created");
        Ok(id)
    }

    /// Create and trigger in one step.
    pub fn start_node(&mut self, node_id: &str, scope: ContainerScope) -> Result<NodeInstanceId> {
        let id = self.create_node_instance(node_id, scope)?;
        self.trigger(id)?;
        Ok(id)
    }

    /// `Created → Active`. Joins the owning container and runs the entry
    /// procedure while the node's unique id is marked activating.
    pub fn trigger(&mut self, id: NodeInstanceId) -> Result<()> {
        let instance = self.node_instance_mut(id)?;
        instance.expect_state(NodeInstanceState::Created, "trigger")?;
        instance.state = NodeInstanceState::Active;
        instance.trigger_time.get_or_insert_with(Utc::now);
        let node_id = instance.node_id.clone();
        let scope = instance.container;

        self.container_mut(scope)?.add_node_instance(id)?;
        let marked = self.begin_activation(&node_id);
        self.record(RuntimeEvent::NodeTriggered {
            node_instance_id: id,
            node_id: node_id.clone(),
            container: scope,
        });
        debug!(node_instance = %id, node_id = %node_id, "node instance triggered");

        let entered = self.enter(id);
        if marked {
            self.end_activation(&node_id);
        }
        entered
    }

    fn enter(&mut self, id: NodeInstanceId) -> Result<()> {
        let instance = self.node_instance(id)?;
        if instance.subscription().is_some() {
            return self.subscribe(id);
        }
        let node_id = instance.node_id.clone();
        let composite = instance.nested_container().is_some();

        self.attach_boundaries(id)?;
        if composite {
            let definition = Arc::clone(self.definition());
            if let NodeKind::SubProcess { start_nodes } = &definition.node(&node_id)?.kind {
                for start in start_nodes {
                    self.start_node(start, ContainerScope::Composite(id))?;
                }
            }
        }
        Ok(())
    }

    /// `Active → Completed`. Detaches the instance, records its unique id as
    /// completed and triggers the outgoing connections in the same container.
    pub fn complete(&mut self, id: NodeInstanceId) -> Result<()> {
        let instance = self.node_instance(id)?;
        instance.expect_state(NodeInstanceState::Active, "complete")?;
        let node_id = instance.node_id.clone();
        let scope = instance.container;
        let subscribed = instance.subscription().is_some();
        let nested = instance.nested_member_ids();

        if subscribed {
            self.unsubscribe(id)?;
        }
        // whatever still runs inside a finished scope is obsolete
        for child in nested {
            if self.is_live(child) {
                self.cancel(child, CancelType::Obsolete)?;
            }
        }
        // compensation handlers outlive the host; every other boundary is moot
        self.release_boundaries(id, true, None)?;

        self.detach(id, NodeInstanceState::Completed)?;
        self.mark_completed(&node_id);
        self.record(RuntimeEvent::NodeCompleted {
            node_instance_id: id,
            node_id: node_id.clone(),
        });
        info!(node_instance = %id, node_id = %node_id, "node instance completed");

        let definition = Arc::clone(self.definition());
        for next in definition.successors(&node_id) {
            self.start_node(next, scope)?;
        }

        if scope == ContainerScope::Process {
            self.complete_if_idle()?;
        }
        Ok(())
    }

    /// `Active → Cancelled`. Releases listeners, nested members and the
    /// boundaries bound to this occurrence, then detaches. Cancelling an
    /// instance that is no longer live is a consistency violation, not a no-op.
    pub fn cancel(&mut self, id: NodeInstanceId, cancel_type: CancelType) -> Result<()> {
        self.cancel_sparing(id, cancel_type, None)
    }

    /// Cancel, leaving boundary `spare` attached. Used by an interrupting
    /// boundary that is itself about to complete.
    pub(crate) fn cancel_sparing(
        &mut self,
        id: NodeInstanceId,
        cancel_type: CancelType,
        spare: Option<NodeInstanceId>,
    ) -> Result<()> {
        let instance = self.node_instance(id).map_err(|_| {
            FlowError::Inconsistent(format!("cancel of detached node instance {id}"))
        })?;
        instance.expect_state(NodeInstanceState::Active, "cancel")?;

        if instance.is_boundary() {
            return self.cancel_boundary(id, cancel_type);
        }
        let subscribed = instance.subscription().is_some();
        let nested = instance.nested_member_ids();

        if subscribed {
            self.unsubscribe(id)?;
        }
        for child in nested {
            // a sibling's teardown may already have taken it
            if self.is_live(child) {
                self.cancel(child, cancel_type)?;
            }
        }
        self.release_boundaries(id, false, spare)?;

        let instance = self.detach(id, NodeInstanceState::Cancelled)?;
        self.record(RuntimeEvent::NodeCancelled {
            node_instance_id: id,
            node_id: instance.node_id.clone(),
            cancel_type,
        });
        debug!(node_instance = %id, node_id = %instance.node_id, ?cancel_type, "node instance cancelled");
        Ok(())
    }

    /// Remove from container and arena, leaving the instance in `state`.
    pub(crate) fn detach(
        &mut self,
        id: NodeInstanceId,
        state: NodeInstanceState,
    ) -> Result<NodeInstance> {
        let scope = self.node_instance(id)?.container;
        self.container_mut(scope)?.remove_node_instance(id)?;
        let mut instance = self
            .arena_mut()
            .remove(&id)
            .ok_or(FlowError::UnknownNodeInstance(id))?;
        instance.state = state;
        Ok(instance)
    }

    pub(crate) fn is_live(&self, id: NodeInstanceId) -> bool {
        self.node_instance(id)
            .is_ok_and(|n| n.state == NodeInstanceState::Active)
    }
}
