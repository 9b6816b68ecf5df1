//! Event node instances: a subscription to one event type with the owning
//! process instance, plus the default "complete on matching signal" handling
//! that boundary instances forward to.

use crate::error::{FlowError, Result};
use crate::events::RuntimeEvent;
use crate::process::ProcessInstance;
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The listener an event node instance holds while it is active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub event_type: String,
    pub listener: ListenerToken,
}

impl EventSubscription {
    pub fn new(event_type: &str, id: NodeInstanceId) -> Self {
        Self {
            event_type: event_type.to_string(),
            listener: ListenerToken(id),
        }
    }
}

/// Resolves variable names referenced by output mappings. Called while the
/// signal is handled, never at subscription time.
pub trait VarResolver {
    fn resolve(
        &self,
        process: &ProcessInstance,
        node_instance: NodeInstanceId,
        name: &str,
    ) -> Result<Value>;
}

impl<F> VarResolver for F
where
    F: Fn(&str) -> Result<Value>,
{
    fn resolve(&self, _: &ProcessInstance, _: NodeInstanceId, name: &str) -> Result<Value> {
        self(name)
    }
}

/// Default resolver: the signalled instance's own scope, then its enclosing
/// scopes up to the process variables.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeScopeResolver;

impl VarResolver for NodeScopeResolver {
    fn resolve(
        &self,
        process: &ProcessInstance,
        node_instance: NodeInstanceId,
        name: &str,
    ) -> Result<Value> {
        process.resolve_variable(node_instance, name)
    }
}

impl ProcessInstance {
    /// Register the instance's listener. Exactly one registration per active
    /// event instance.
    pub(crate) fn subscribe(&mut self, id: NodeInstanceId) -> Result<()> {
        let instance = self.node_instance(id)?;
        let scope = instance.container();
        let subscription = instance
            .subscription()
            .cloned()
            .ok_or_else(|| FlowError::Inconsistent(format!("node instance {id} has no event")))?;

        if !self.listeners_mut().add_event_listener(
            &subscription.event_type,
            subscription.listener,
            scope,
        ) {
            return Err(FlowError::Inconsistent(format!(
                "listener for node instance {id} already registered on {}",
                subscription.event_type
            )));
        }
        self.record(RuntimeEvent::ListenerRegistered {
            node_instance_id: id,
            event_type: subscription.event_type.clone(),
        });
        debug!(node_instance = %id, event_type = %subscription.event_type, "listener registered");
        Ok(())
    }

    /// Deregister the instance's listener. A missing registration means it
    /// was torn down twice.
    pub(crate) fn unsubscribe(&mut self, id: NodeInstanceId) -> Result<()> {
        let subscription = self
            .node_instance(id)?
            .subscription()
            .cloned()
            .ok_or_else(|| FlowError::Inconsistent(format!("node instance {id} has no event")))?;

        if !self.remove_event_listener(&subscription.event_type, subscription.listener, true) {
            return Err(FlowError::Inconsistent(format!(
                "no listener registered for node instance {id} on {}",
                subscription.event_type
            )));
        }
        self.record(RuntimeEvent::ListenerRemoved {
            node_instance_id: id,
            event_type: subscription.event_type,
        });
        Ok(())
    }

    /// Default event handling: on a matching event type, write the payload
    /// derived variables into the enclosing scope and complete the instance.
    ///
    /// `interrupt` names a host occurrence to cancel before completion
    /// (interrupting boundaries). Resolution failures surface before
    /// anything is mutated.
    pub(crate) fn fire_event_node(
        &mut self,
        id: NodeInstanceId,
        event_type: &str,
        payload: &Value,
        resolver: &dyn VarResolver,
        interrupt: Option<NodeInstanceId>,
    ) -> Result<SignalOutcome> {
        let instance = self.node_instance(id)?;
        if instance.state() != NodeInstanceState::Active {
            return Err(FlowError::IllegalTransition {
                id,
                from: instance.state(),
                action: "signal",
            });
        }
        let scope = instance.container();
        let definition = std::sync::Arc::clone(self.definition());
        let spec = definition
            .node(instance.node_id())?
            .event_spec()
            .ok_or_else(|| FlowError::Inconsistent(format!("node instance {id} has no event")))?;

        if spec.event_type != event_type {
            debug!(node_instance = %id, event_type, expected = %spec.event_type, "signal type mismatch ignored");
            self.record(RuntimeEvent::SignalIgnored {
                node_instance_id: id,
                event_type: event_type.to_string(),
            });
            return Ok(SignalOutcome::Ignored);
        }

        let mut assignments = Vec::with_capacity(spec.output_mappings.len() + 1);
        if let Some(variable) = &spec.variable_name {
            assignments.push((variable.clone(), payload.clone()));
        }
        for mapping in &spec.output_mappings {
            let value = if mapping.source == EVENT_PAYLOAD_REF {
                payload.clone()
            } else if let Some(field) = payload.get(&mapping.source) {
                field.clone()
            } else {
                resolver.resolve(self, id, &mapping.source)?
            };
            assignments.push((mapping.target.clone(), value));
        }

        if let Some(host) = interrupt {
            if self.is_live(host) {
                self.cancel_sparing(host, CancelType::Obsolete, Some(id))?;
            } else {
                warn!(node_instance = %id, host = %host, "interrupted host already gone");
            }
        }
        for (name, value) in assignments {
            self.set_variable_in_scope(scope, &name, value)?;
        }
        self.complete(id)?;
        Ok(SignalOutcome::Fired)
    }
}
