//! Boundary event routing.
//!
//! A boundary instance decides per signal whether it still means anything:
//! ordinary boundaries fire only while their host is genuinely active,
//! compensation boundaries only once the host has completed and is no longer
//! running. In every other case the boundary tears itself down.

use crate::error::{FlowError, Result};
use crate::event::{NodeScopeResolver, VarResolver};
use crate::events::RuntimeEvent;
use crate::node::{NodeInstance, NodeInstanceKind};
use crate::process::ProcessInstance;
use crate::types::*;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// First live instance of `attached_to` that counts as active for this
/// signal, if any.
///
/// An instance whose unique id is still activating does not count. For
/// timer-class signals the payload must name the candidate instance itself;
/// other signal types match any occurrence of the host.
pub(crate) fn find_active_host(
    node_instances: &[&NodeInstance],
    activating: &BTreeSet<String>,
    attached_to: &str,
    event_type: &str,
    payload: &Value,
) -> Option<NodeInstanceId> {
    node_instances
        .iter()
        .filter(|n| n.node_id() == attached_to && !activating.contains(n.node_id()))
        .find(|n| !is_timer_event(event_type) || n.id().matches_payload(payload))
        .map(|n| n.id())
}

struct BoundaryView {
    attached_to: String,
    host_instance: Option<NodeInstanceId>,
    cancel_activity: bool,
}

impl ProcessInstance {
    fn boundary_view(&self, id: NodeInstanceId) -> Result<BoundaryView> {
        match &self.node_instance(id)?.kind {
            NodeInstanceKind::Boundary {
                attached_to,
                host_instance,
                cancel_activity,
                ..
            } => Ok(BoundaryView {
                attached_to: attached_to.clone(),
                host_instance: *host_instance,
                cancel_activity: *cancel_activity,
            }),
            _ => Err(FlowError::Inconsistent(format!(
                "node instance {id} is not a boundary event"
            ))),
        }
    }

    /// Route a signal to boundary instance `id`, resolving variables with
    /// the boundary's own scope.
    pub fn signal_boundary(
        &mut self,
        id: NodeInstanceId,
        event_type: &str,
        payload: &Value,
    ) -> Result<SignalOutcome> {
        self.signal_boundary_with(id, event_type, payload, &NodeScopeResolver)
    }

    pub fn signal_boundary_with(
        &mut self,
        id: NodeInstanceId,
        event_type: &str,
        payload: &Value,
        resolver: &dyn VarResolver,
    ) -> Result<SignalOutcome> {
        debug!(node_instance = %id, event_type, %payload, "boundary event signal received");
        let view = self.boundary_view(id)?;
        let instance = self.node_instance_mut(id)?;
        if instance.state() != NodeInstanceState::Active {
            return Err(FlowError::IllegalTransition {
                id,
                from: instance.state(),
                action: "signal",
            });
        }
        instance.trigger_time.get_or_insert_with(Utc::now);

        // a timer raised for another occurrence of the host is not ours
        if is_timer_event(event_type) {
            if let Some(host) = view.host_instance {
                if !host.matches_payload(payload) {
                    debug!(node_instance = %id, host = %host, "timer for another host occurrence");
                    self.record(RuntimeEvent::SignalIgnored {
                        node_instance_id: id,
                        event_type: event_type.to_string(),
                    });
                    return Ok(SignalOutcome::Ignored);
                }
            }
        }

        let node_instances = self.get_node_instances(true)?;
        let active_host = find_active_host(
            &node_instances,
            self.activating_node_ids(),
            &view.attached_to,
            event_type,
            payload,
        );
        let host_completed = self.completed_node_ids().contains(&view.attached_to);
        let own_host_active = view.host_instance.filter(|h| {
            node_instances.iter().any(|n| n.id() == *h)
                && !self.activating_node_ids().contains(&view.attached_to)
        });

        let fire = if is_compensation_event(event_type) {
            active_host.is_none() && host_completed
        } else {
            active_host.is_some()
        };
        debug!(
            node_instance = %id,
            attached_to = %view.attached_to,
            host_active = active_host.is_some(),
            host_completed,
            fire,
            "boundary routing decision"
        );

        if !fire {
            self.cancel(id, CancelType::Obsolete)?;
            return Ok(SignalOutcome::Cancelled);
        }

        // a bound boundary only ever interrupts its own occurrence
        let interrupt = if view.cancel_activity && !is_compensation_event(event_type) {
            match view.host_instance {
                Some(_) => own_host_active,
                None => active_host,
            }
        } else {
            None
        };
        let outcome = self.fire_event_node(id, event_type, payload, resolver, interrupt)?;
        if outcome == SignalOutcome::Fired {
            self.record(RuntimeEvent::BoundaryFired {
                node_instance_id: id,
                attached_to: view.attached_to,
                event_type: event_type.to_string(),
                interrupted: interrupt,
            });
        }
        Ok(outcome)
    }

    /// Boundary teardown: drop the process-scoped listener and leave the
    /// container. Container removal alone would leave the subscription behind.
    ///
    /// Leaving the top-level scope may be what makes the process idle.
    pub(crate) fn cancel_boundary(
        &mut self,
        id: NodeInstanceId,
        cancel_type: CancelType,
    ) -> Result<()> {
        let view = self.boundary_view(id)?;
        self.unsubscribe(id)?;
        let instance = self.detach(id, NodeInstanceState::Cancelled)?;
        self.record(RuntimeEvent::BoundaryCancelled {
            node_instance_id: id,
            attached_to: view.attached_to.clone(),
            cancel_type,
        });
        debug!(node_instance = %id, attached_to = %view.attached_to, ?cancel_type, "boundary cancelled");

        if instance.container() == ContainerScope::Process {
            self.complete_if_idle()?;
        }
        Ok(())
    }

    /// Live boundaries bound to host occurrence `host`, in id order.
    pub(crate) fn bound_boundaries(&self, host: NodeInstanceId) -> Result<Vec<NodeInstanceId>> {
        Ok(self
            .get_node_instances(true)?
            .into_iter()
            .filter(|n| {
                matches!(n.kind(), NodeInstanceKind::Boundary { host_instance: Some(h), .. } if *h == host)
            })
            .map(|n| n.id())
            .collect())
    }

    /// Cancel the boundaries bound to `host` as it leaves `Active`, except
    /// `spare`. With `keep_compensation` compensation boundaries stay live.
    pub(crate) fn release_boundaries(
        &mut self,
        host: NodeInstanceId,
        keep_compensation: bool,
        spare: Option<NodeInstanceId>,
    ) -> Result<()> {
        for id in self.bound_boundaries(host)? {
            if Some(id) == spare || !self.is_live(id) {
                continue;
            }
            if keep_compensation && self.is_compensation_boundary(id) {
                continue;
            }
            self.cancel_boundary(id, CancelType::Obsolete)?;
        }
        Ok(())
    }

    pub(crate) fn is_compensation_boundary(&self, id: NodeInstanceId) -> bool {
        self.node_instance(id).is_ok_and(|n| {
            n.is_boundary()
                && n
                    .subscription()
                    .is_some_and(|s| is_compensation_event(&s.event_type))
        })
    }

    /// Create and trigger one boundary instance per boundary definition
    /// attached to the host's node, bound to this host occurrence.
    pub(crate) fn attach_boundaries(&mut self, host: NodeInstanceId) -> Result<()> {
        let instance = self.node_instance(host)?;
        let scope = instance.container();
        let definition = Arc::clone(self.definition());
        let boundaries = definition.boundaries_attached_to(instance.node_id());

        for boundary in boundaries {
            let id = self.create_node_instance(&boundary.unique_id, scope)?;
            if let NodeInstanceKind::Boundary { host_instance, .. } =
                &mut self.node_instance_mut(id)?.kind
            {
                *host_instance = Some(host);
            }
            self.trigger(id)?;
        }
        Ok(())
    }
}
