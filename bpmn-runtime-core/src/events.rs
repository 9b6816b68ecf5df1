use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Runtime events: the audit trail for every process instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    InstanceStarted {
        process_id: String,
    },
    NodeTriggered {
        node_instance_id: NodeInstanceId,
        node_id: String,
        container: ContainerScope,
    },
    NodeCompleted {
        node_instance_id: NodeInstanceId,
        node_id: String,
    },
    NodeCancelled {
        node_instance_id: NodeInstanceId,
        node_id: String,
        cancel_type: CancelType,
    },
    ListenerRegistered {
        node_instance_id: NodeInstanceId,
        event_type: String,
    },
    ListenerRemoved {
        node_instance_id: NodeInstanceId,
        event_type: String,
    },
    SignalReceived {
        event_type: String,
        payload: Value,
    },
    /// Signal delivered but not addressed to this node instance.
    SignalIgnored {
        node_instance_id: NodeInstanceId,
        event_type: String,
    },
    BoundaryFired {
        node_instance_id: NodeInstanceId,
        attached_to: String,
        event_type: String,
        /// Host occurrence cancelled by an interrupting boundary.
        interrupted: Option<NodeInstanceId>,
    },
    BoundaryCancelled {
        node_instance_id: NodeInstanceId,
        attached_to: String,
        cancel_type: CancelType,
    },
    ProcessCompleted,
    ProcessAborted,
}

/// Append-only destination for audit events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Append an event and return its sequence number.
    async fn append_event(&self, instance_id: Uuid, event: &RuntimeEvent) -> Result<u64>;
    async fn read_events(&self, instance_id: Uuid, from_seq: u64)
        -> Result<Vec<(u64, RuntimeEvent)>>;
}

/// In-memory sink. Sequence numbers are global and start at 1.
#[derive(Default)]
pub struct MemoryEventSink {
    seq: AtomicU64,
    events: RwLock<HashMap<Uuid, Vec<(u64, RuntimeEvent)>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn append_event(&self, instance_id: Uuid, event: &RuntimeEvent) -> Result<u64> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.events
            .write()
            .await
            .entry(instance_id)
            .or_default()
            .push((seq, event.clone()));
        Ok(seq)
    }

    async fn read_events(
        &self,
        instance_id: Uuid,
        from_seq: u64,
    ) -> Result<Vec<(u64, RuntimeEvent)>> {
        Ok(self
            .events
            .read()
            .await
            .get(&instance_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|(seq, _)| *seq >= from_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
