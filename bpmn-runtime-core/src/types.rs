use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Protocol constants ───────────────────────────────────────

/// Event types starting with this prefix are timer-class signals. Their
/// payload carries the identity of the node instance the timer belongs to.
pub const TIMER_EVENT_PREFIX: &str = "Timer-";

/// Event types starting with this prefix are compensation requests.
pub const COMPENSATION_EVENT_PREFIX: &str = "Compensation";

/// Name under which an output mapping refers to the raw signal payload.
pub const EVENT_PAYLOAD_REF: &str = "event";

/// Opaque signal payload and variable value.
pub type Value = serde_json::Value;

pub fn is_timer_event(event_type: &str) -> bool {
    event_type.starts_with(TIMER_EVENT_PREFIX)
}

pub fn is_compensation_event(event_type: &str) -> bool {
    event_type.starts_with(COMPENSATION_EVENT_PREFIX)
}

// ─── Identity ─────────────────────────────────────────────────

/// Identity of a node instance, unique within its process instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeInstanceId(pub u64);

impl NodeInstanceId {
    /// True if a timer payload names this node instance. Payloads may carry
    /// the id as a number or as its decimal string.
    pub fn matches_payload(&self, payload: &Value) -> bool {
        match payload {
            Value::Number(n) => n.as_u64() == Some(self.0),
            Value::String(s) => s.parse::<u64>().ok() == Some(self.0),
            _ => false,
        }
    }
}

impl fmt::Display for NodeInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The scope owning a set of live node instances: the process instance
/// itself, or a sub-process node instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContainerScope {
    Process,
    Composite(NodeInstanceId),
}

impl fmt::Display for ContainerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerScope::Process => write!(f, "process"),
            ContainerScope::Composite(id) => write!(f, "composite:{id}"),
        }
    }
}

/// Listener handle registered with the process instance. One per event node
/// instance, so the node instance id doubles as the token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListenerToken(pub NodeInstanceId);

// ─── Lifecycle ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeInstanceState {
    Created,
    Active,
    Completed,
    Cancelled,
}

impl fmt::Display for NodeInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeInstanceState::Created => "created",
            NodeInstanceState::Active => "active",
            NodeInstanceState::Completed => "completed",
            NodeInstanceState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a node instance is being cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelType {
    /// Attachment no longer meaningful (boundary teardown, interrupted host).
    Obsolete,
    /// Process instance or enclosing scope aborted.
    Aborted,
    Skipped,
    Error,
}

/// What a node instance did with a delivered signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalOutcome {
    /// Default handling ran; the instance completed and continued downstream.
    Fired,
    /// The instance tore itself down instead of firing.
    Cancelled,
    /// Signal was not addressed to this instance; nothing changed.
    Ignored,
}

/// Top-level process instance state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Active,
    Completed,
    Aborted,
}
