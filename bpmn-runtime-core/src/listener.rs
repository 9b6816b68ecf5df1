use crate::types::{ContainerScope, ListenerToken};
use std::collections::BTreeMap;

/// Per-process-instance event listener registry.
///
/// Keyed by event type. Each token remembers the container scope that
/// registered it, so a non-recursive removal only touches listeners of the
/// top-level scope. Registration and removal are the only mutation paths.
#[derive(Clone, Debug, Default)]
pub struct ListenerRegistry {
    listeners: BTreeMap<String, BTreeMap<ListenerToken, ContainerScope>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the token was already registered for `event_type`.
    pub fn add_event_listener(
        &mut self,
        event_type: &str,
        token: ListenerToken,
        scope: ContainerScope,
    ) -> bool {
        self.listeners
            .entry(event_type.to_string())
            .or_default()
            .insert(token, scope)
            .is_none()
    }

    /// Remove `token` from `event_type`. With `recursive` false only listeners
    /// registered by the process scope are eligible. Returns true if a
    /// listener was removed.
    pub fn remove_event_listener(
        &mut self,
        event_type: &str,
        token: ListenerToken,
        recursive: bool,
    ) -> bool {
        let Some(tokens) = self.listeners.get_mut(event_type) else {
            return false;
        };
        let eligible = match tokens.get(&token) {
            Some(ContainerScope::Process) => true,
            Some(ContainerScope::Composite(_)) => recursive,
            None => false,
        };
        if !eligible {
            return false;
        }
        tokens.remove(&token);
        if tokens.is_empty() {
            self.listeners.remove(event_type);
        }
        true
    }

    /// Snapshot of the tokens subscribed to `event_type`, in token order.
    pub fn listeners_for(&self, event_type: &str) -> Vec<ListenerToken> {
        self.listeners
            .get(event_type)
            .map(|tokens| tokens.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, event_type: &str, token: ListenerToken) -> bool {
        self.listeners
            .get(event_type)
            .is_some_and(|tokens| tokens.contains_key(&token))
    }

    /// Number of registrations held by `token` across all event types.
    pub fn registrations_of(&self, token: ListenerToken) -> usize {
        self.listeners
            .values()
            .filter(|tokens| tokens.contains_key(&token))
            .count()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
