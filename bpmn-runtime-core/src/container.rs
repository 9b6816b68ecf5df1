use crate::error::{FlowError, Result};
use crate::node::NodeInstance;
use crate::types::{ContainerScope, NodeInstanceId};
use std::collections::{BTreeMap, BTreeSet};

/// Membership of live node instances for one scope.
///
/// Only ids are held; the node instances themselves live in the owning
/// process instance's arena. Iteration order is id order.
#[derive(Clone, Debug)]
pub struct NodeInstanceContainer {
    scope: ContainerScope,
    members: BTreeSet<NodeInstanceId>,
}

impl NodeInstanceContainer {
    pub fn new(scope: ContainerScope) -> Self {
        Self {
            scope,
            members: BTreeSet::new(),
        }
    }

    pub fn scope(&self) -> ContainerScope {
        self.scope
    }

    pub fn add_node_instance(&mut self, id: NodeInstanceId) -> Result<()> {
        if !self.members.insert(id) {
            return Err(FlowError::Inconsistent(format!(
                "node instance {id} already in container {}",
                self.scope
            )));
        }
        Ok(())
    }

    pub fn remove_node_instance(&mut self, id: NodeInstanceId) -> Result<()> {
        if !self.members.remove(&id) {
            return Err(FlowError::Inconsistent(format!(
                "node instance {id} is not a member of container {}",
                self.scope
            )));
        }
        Ok(())
    }

    pub fn contains(&self, id: NodeInstanceId) -> bool {
        self.members.contains(&id)
    }

    /// Defensive copy of the direct members. Callers may mutate the container
    /// while walking the returned list.
    pub fn node_instance_ids(&self) -> Vec<NodeInstanceId> {
        self.members.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Members of `container`, and with `recursive` the members of every nested
/// container below it, parents before children.
///
/// A member missing from `arena`, or registered under a different scope,
/// means the process state is corrupted.
pub(crate) fn collect_node_instances<'a>(
    container: &NodeInstanceContainer,
    arena: &'a BTreeMap<NodeInstanceId, NodeInstance>,
    recursive: bool,
) -> Result<Vec<&'a NodeInstance>> {
    let mut out = Vec::with_capacity(container.len());
    let mut stack = vec![container];
    while let Some(current) = stack.pop() {
        for id in &current.members {
            let instance = arena.get(id).ok_or_else(|| {
                FlowError::Inconsistent(format!(
                    "container {} lists node instance {id} which does not exist",
                    current.scope
                ))
            })?;
            if instance.container() != current.scope {
                return Err(FlowError::Inconsistent(format!(
                    "node instance {id} listed in {} but owned by {}",
                    current.scope,
                    instance.container()
                )));
            }
            out.push(instance);
            if recursive {
                if let Some(nested) = instance.nested_container() {
                    stack.push(nested);
                }
            }
        }
    }
    Ok(out)
}
