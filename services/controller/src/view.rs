//! Role-indexed view over the cluster's node controllers.

use std::collections::BTreeMap;
use std::sync::Arc;

use farm_id::NodeRole;

use crate::error::HarnessError;
use crate::node::NodeController;

/// All nodes of the cluster, ordered by role.
pub struct ClusterView {
    nodes: BTreeMap<NodeRole, Arc<NodeController>>,
}

impl ClusterView {
    /// Build a view. Duplicate roles are a configuration error.
    pub fn new(nodes: impl IntoIterator<Item = NodeController>) -> Result<Self, HarnessError> {
        let mut map = BTreeMap::new();
        for node in nodes {
            let role = node.role().clone();
            if map.insert(role.clone(), Arc::new(node)).is_some() {
                return Err(HarnessError::Config(format!("duplicate node role '{role}'")));
            }
        }

        if map.is_empty() {
            return Err(HarnessError::Config("cluster has no nodes".to_string()));
        }

        Ok(Self { nodes: map })
    }

    pub fn get(&self, role: &NodeRole) -> Result<&Arc<NodeController>, HarnessError> {
        self.nodes
            .get(role)
            .ok_or_else(|| HarnessError::UnknownRole { role: role.clone() })
    }

    /// Resolve every role, failing on the first unknown one.
    pub fn resolve(&self, roles: &[NodeRole]) -> Result<Vec<Arc<NodeController>>, HarnessError> {
        roles.iter().map(|r| self.get(r).cloned()).collect()
    }

    pub fn roles(&self) -> impl Iterator<Item = &NodeRole> {
        self.nodes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeRole, &Arc<NodeController>)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
