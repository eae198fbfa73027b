//! Cluster node types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Node role in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Control plane node
    ControlPlane,
    /// Worker node
    Worker,
}

impl NodeRole {
    /// Value used by the bootstrap facility for role labels and configs
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live view of a node, derived fresh on every health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    pub role: NodeRole,
    pub last_transition_time: DateTime<Utc>,
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_role_serde() {
        let json = serde_json::to_string(&NodeRole::ControlPlane).unwrap();
        assert_eq!(json, "\"control-plane\"");
        let role: NodeRole = serde_json::from_str("\"worker\"").unwrap();
        assert_eq!(role, NodeRole::Worker);
        assert_eq!(NodeRole::Worker.to_string(), "worker");
    }
}
