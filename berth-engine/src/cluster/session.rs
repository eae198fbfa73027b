//! Cluster session and expected topology

use crate::config::ClusterConfig;
use berth_common::{Error, NodeRole, Result};
use std::path::{Path, PathBuf};

/// Label carrying the cluster name on every node container
pub const CLUSTER_LABEL: &str = "io.x-k8s.kind.cluster";
/// Label carrying the node role on every node container
pub const ROLE_LABEL: &str = "io.x-k8s.kind.role";

/// Control plane nodes the local cluster always runs
pub const CONTROL_PLANE_NODES: usize = 1;
/// Worker nodes the local cluster always runs
pub const WORKER_NODES: usize = 3;

/// Identity of the cluster a provisioning call targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSession {
    name: String,
    kubeconfig: PathBuf,
}

impl ClusterSession {
    pub fn new(name: impl Into<String>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.name.clone(), config.kubeconfig.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// Container engine filters selecting this cluster's nodes, optionally by role
    pub fn label_filters(&self, role: Option<NodeRole>) -> Vec<String> {
        let mut filters = vec![format!("label={}={}", CLUSTER_LABEL, self.name)];
        if let Some(role) = role {
            filters.push(format!("label={}={}", ROLE_LABEL, role));
        }
        filters
    }

    pub fn topology(&self) -> ClusterTopology {
        ClusterTopology::for_cluster(&self.name)
    }
}

/// The fixed node set a healthy cluster consists of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    nodes: Vec<(String, NodeRole)>,
}

impl ClusterTopology {
    /// One control plane and three workers, named the way the bootstrap facility names them
    pub fn for_cluster(cluster: &str) -> Self {
        let mut nodes = vec![(format!("{}-control-plane", cluster), NodeRole::ControlPlane)];
        for i in 1..=WORKER_NODES {
            let name = if i == 1 {
                format!("{}-worker", cluster)
            } else {
                format!("{}-worker{}", cluster, i)
            };
            nodes.push((name, NodeRole::Worker));
        }
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(name, _)| name.as_str())
    }

    pub fn roles(&self) -> impl Iterator<Item = NodeRole> + '_ {
        self.nodes.iter().map(|(_, role)| *role)
    }

    pub fn role_of(&self, name: &str) -> Option<NodeRole> {
        self.nodes.iter().find(|(n, _)| n == name).map(|(_, role)| *role)
    }

    /// Check a list of live node names against the expected set
    pub fn validate<S: AsRef<str>>(&self, present: &[S]) -> Result<()> {
        if present.is_empty() {
            return Err(Error::NotProvisioned);
        }

        if present.len() != self.len() {
            return Err(Error::Topology(format!(
                "some nodes have been removed or crashed, {}/{} were running. \
                 Remove the remaining node containers and provision again",
                present.len(),
                self.len()
            )));
        }

        if let Some(missing) = self
            .names()
            .find(|expected| !present.iter().any(|p| p.as_ref() == *expected))
        {
            return Err(Error::Topology(format!(
                "node {} was not running while others were, remove the stray node containers \
                 and provision again",
                missing
            )));
        }

        Ok(())
    }
}
