//! Cluster health checks
//!
//! Decides whether the local cluster is usable from its live node set. The
//! freshness window only separates "still booting" from "actually broken";
//! it is not a deadline.

use super::session::ClusterTopology;
use berth_common::{ClusterNode, Error, NodeRole, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

const CONTROL_PLANE_ROLE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Nodes are not all ready, but every not-ready node changed state recently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousReadiness {
    pub not_ready: Vec<String>,
    /// Most recent transition among the not-ready nodes
    pub last_transition: DateTime<Utc>,
}

/// Outcome of a health check that did not fail outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Needs an answer through the confirmation channel
    Ambiguous(AmbiguousReadiness),
}

/// Evaluates the live node set against the expected topology
#[derive(Debug, Clone)]
pub struct ClusterHealthEvaluator {
    topology: ClusterTopology,
    freshness_window: Duration,
}

impl ClusterHealthEvaluator {
    pub fn new(topology: ClusterTopology) -> Self {
        Self {
            topology,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// Run the decision ladder as of `now`
    pub fn evaluate(&self, nodes: &[ClusterNode], now: DateTime<Utc>) -> Result<HealthVerdict> {
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        self.topology.validate(&names)?;

        let not_ready: Vec<&ClusterNode> = nodes.iter().filter(|n| !n.ready).collect();
        if not_ready.is_empty() {
            debug!("All {} nodes are ready", nodes.len());
            return Ok(HealthVerdict::Healthy);
        }

        let window = chrono::Duration::from_std(self.freshness_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let all_recent = not_ready
            .iter()
            .all(|n| n.last_transition_time + window > now);

        let not_ready_names: Vec<String> = not_ready.iter().map(|n| n.name.clone()).collect();
        if all_recent {
            let last_transition = not_ready
                .iter()
                .map(|n| n.last_transition_time)
                .max()
                .unwrap_or(now);
            debug!("Nodes {:?} are not ready but changed state recently", not_ready_names);
            return Ok(HealthVerdict::Ambiguous(AmbiguousReadiness {
                not_ready: not_ready_names,
                last_transition,
            }));
        }

        warn!("Nodes {:?} have been not ready for too long", not_ready_names);
        Err(Error::NotHealthy(format!(
            "{} not ready, and not for over {} seconds",
            not_ready_names.join(", "),
            self.freshness_window.as_secs()
        )))
    }
}

#[derive(Debug, Deserialize)]
struct NodeList {
    items: Vec<NodeItem>,
}

#[derive(Debug, Deserialize)]
struct NodeItem {
    metadata: NodeMetadata,
    #[serde(default)]
    status: NodeStatus,
}

#[derive(Debug, Deserialize)]
struct NodeMetadata {
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
    #[serde(default)]
    conditions: Vec<NodeCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    last_transition_time: DateTime<Utc>,
}

/// Parse `kubectl get nodes -o json` into node readiness
///
/// Anything unexpected means incompatible tooling and is a protocol failure.
pub fn parse_node_list(output: &str) -> Result<Vec<ClusterNode>> {
    let list: NodeList = serde_json::from_str(output).map_err(|e| {
        Error::Protocol(format!("could not parse the node list: {}", e))
    })?;

    list.items
        .into_iter()
        .map(|item| {
            let ready = item
                .status
                .conditions
                .iter()
                .find(|c| c.kind == "Ready")
                .ok_or_else(|| {
                    Error::Protocol(format!(
                        "node {} reported no Ready condition",
                        item.metadata.name
                    ))
                })?;

            let role = if CONTROL_PLANE_ROLE_LABELS
                .iter()
                .any(|label| item.metadata.labels.contains_key(*label))
            {
                NodeRole::ControlPlane
            } else {
                NodeRole::Worker
            };

            Ok(ClusterNode {
                ready: ready.status == "True",
                last_transition_time: ready.last_transition_time,
                role,
                name: item.metadata.name,
            })
        })
        .collect()
}
