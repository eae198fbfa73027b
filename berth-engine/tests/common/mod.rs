//! Common test utilities and collaborator doubles

#![allow(dead_code)]

use async_trait::async_trait;
use berth_common::{ClusterNode, Error, NodeRole, Result, StatusEvent};
use berth_engine::cluster::runtime::{
    BootstrapTopology, ClusterBootstrap, ContainerEngine, NodeStatusSource,
};
use berth_engine::cluster::{ClusterSession, ClusterTopology};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const CLUSTER: &str = "berth";

pub fn session() -> ClusterSession {
    ClusterSession::new(CLUSTER, "/tmp/berth-test-kubeconfig")
}

pub fn expected_names() -> Vec<String> {
    ClusterTopology::for_cluster(CLUSTER)
        .names()
        .map(str::to_string)
        .collect()
}

/// Every expected node, ready, last transition three hours ago
pub fn ready_nodes(now: DateTime<Utc>) -> Vec<ClusterNode> {
    let topology = ClusterTopology::for_cluster(CLUSTER);
    topology
        .names()
        .zip(topology.roles())
        .map(|(name, role)| ClusterNode {
            name: name.to_string(),
            role,
            last_transition_time: now - ChronoDuration::hours(3),
            ready: true,
        })
        .collect()
}

pub fn status_event(id: &str, current: u64, total: u64, completed: bool) -> StatusEvent {
    let now = Utc::now();
    StatusEvent {
        id: id.to_string(),
        name: String::new(),
        vertex: String::new(),
        current,
        total,
        timestamp: now,
        completed: completed.then_some(now),
    }
}

/// How a scripted node behaves when a script is executed on it
#[derive(Debug, Clone)]
pub enum ExecBehavior {
    Succeed(Duration),
    Fail(Duration, String),
}

/// In-memory container engine recording what happened to each node
#[derive(Default)]
pub struct MockEngine {
    pub containers: Mutex<Vec<String>>,
    pub behaviors: Mutex<HashMap<String, ExecBehavior>>,
    pub executed: Mutex<Vec<(String, String)>>,
    pub terminated: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub role_queries: Mutex<Vec<Option<NodeRole>>>,
}

impl MockEngine {
    pub fn with_containers(names: Vec<String>) -> Arc<Self> {
        let engine = Self::default();
        *engine.containers.lock().unwrap() = names;
        Arc::new(engine)
    }

    pub fn set_behavior(&self, node: &str, behavior: ExecBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(node.to_string(), behavior);
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn list_node_containers(
        &self,
        _session: &ClusterSession,
        role: Option<NodeRole>,
    ) -> Result<Vec<String>> {
        self.role_queries.lock().unwrap().push(role);
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn remove_container(&self, name: &str, _cancel: CancellationToken) -> Result<()> {
        self.removed.lock().unwrap().push(name.to_string());
        self.containers.lock().unwrap().retain(|c| c != name);
        Ok(())
    }

    async fn exec_script(&self, node: &str, script: &str, cancel: CancellationToken) -> Result<()> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(node)
            .cloned()
            .unwrap_or(ExecBehavior::Succeed(Duration::from_millis(1)));

        let (delay, failure) = match behavior {
            ExecBehavior::Succeed(delay) => (delay, None),
            ExecBehavior::Fail(delay, message) => (delay, Some(message)),
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                self.terminated.lock().unwrap().push(node.to_string());
                return Err(Error::Cancelled);
            }
        }

        match failure {
            Some(message) => Err(Error::Command(message)),
            None => {
                self.executed
                    .lock()
                    .unwrap()
                    .push((node.to_string(), script.to_string()));
                Ok(())
            }
        }
    }
}

/// Bootstrap double remembering the topology it was asked to create
#[derive(Default)]
pub struct MockBootstrap {
    pub created: Mutex<Vec<(String, BootstrapTopology)>>,
    pub fail_with: Mutex<Option<String>>,
}

#[async_trait]
impl ClusterBootstrap for MockBootstrap {
    async fn create_cluster(
        &self,
        session: &ClusterSession,
        topology: &BootstrapTopology,
    ) -> Result<()> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(Error::Command(message));
        }
        self.created
            .lock()
            .unwrap()
            .push((session.name().to_string(), topology.clone()));
        Ok(())
    }
}

/// Node status double returning a fixed answer
pub struct MockStatus {
    pub nodes: Mutex<Result<Vec<ClusterNode>>>,
}

impl MockStatus {
    pub fn with_nodes(nodes: Vec<ClusterNode>) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(Ok(nodes)),
        })
    }

    pub fn failing(err: Error) -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(Err(err)),
        })
    }
}

#[async_trait]
impl NodeStatusSource for MockStatus {
    async fn node_status(&self, _session: &ClusterSession) -> Result<Vec<ClusterNode>> {
        match &*self.nodes.lock().unwrap() {
            Ok(nodes) => Ok(nodes.clone()),
            Err(Error::Protocol(message)) => Err(Error::Protocol(message.clone())),
            Err(other) => Err(Error::Command(other.to_string())),
        }
    }
}
