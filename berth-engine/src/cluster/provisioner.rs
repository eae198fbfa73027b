//! Cluster provisioning
//!
//! Creates the local multi-node cluster, trusts the in-cluster registry on
//! every node and answers whether the environment is usable.

use super::confirm::{DeclinePolicy, RedeployConfirmation};
use super::executor::NodeActionExecutor;
use super::health::{ClusterHealthEvaluator, HealthVerdict};
use super::runtime::{
    BootstrapTopology, ClusterBootstrap, ContainerEngine, DockerCli, KindCli, KubectlNodeStatus,
    NodeMount, NodeSpec, NodeStatusSource,
};
use super::session::ClusterSession;
use crate::config::ClusterConfig;
use berth_common::{Error, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CONTAINERD_CONFIG: &str = "/etc/containerd/config.toml";
const HOME_MOUNT_PATH: &str = "/hosthome";

/// Shell script making a node's containerd pull from `registry` over plain HTTP
///
/// Safe to run repeatedly: nothing changes once the registry is present.
pub fn registry_patch_script(registry: &str) -> String {
    format!(
        r#"
grep -q '{registry}' {config} || \
{{ sed -i -e '/\[plugins\.cri\.registry\.mirrors\]/a\' \
  -e '        [plugins.cri.registry.mirrors."{registry}"]\' \
  -e '          endpoint = ["http://{registry}"]' \
  {config};
  systemctl restart containerd;
}}
"#,
        registry = registry,
        config = CONTAINERD_CONFIG,
    )
}

fn validate_registry(registry: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/');
    if registry.is_empty() || !registry.chars().all(allowed) {
        return Err(Error::InvalidConfig(format!(
            "'{}' is not a valid registry address",
            registry
        )));
    }
    Ok(())
}

/// Creates and checks the local cluster
pub struct ClusterProvisioner {
    session: ClusterSession,
    engine: Arc<dyn ContainerEngine>,
    bootstrap: Arc<dyn ClusterBootstrap>,
    status: Arc<dyn NodeStatusSource>,
    executor: NodeActionExecutor,
    evaluator: ClusterHealthEvaluator,
    decline_policy: DeclinePolicy,
    home_dir: Option<PathBuf>,
    host_mount: Option<PathBuf>,
}

impl ClusterProvisioner {
    pub fn new(
        session: ClusterSession,
        engine: Arc<dyn ContainerEngine>,
        bootstrap: Arc<dyn ClusterBootstrap>,
        status: Arc<dyn NodeStatusSource>,
    ) -> Self {
        Self {
            evaluator: ClusterHealthEvaluator::new(session.topology()),
            session,
            engine,
            bootstrap,
            status,
            executor: NodeActionExecutor::new(),
            decline_policy: DeclinePolicy::default(),
            home_dir: None,
            host_mount: None,
        }
    }

    /// Provisioner talking to docker, kind and kubectl as configured
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(
            ClusterSession::from_config(config),
            Arc::new(DockerCli::new(
                config.container_cli.clone(),
                config.termination_grace(),
            )),
            Arc::new(KindCli::new(config.bootstrap_cli.clone())),
            Arc::new(KubectlNodeStatus::new(config.kubectl_cli.clone())),
        )
        .with_freshness_window(config.freshness_window())
        .with_decline_policy(config.decline_policy)
        .with_host_mount(config.host_mount.clone())
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.evaluator = self.evaluator.with_freshness_window(window);
        self
    }

    pub fn with_decline_policy(mut self, policy: DeclinePolicy) -> Self {
        self.decline_policy = policy;
        self
    }

    /// Host directory mounted at `/hosthome`; defaults to the current user's home
    pub fn with_home_dir(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    /// Extra host path mounted at the same location, when it exists
    pub fn with_host_mount(mut self, path: Option<PathBuf>) -> Self {
        self.host_mount = path;
        self
    }

    pub fn session(&self) -> &ClusterSession {
        &self.session
    }

    /// Create the cluster from scratch
    pub async fn start_cluster(&self) -> Result<()> {
        let topology = self.bootstrap_topology().await?;

        // The bootstrap facility refuses to run next to stale node containers
        self.teardown(&CancellationToken::new()).await.map_err(|e| {
            Error::Command(format!(
                "could not delete existing containers to run cluster setup: {}. \
                 Is the container engine running?",
                e
            ))
        })?;

        info!("Provisioning cluster {}", self.session.name());
        self.bootstrap.create_cluster(&self.session, &topology).await
    }

    /// Remove every node container of this cluster
    pub async fn teardown(&self, cancel: &CancellationToken) -> Result<()> {
        let nodes = self
            .engine
            .list_node_containers(&self.session, None)
            .await?;
        if nodes.is_empty() {
            return Ok(());
        }

        let engine = self.engine.clone();
        self.executor
            .run("node removal", nodes, cancel, move |node, token| {
                let engine = engine.clone();
                async move { engine.remove_container(&node, token).await }
            })
            .await
    }

    /// Make every node trust `registry` for plain-HTTP pulls
    ///
    /// A failure on any node stops the patches still running elsewhere.
    pub async fn patch_registry_containers(
        &self,
        cancel: &CancellationToken,
        registry: &str,
    ) -> Result<()> {
        validate_registry(registry)?;

        let nodes = self
            .engine
            .list_node_containers(&self.session, None)
            .await?;
        if nodes.is_empty() {
            return Err(Error::NotProvisioned);
        }

        let script = Arc::new(registry_patch_script(registry));
        let engine = self.engine.clone();
        self.executor
            .run("registry patch", nodes, cancel, move |node, token| {
                let engine = engine.clone();
                let script = script.clone();
                async move {
                    engine
                        .exec_script(&node, &script, token)
                        .await
                        .map_err(|e| match e {
                            Error::Cancelled => Error::Cancelled,
                            other => Error::RemoteAction {
                                message: format!(
                                    "could not trust the registry in containerd: {}",
                                    other
                                ),
                                node,
                            },
                        })
                }
            })
            .await?;

        info!("Nodes of {} now trust registry {}", self.session.name(), registry);
        Ok(())
    }

    /// Node topology and readiness, without asking anyone anything
    pub async fn health(&self) -> Result<HealthVerdict> {
        let containers = self
            .engine
            .list_node_containers(&self.session, None)
            .await?;
        self.evaluator.topology().validate(&containers)?;

        let nodes = self.status.node_status(&self.session).await?;
        self.evaluator.evaluate(&nodes, Utc::now())
    }

    /// Whether the environment is usable; ambiguous readiness goes to `confirm`
    pub async fn check_cluster(&self, confirm: &dyn RedeployConfirmation) -> Result<()> {
        match self.health().await? {
            HealthVerdict::Healthy => Ok(()),
            HealthVerdict::Ambiguous(readiness) => {
                let answer = confirm.confirm_redeploy(&readiness).await?;
                let result = self.decline_policy.resolve(answer);
                if result.is_ok() {
                    warn!(
                        "Using cluster {} while {} still starting",
                        self.session.name(),
                        readiness.not_ready.join(", ")
                    );
                }
                result
            }
        }
    }

    async fn bootstrap_topology(&self) -> Result<BootstrapTopology> {
        let home = self
            .home_dir
            .clone()
            .or_else(dirs::home_dir)
            .ok_or_else(|| Error::InvalidConfig("could not find your home directory".to_string()))?;

        let mut mounts = vec![NodeMount {
            host_path: home,
            container_path: PathBuf::from(HOME_MOUNT_PATH),
            read_only: true,
        }];
        if let Some(ref path) = self.host_mount {
            if tokio::fs::metadata(path).await.is_ok() {
                mounts.push(NodeMount {
                    host_path: path.clone(),
                    container_path: path.clone(),
                    read_only: true,
                });
            }
        }

        let nodes = self
            .session
            .topology()
            .roles()
            .map(|role| NodeSpec {
                role,
                extra_mounts: mounts.clone(),
            })
            .collect();

        Ok(BootstrapTopology { nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_patch_script() {
        let script = registry_patch_script("registry.local:5000");
        assert!(script.contains("grep -q 'registry.local:5000' /etc/containerd/config.toml ||"));
        assert!(script.contains(r#"[plugins.cri.registry.mirrors."registry.local:5000"]"#));
        assert!(script.contains(r#"endpoint = ["http://registry.local:5000"]"#));
        assert!(script.contains("systemctl restart containerd"));
    }

    #[test]
    fn test_registry_validation() {
        assert!(validate_registry("registry.local:5000").is_ok());
        assert!(validate_registry("").is_err());
        assert!(validate_registry("evil'; rm -rf /").is_err());
    }
}
