//! External collaborators of the cluster lifecycle
//!
//! The engine only issues coarse commands: the container engine lists,
//! removes and execs into node containers, the bootstrap facility
//! materializes a topology, kubectl reports node readiness.

use super::health::parse_node_list;
use super::session::ClusterSession;
use async_trait::async_trait;
use berth_common::{ClusterNode, Error, NodeRole, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Read-only bind mount from the host into every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

/// One node the bootstrap facility should create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub role: NodeRole,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<NodeMount>,
}

/// The cluster layout handed to the bootstrap facility
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapTopology {
    pub nodes: Vec<NodeSpec>,
}

#[derive(Serialize)]
struct KindClusterConfig<'a> {
    kind: &'static str,
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    nodes: &'a [NodeSpec],
}

impl BootstrapTopology {
    /// Render as a kind cluster config document
    pub fn to_kind_config(&self) -> Result<String> {
        serde_yaml::to_string(&KindClusterConfig {
            kind: "Cluster",
            api_version: "kind.x-k8s.io/v1alpha4",
            nodes: &self.nodes,
        })
        .map_err(|e| Error::Command(format!("could not render the cluster config: {}", e)))
    }
}

/// Node container management
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Names of the session's node containers, running or not
    async fn list_node_containers(
        &self,
        session: &ClusterSession,
        role: Option<NodeRole>,
    ) -> Result<Vec<String>>;

    /// Force-remove one container
    async fn remove_container(&self, name: &str, cancel: CancellationToken) -> Result<()>;

    /// Run a shell script inside a node container
    async fn exec_script(&self, node: &str, script: &str, cancel: CancellationToken) -> Result<()>;
}

/// Cluster materialization
#[async_trait]
pub trait ClusterBootstrap: Send + Sync {
    async fn create_cluster(
        &self,
        session: &ClusterSession,
        topology: &BootstrapTopology,
    ) -> Result<()>;
}

/// Live node readiness
#[async_trait]
pub trait NodeStatusSource: Send + Sync {
    async fn node_status(&self, session: &ClusterSession) -> Result<Vec<ClusterNode>>;
}

/// Output of a finished external command
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn a non-zero exit into an error carrying stderr
    pub fn check(self, what: &str) -> Result<Self> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(Error::Command(format!(
                "{} failed ({}): {}",
                what,
                self.status,
                self.stderr.trim()
            )))
        }
    }
}

/// Run a command to completion
pub async fn run_command(mut cmd: Command, what: &str) -> Result<CommandOutput> {
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Command(format!("Failed to run {}: {}", what, e)))?;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a command that stops when `cancel` fires
///
/// On cancellation the process gets SIGTERM, then SIGKILL once `grace` runs
/// out. Either way this only returns after the process has exited.
pub async fn run_cancellable(
    mut cmd: Command,
    what: &str,
    cancel: &CancellationToken,
    grace: Duration,
) -> Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Command(format!("Failed to run {}: {}", what, e)))?;

    let stdout = child.stdout.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });
    let stderr = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    let status = tokio::select! {
        status = child.wait() => Some(status),
        () = cancel.cancelled() => None,
    };

    let status = match status {
        Some(status) => {
            status.map_err(|e| Error::Command(format!("Failed to wait for {}: {}", what, e)))?
        }
        None => {
            debug!("Terminating {}", what);
            if let Some(pid) = child.id() {
                if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    warn!("Failed to send SIGTERM to {}: {}", what, e);
                }
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Failed to wait for {}: {}", what, e),
                Err(_) => {
                    warn!("{} ignored SIGTERM, killing it", what);
                    if let Err(e) = child.kill().await {
                        error!("Failed to kill {}: {}", what, e);
                    }
                }
            }
            return Err(Error::Cancelled);
        }
    };

    let stdout = match stdout {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let stderr = match stderr {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(CommandOutput {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Container engine driven through the docker CLI
pub struct DockerCli {
    binary: String,
    grace: Duration,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, grace: Duration) -> Self {
        Self {
            binary: binary.into(),
            grace,
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker", Duration::from_secs(10))
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn list_node_containers(
        &self,
        session: &ClusterSession,
        role: Option<NodeRole>,
    ) -> Result<Vec<String>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("ps").arg("-a");
        for filter in session.label_filters(role) {
            cmd.arg("--filter").arg(filter);
        }
        cmd.arg("--format").arg("{{.Names}}");

        let output = run_command(cmd, "docker ps").await?.check("docker ps")?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn remove_container(&self, name: &str, cancel: CancellationToken) -> Result<()> {
        info!("Removing node container {}", name);
        let mut cmd = Command::new(&self.binary);
        cmd.arg("rm").arg("-f").arg(name);
        run_cancellable(cmd, "docker rm", &cancel, self.grace)
            .await?
            .check("docker rm")?;
        Ok(())
    }

    async fn exec_script(&self, node: &str, script: &str, cancel: CancellationToken) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("exec").arg(node).arg("bash").arg("-c").arg(script);
        run_cancellable(cmd, "docker exec", &cancel, self.grace)
            .await?
            .check("docker exec")?;
        Ok(())
    }
}

/// Bootstrap facility driven through the kind CLI
pub struct KindCli {
    binary: String,
}

impl KindCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for KindCli {
    fn default() -> Self {
        Self::new("kind")
    }
}

#[async_trait]
impl ClusterBootstrap for KindCli {
    async fn create_cluster(
        &self,
        session: &ClusterSession,
        topology: &BootstrapTopology,
    ) -> Result<()> {
        let config = topology.to_kind_config()?;
        let mut file = tempfile::Builder::new()
            .prefix("berth-kind-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(config.as_bytes())?;
        file.flush()?;

        info!(
            "Creating cluster {} with {} nodes",
            session.name(),
            topology.nodes.len()
        );

        let mut cmd = Command::new(&self.binary);
        cmd.arg("create")
            .arg("cluster")
            .arg("--name")
            .arg(session.name())
            .arg("--config")
            .arg(file.path())
            .arg("--kubeconfig")
            .arg(session.kubeconfig());

        run_command(cmd, "kind create cluster")
            .await?
            .check("kind create cluster")?;

        info!("Cluster {} created", session.name());
        Ok(())
    }
}

/// Node readiness through kubectl
pub struct KubectlNodeStatus {
    binary: String,
}

impl KubectlNodeStatus {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for KubectlNodeStatus {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl NodeStatusSource for KubectlNodeStatus {
    async fn node_status(&self, session: &ClusterSession) -> Result<Vec<ClusterNode>> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(format!("--kubeconfig={}", session.kubeconfig().display()))
            .arg("get")
            .arg("nodes")
            .arg("-o")
            .arg("json");

        let output = run_command(cmd, "kubectl get nodes")
            .await?
            .check("could not check if the cluster was running: kubectl get nodes")?;
        parse_node_list(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_kind_config_rendering() {
        let mount = NodeMount {
            host_path: PathBuf::from("/home/dev"),
            container_path: PathBuf::from("/hosthome"),
            read_only: true,
        };
        let topology = BootstrapTopology {
            nodes: vec![
                NodeSpec {
                    role: NodeRole::ControlPlane,
                    extra_mounts: vec![mount.clone()],
                },
                NodeSpec {
                    role: NodeRole::Worker,
                    extra_mounts: vec![mount],
                },
            ],
        };

        let yaml = topology.to_kind_config().unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["kind"], "Cluster");
        assert_eq!(doc["apiVersion"], "kind.x-k8s.io/v1alpha4");
        assert_eq!(doc["nodes"][0]["role"], "control-plane");
        assert_eq!(doc["nodes"][1]["role"], "worker");
        assert_eq!(doc["nodes"][0]["extraMounts"][0]["containerPath"], "/hosthome");
        assert_eq!(doc["nodes"][0]["extraMounts"][0]["readOnly"], true);
    }

    #[tokio::test]
    async fn test_run_cancellable_completes() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let output = run_cancellable(cmd, "sh", &CancellationToken::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_run_cancellable_terminates_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_cancellable(cmd, "sleep", &cancel, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_failed_command_reports_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo boom >&2; exit 3");
        let err = run_command(cmd, "sh").await.unwrap().check("patch").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("patch failed"));
        assert!(message.contains("boom"));
    }
}
