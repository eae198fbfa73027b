//! Common types and errors shared between the berth build logger and the
//! cluster lifecycle engine

pub mod build;
pub mod cluster;

pub use build::{BuildEvent, LogLineEvent, SolveStatus, StatusEvent, VertexEvent};
pub use cluster::{ClusterNode, NodeRole};

/// Broad failure classes, used by callers to decide who has to act
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// File or directory create/write errors
    IoFailure,
    /// Tooling produced output we cannot interpret
    ProtocolFailure,
    /// Wrong node set, needs operator action
    TopologyFailure,
    /// Nodes recently changed state and the operator had the final word
    TransientReadiness,
    /// A node action or external command failed
    RemoteActionFailure,
    /// Nodes have been not ready for longer than the freshness window
    Unhealthy,
    /// Engine settings are unusable
    Configuration,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log store error: {0}")]
    LogStore(String),

    #[error("Log store is closed, cannot write to {0}'s logs")]
    LogStoreClosed(String),

    #[error("Got invalid cluster tooling output: {0}")]
    Protocol(String),

    #[error("No nodes were running, the cluster has to be provisioned once per container engine restart")]
    NotProvisioned,

    #[error("Cluster topology error: {0}")]
    Topology(String),

    #[error("Cluster is not healthy: {0}")]
    NotHealthy(String),

    #[error("Some nodes weren't ready, and a redeploy was requested")]
    RedeployRequested,

    #[error("Some nodes weren't ready, and the operator did not confirm the cluster as usable")]
    Unconfirmed,

    #[error("Action failed on node {node}: {message}")]
    RemoteAction { node: String, message: String },

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Io(_) | Error::LogStore(_) | Error::LogStoreClosed(_) => ErrorCategory::IoFailure,
            Error::Protocol(_) => ErrorCategory::ProtocolFailure,
            Error::NotProvisioned | Error::Topology(_) => ErrorCategory::TopologyFailure,
            Error::RedeployRequested | Error::Unconfirmed => ErrorCategory::TransientReadiness,
            Error::RemoteAction { .. } | Error::Command(_) | Error::Cancelled => {
                ErrorCategory::RemoteActionFailure
            }
            Error::NotHealthy(_) => ErrorCategory::Unhealthy,
            Error::InvalidConfig(_) => ErrorCategory::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(io.category(), ErrorCategory::IoFailure);
        assert_eq!(Error::NotProvisioned.category(), ErrorCategory::TopologyFailure);
        assert_eq!(Error::Unconfirmed.category(), ErrorCategory::TransientReadiness);
        assert_eq!(
            Error::RemoteAction {
                node: "berth-worker2".to_string(),
                message: "exit status 1".to_string(),
            }
            .category(),
            ErrorCategory::RemoteActionFailure
        );
    }

    #[test]
    fn test_remote_action_message_names_node() {
        let err = Error::RemoteAction {
            node: "berth-worker".to_string(),
            message: "containerd restart failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Action failed on node berth-worker: containerd restart failed"
        );
    }
}
