//! Local cluster lifecycle
//!
//! Handles provisioning, registry trust and health checks for the
//! container-based development cluster.

pub mod confirm;
pub mod executor;
pub mod health;
pub mod provisioner;
pub mod runtime;
pub mod session;

pub use confirm::{
    DeclinePolicy, FixedAnswer, RedeployAnswer, RedeployConfirmation, TerminalConfirmation,
};
pub use executor::NodeActionExecutor;
pub use health::{AmbiguousReadiness, ClusterHealthEvaluator, HealthVerdict};
pub use provisioner::ClusterProvisioner;
pub use runtime::{ClusterBootstrap, ContainerEngine, NodeStatusSource};
pub use session::{ClusterSession, ClusterTopology};
