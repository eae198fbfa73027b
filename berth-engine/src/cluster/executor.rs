//! Parallel per-node actions
//!
//! Runs one task per node in a shared cancellation scope. The first failure
//! cancels the scope, and every task is joined before the call returns, so
//! no remote process outlives the operation that started it.

use berth_common::{Error, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs an action concurrently across cluster nodes
#[derive(Debug, Clone, Default)]
pub struct NodeActionExecutor {}

impl NodeActionExecutor {
    pub fn new() -> Self {
        Self {}
    }

    /// Run `action` once per node and wait for all of them
    ///
    /// Each task gets its node name and a token it must watch. Returns the
    /// first observed failure. If `cancel` fires and tasks bail out, that
    /// first failure is [`Error::Cancelled`].
    pub async fn run<I, S, F, Fut>(
        &self,
        label: &str,
        nodes: I,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(String, CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let scope = cancel.child_token();
        let mut tasks = JoinSet::new();

        for node in nodes {
            let node = node.into();
            let task = action(node.clone(), scope.clone());
            tasks.spawn(async move { (node, task.await) });
        }
        info!("Running {} on {} nodes", label, tasks.len());

        let mut first_failure: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((node, Ok(()))) => {
                    debug!("{} finished on {}", label, node);
                    continue;
                }
                Ok((node, Err(e))) => {
                    if !matches!(e, Error::Cancelled) {
                        error!("{} failed on {}: {}", label, node, e);
                    }
                    e
                }
                Err(e) => {
                    error!("{} task panicked: {}", label, e);
                    Error::Command(format!("{} task failed: {}", label, e))
                }
            };

            if first_failure.is_none() {
                first_failure = Some(failure);
                scope.cancel();
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
