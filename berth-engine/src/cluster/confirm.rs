//! Redeploy confirmation channel
//!
//! The health check never blocks on a prompt. It returns an ambiguous verdict
//! and the caller asks whoever can answer through [`RedeployConfirmation`].

use super::health::AmbiguousReadiness;
use async_trait::async_trait;
use berth_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Answer to "do you want to redeploy the recently started cluster?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeployAnswer {
    Yes,
    No,
    /// No explicit answer was given
    Default,
}

/// What "no" (or no answer) means for an ambiguous cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclinePolicy {
    /// Recent transitions are expected during startup, use the cluster
    #[default]
    Proceed,
    /// Refuse to call the cluster usable until it is confirmed ready
    Fail,
}

impl DeclinePolicy {
    /// Turn the operator's answer into the final check result
    pub fn resolve(&self, answer: RedeployAnswer) -> Result<()> {
        match (answer, self) {
            (RedeployAnswer::Yes, _) => Err(Error::RedeployRequested),
            (_, DeclinePolicy::Proceed) => Ok(()),
            (_, DeclinePolicy::Fail) => Err(Error::Unconfirmed),
        }
    }
}

/// Something that can answer the redeploy question
#[async_trait]
pub trait RedeployConfirmation: Send + Sync {
    async fn confirm_redeploy(&self, readiness: &AmbiguousReadiness) -> Result<RedeployAnswer>;
}

/// Always gives the same answer; for non-interactive callers
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub RedeployAnswer);

#[async_trait]
impl RedeployConfirmation for FixedAnswer {
    async fn confirm_redeploy(&self, _readiness: &AmbiguousReadiness) -> Result<RedeployAnswer> {
        Ok(self.0)
    }
}

/// Asks on the controlling terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirmation;

#[async_trait]
impl RedeployConfirmation for TerminalConfirmation {
    async fn confirm_redeploy(&self, readiness: &AmbiguousReadiness) -> Result<RedeployAnswer> {
        let prompt = format!(
            "{} recently started and not ready yet. Do you want to redeploy the cluster?",
            readiness.not_ready.join(", ")
        );

        let answer = tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact_opt()
        })
        .await
        .map_err(|e| Error::Command(format!("redeploy prompt failed: {}", e)))?
        .map_err(|e| Error::Command(format!("could not read the redeploy answer: {}", e)))?;

        Ok(match answer {
            Some(true) => RedeployAnswer::Yes,
            Some(false) => RedeployAnswer::No,
            None => RedeployAnswer::Default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_policy_resolution() {
        assert!(matches!(
            DeclinePolicy::Proceed.resolve(RedeployAnswer::Yes),
            Err(Error::RedeployRequested)
        ));
        assert!(DeclinePolicy::Proceed.resolve(RedeployAnswer::No).is_ok());
        assert!(DeclinePolicy::Proceed.resolve(RedeployAnswer::Default).is_ok());
        assert!(matches!(
            DeclinePolicy::Fail.resolve(RedeployAnswer::Default),
            Err(Error::Unconfirmed)
        ));
    }

    #[tokio::test]
    async fn test_fixed_answer() {
        let readiness = AmbiguousReadiness {
            not_ready: vec!["berth-worker2".to_string()],
            last_transition: Utc::now(),
        };
        let answer = FixedAnswer(RedeployAnswer::No)
            .confirm_redeploy(&readiness)
            .await
            .unwrap();
        assert_eq!(answer, RedeployAnswer::No);
    }
}
