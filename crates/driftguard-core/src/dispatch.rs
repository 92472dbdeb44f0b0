//! Cross-repository fan-out.
//!
//! Every downstream repository receives one `repository_dispatch` event
//! naming the source repository and the pull-request ref. Any rejection fails
//! the whole dispatch. Optionally waits for the downstream runs to finish.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::{Context, ContextError};
use crate::github::{DispatchApi, GitHubError};
use crate::obs;

pub const DISPATCH_EVENT_TYPE: &str = "driftguard_integration_test";
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Only this status means the event was accepted.
const ACCEPTED: u16 = 204;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("dispatch to {target} rejected with HTTP {status}")]
    Rejected { target: String, status: u16 },

    #[error("dispatch to {target} failed")]
    Api {
        target: String,
        #[source]
        source: GitHubError,
    },

    #[error("downstream run in {target} finished with {conclusion}")]
    Downstream { target: String, conclusion: String },

    #[error("no acknowledgement from {} within {waited_secs}s", .pending.join(", "))]
    AckTimeout { pending: Vec<String>, waited_secs: u64 },
}

/// What a successful dispatch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub dispatched: Vec<String>,
    /// Targets whose downstream run completed successfully (only when waiting).
    pub acknowledged: Vec<String>,
}

pub struct CrossRepoDispatcher {
    api: Arc<dyn DispatchApi>,
    ack_timeout: Duration,
    poll_interval: Duration,
}

impl CrossRepoDispatcher {
    pub fn new(api: Arc<dyn DispatchApi>) -> Self {
        Self {
            api,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub async fn dispatch(
        &self,
        ctx: &Context,
        downstream_repos: &[String],
        wait_for_ack: bool,
    ) -> Result<DispatchOutcome, DispatchError> {
        let source_repo = ctx.require_repo()?;
        let pr_number = ctx.require_pr_number()?;
        let payload = json!({
            "source_repo": source_repo,
            "pr_number": pr_number,
            "ref": format!("refs/pull/{}/head", pr_number),
        });

        // Downstream clocks and API latency: look back a little.
        let since = Utc::now() - chrono::Duration::seconds(5);
        let mut outcome = DispatchOutcome::default();

        for target in downstream_repos {
            info!(target = %target, "sending repository_dispatch");
            let status = self
                .api
                .repository_dispatch(target, DISPATCH_EVENT_TYPE, &payload)
                .await
                .map_err(|source| DispatchError::Api {
                    target: target.clone(),
                    source,
                })?;
            if status != ACCEPTED {
                return Err(DispatchError::Rejected {
                    target: target.clone(),
                    status,
                });
            }
            obs::emit_dispatch_sent(target, source_repo);
            outcome.dispatched.push(target.clone());
        }

        if wait_for_ack && !outcome.dispatched.is_empty() {
            outcome.acknowledged = self.await_acks(&outcome.dispatched, since).await?;
        }
        Ok(outcome)
    }

    /// Poll downstream `repository_dispatch` runs until each target has a
    /// completed run or the timeout passes.
    async fn await_acks(
        &self,
        targets: &[String],
        since: chrono::DateTime<Utc>,
    ) -> Result<Vec<String>, DispatchError> {
        let started = Instant::now();
        let mut pending: BTreeSet<&str> = targets.iter().map(String::as_str).collect();
        let mut acknowledged = Vec::new();

        loop {
            let names: Vec<&str> = pending.iter().copied().collect();
            for target in names {
                let runs = match self.api.dispatch_runs(target, since).await {
                    Ok(runs) => runs,
                    Err(err) => {
                        warn!(target = %target, error = %err, "could not read downstream runs, will retry");
                        continue;
                    }
                };
                let Some(latest) = runs.into_iter().max_by_key(|r| r.created_at) else {
                    continue;
                };
                if !latest.is_completed() {
                    continue;
                }
                if !latest.succeeded() {
                    return Err(DispatchError::Downstream {
                        target: target.to_string(),
                        conclusion: latest.conclusion.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                info!(target = %target, run_id = latest.id, "downstream run succeeded");
                pending.remove(target);
                acknowledged.push(target.to_string());
            }

            if pending.is_empty() {
                return Ok(acknowledged);
            }
            if started.elapsed() >= self.ack_timeout {
                return Err(DispatchError::AckTimeout {
                    pending: pending.iter().map(|t| t.to_string()).collect(),
                    waited_secs: self.ack_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
