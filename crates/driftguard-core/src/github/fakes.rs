//! Recording in-memory GitHub for tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ChangeSource, DispatchApi, GitHubError, PullRequest, WorkflowRun};

#[derive(Debug)]
struct State {
    pull: PullRequest,
    diff: String,
    files: BTreeMap<String, String>,
    comments: Vec<String>,
    posted: Vec<String>,
    comment_status: Option<u16>,
    dispatch_status: BTreeMap<String, u16>,
    dispatched: Vec<(String, String, serde_json::Value)>,
    runs: BTreeMap<String, VecDeque<Vec<WorkflowRun>>>,
    run_polls: usize,
}

/// Shared-state fake implementing [`ChangeSource`] and [`DispatchApi`].
///
/// Dispatches answer 204 unless overridden per target. Workflow-run
/// listings are scripted per target: each poll pops one snapshot and the
/// last snapshot repeats.
#[derive(Debug, Clone)]
pub struct RecordingGitHub {
    state: Arc<Mutex<State>>,
}

impl Default for RecordingGitHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingGitHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                pull: PullRequest {
                    number: 1,
                    body: String::new(),
                    head_ref: "feature".to_string(),
                    head_sha: "0000000".to_string(),
                },
                diff: String::new(),
                files: BTreeMap::new(),
                comments: Vec::new(),
                posted: Vec::new(),
                comment_status: None,
                dispatch_status: BTreeMap::new(),
                dispatched: Vec::new(),
                runs: BTreeMap::new(),
                run_polls: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_pull(self, number: u64, body: &str) -> Self {
        {
            let mut s = self.state();
            s.pull.number = number;
            s.pull.body = body.to_string();
        }
        self
    }

    pub fn with_diff(self, diff: &str) -> Self {
        self.state().diff = diff.to_string();
        self
    }

    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.state()
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    pub fn with_comment(self, body: &str) -> Self {
        self.state().comments.push(body.to_string());
        self
    }

    /// Reject every comment post with this HTTP status.
    pub fn rejecting_comments(self, status: u16) -> Self {
        self.state().comment_status = Some(status);
        self
    }

    pub fn with_dispatch_status(self, target: &str, status: u16) -> Self {
        self.state()
            .dispatch_status
            .insert(target.to_string(), status);
        self
    }

    /// Queue one snapshot of downstream runs for `target`.
    pub fn with_runs(self, target: &str, runs: Vec<WorkflowRun>) -> Self {
        self.state()
            .runs
            .entry(target.to_string())
            .or_default()
            .push_back(runs);
        self
    }

    pub fn posted_comments(&self) -> Vec<String> {
        self.state().posted.clone()
    }

    /// `(target, event_type, client_payload)` in send order.
    pub fn dispatched(&self) -> Vec<(String, String, serde_json::Value)> {
        self.state().dispatched.clone()
    }

    pub fn run_polls(&self) -> usize {
        self.state().run_polls
    }
}

#[async_trait]
impl ChangeSource for RecordingGitHub {
    async fn pull_request(&self, _repo: &str, _number: u64) -> Result<PullRequest, GitHubError> {
        Ok(self.state().pull.clone())
    }

    async fn pull_request_diff(&self, _repo: &str, _number: u64) -> Result<String, GitHubError> {
        Ok(self.state().diff.clone())
    }

    async fn file_contents(
        &self,
        _repo: &str,
        path: &str,
        _reference: &str,
    ) -> Result<Option<String>, GitHubError> {
        Ok(self.state().files.get(path).cloned())
    }

    async fn issue_comments(&self, _repo: &str, _number: u64) -> Result<Vec<String>, GitHubError> {
        Ok(self.state().comments.clone())
    }

    async fn post_comment(&self, _repo: &str, _number: u64, body: &str) -> Result<(), GitHubError> {
        let mut s = self.state();
        if let Some(status) = s.comment_status {
            return Err(GitHubError::Http {
                status,
                message: "Resource not accessible by integration".to_string(),
            });
        }
        s.posted.push(body.to_string());
        Ok(())
    }
}

#[async_trait]
impl DispatchApi for RecordingGitHub {
    async fn repository_dispatch(
        &self,
        target: &str,
        event_type: &str,
        client_payload: &serde_json::Value,
    ) -> Result<u16, GitHubError> {
        let mut s = self.state();
        s.dispatched.push((
            target.to_string(),
            event_type.to_string(),
            client_payload.clone(),
        ));
        Ok(s.dispatch_status.get(target).copied().unwrap_or(204))
    }

    async fn dispatch_runs(
        &self,
        target: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRun>, GitHubError> {
        let mut s = self.state();
        s.run_polls += 1;
        let Some(queue) = s.runs.get_mut(target) else {
            return Ok(Vec::new());
        };
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap_or_default())
        } else {
            Ok(queue.front().cloned().unwrap_or_default())
        }
    }
}
