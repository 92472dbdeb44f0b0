//! Stage handlers.
//!
//! A stage is routed to a [`HandlerKind`] by its `type`, falling back to its
//! `name`. Each handler reads its own `config` block and either returns a
//! one-line detail or a [`StageHandlerError`]; severity gating is the
//! engine's business, not the handler's.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use driftguard_core::cloud::{AdapterFactory, DefaultAdapterFactory, Provider, ReaperSettings};
use driftguard_core::dispatch::{CrossRepoDispatcher, DispatchError};
use driftguard_core::drift::{
    AiError, ChangeEvidence, DriftAnalyzer, GeminiModel, VerdictModel, DEFAULT_MAX_CHARS,
    DEFAULT_MODEL, DEFAULT_OVERRIDE_MARKER,
};
use driftguard_core::github::{ChangeSource, DispatchApi, GitHubClient, GitHubError};
use driftguard_core::{Context, ContextError, ResourceReaper, RetryPolicy, DEFAULT_PREFIX};

use crate::policy::Stage;

/// Which handler runs a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Documentation,
    Reaper,
    CrossRepo,
    Infrastructure,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Documentation,
        HandlerKind::Reaper,
        HandlerKind::CrossRepo,
        HandlerKind::Infrastructure,
    ];

    fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "documentation" | "ai_doc_check" => Some(HandlerKind::Documentation),
            "cleanup" | "janitor_cleanup" | "reaper" => Some(HandlerKind::Reaper),
            "cross_repo" | "cross_repo_safety" => Some(HandlerKind::CrossRepo),
            "infrastructure" | "infrastructure_preview" => Some(HandlerKind::Infrastructure),
            _ => None,
        }
    }

    /// `type` first, then `name`.
    pub fn resolve(stage: &Stage) -> Option<Self> {
        Self::from_token(&stage.stage_type).or_else(|| Self::from_token(&stage.name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Documentation => "documentation",
            HandlerKind::Reaper => "reaper",
            HandlerKind::CrossRepo => "cross_repo",
            HandlerKind::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StageHandlerError {
    #[error("no handler for stage '{name}' (type '{stage_type}')")]
    UnknownStage { name: String, stage_type: String },

    #[error("invalid config for stage '{stage}': {message}")]
    InvalidConfig { stage: String, message: String },

    #[error("missing run context")]
    Context(#[from] ContextError),

    #[error("GitHub API call failed")]
    GitHub(#[from] GitHubError),

    #[error("documentation drift detected: {reason}{}", .comment_error.as_ref().map(|e| format!(" (PR comment not posted: {})", e)).unwrap_or_default())]
    DriftDetected {
        reason: String,
        /// Set when the author could not be notified on the pull request.
        comment_error: Option<String>,
    },

    #[error("cross-repo dispatch failed")]
    Dispatch(#[from] DispatchError),

    #[error("model client unavailable")]
    Model(#[from] AiError),

    #[error("terraform {step} failed: {message}")]
    Terraform { step: String, message: String },
}

#[async_trait]
pub trait StageHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Run the stage; the returned string is the stage detail.
    async fn run(&self, ctx: &Context, stage: &Stage) -> Result<String, StageHandlerError>;
}

/// Handlers keyed by kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<HandlerKind, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production handlers; GitHub and model clients are built from the
    /// run context when a stage needs them.
    pub fn standard() -> Self {
        Self::new()
            .register(Arc::new(DriftStageHandler::default()))
            .register(Arc::new(ReaperStageHandler::default()))
            .register(Arc::new(DispatchStageHandler::default()))
            .register(Arc::new(InfrastructureStageHandler))
    }

    /// Add or replace the handler for its kind.
    pub fn register(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: HandlerKind) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

fn parse_config<T: DeserializeOwned>(stage: &Stage) -> Result<T, StageHandlerError> {
    serde_json::from_value(stage.config_value()).map_err(|e| StageHandlerError::InvalidConfig {
        stage: stage.name.clone(),
        message: e.to_string(),
    })
}

fn github_client(ctx: &Context) -> Result<GitHubClient, StageHandlerError> {
    Ok(GitHubClient::new(ctx.github_api_url(), ctx.require_token()?)?)
}

// ---------------------------------------------------------------------------
// Documentation drift
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DriftConfig {
    #[serde(default = "default_override_marker")]
    override_marker: String,
    #[serde(default = "default_max_chars")]
    max_chars: usize,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_reference_path")]
    reference_path: String,
}

fn default_override_marker() -> String {
    DEFAULT_OVERRIDE_MARKER.to_string()
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_reference_path() -> String {
    "README.md".to_string()
}

/// Drift check against the PR: fetch evidence, analyze, comment on FAIL.
#[derive(Default)]
pub struct DriftStageHandler {
    source: Option<Arc<dyn ChangeSource>>,
    model: Option<Arc<dyn VerdictModel>>,
    retry: Option<RetryPolicy>,
}

impl DriftStageHandler {
    pub fn with_source(mut self, source: Arc<dyn ChangeSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn VerdictModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

#[async_trait]
impl StageHandler for DriftStageHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Documentation
    }

    async fn run(&self, ctx: &Context, stage: &Stage) -> Result<String, StageHandlerError> {
        let config: DriftConfig = parse_config(stage)?;
        let repo = ctx.require_repo()?;
        let number = ctx.require_pr_number()?;

        let source: Arc<dyn ChangeSource> = match &self.source {
            Some(source) => source.clone(),
            None => Arc::new(github_client(ctx)?),
        };
        let model: Arc<dyn VerdictModel> = match &self.model {
            Some(model) => model.clone(),
            None => Arc::new(GeminiModel::new(config.model.clone())?),
        };
        let mut analyzer = DriftAnalyzer::new(model)
            .with_override_marker(config.override_marker.clone())
            .with_max_chars(config.max_chars);
        if let Some(retry) = &self.retry {
            analyzer = analyzer.with_retry(retry.clone());
        }

        info!(repo = %repo, pr = number, "running documentation drift check");
        let pull = source.pull_request(repo, number).await?;
        let mut evidence = ChangeEvidence {
            body: pull.body.clone(),
            comments: source.issue_comments(repo, number).await?,
            ..ChangeEvidence::default()
        };

        // Diff and reference are only needed when no override applies.
        if !analyzer.override_present(&evidence.body, &evidence.comments) {
            evidence.diff = source.pull_request_diff(repo, number).await?;
            evidence.reference = match source
                .file_contents(repo, &config.reference_path, &pull.head_sha)
                .await?
            {
                Some(text) => text,
                None => {
                    warn!(path = %config.reference_path, "reference document not found, comparing against empty text");
                    String::new()
                }
            };
        }

        let verdict = analyzer.analyze_change(&evidence, ctx.ai_api_key()).await;
        if verdict.is_fail() {
            let comment_error = match source.post_comment(repo, number, &verdict.to_comment()).await {
                Ok(()) => None,
                Err(err) => {
                    warn!(error = %err, "could not post drift comment");
                    Some(err.to_string())
                }
            };
            return Err(StageHandlerError::DriftDetected {
                reason: verdict.reason,
                comment_error,
            });
        }
        Ok(format!(
            "{} ({}): {}",
            verdict.status,
            verdict.source.as_str(),
            verdict.reason
        ))
    }
}

// ---------------------------------------------------------------------------
// Resource reaper
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReaperConfig {
    #[serde(default = "default_targets")]
    targets: Vec<String>,
    #[serde(default)]
    dry_run: bool,
    #[serde(default = "default_prefix")]
    prefix: String,
    #[serde(default)]
    terraform_dir: Option<PathBuf>,
    #[serde(default = "default_terraform_bin")]
    terraform_bin: String,
    #[serde(default = "default_terraform_timeout")]
    terraform_timeout_secs: u64,
}

fn default_targets() -> Vec<String> {
    vec![Provider::Aws.as_str().to_string()]
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_terraform_bin() -> String {
    "terraform".to_string()
}

fn default_terraform_timeout() -> u64 {
    1_800
}

/// Scan-and-clean over the configured providers. Provider failures are
/// reported in the detail but never fail the stage.
pub struct ReaperStageHandler {
    factory: Arc<dyn AdapterFactory>,
    retry: RetryPolicy,
}

impl Default for ReaperStageHandler {
    fn default() -> Self {
        Self::new(Arc::new(DefaultAdapterFactory))
    }
}

impl ReaperStageHandler {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            factory,
            retry: RetryPolicy::enumeration(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl StageHandler for ReaperStageHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Reaper
    }

    async fn run(&self, ctx: &Context, stage: &Stage) -> Result<String, StageHandlerError> {
        let config: ReaperConfig = parse_config(stage)?;
        let invalid = |message: String| StageHandlerError::InvalidConfig {
            stage: stage.name.clone(),
            message,
        };

        if let Some(dir) = config.terraform_dir.as_deref().filter(|d| d.is_dir()) {
            return terraform_destroy(
                &config.terraform_bin,
                dir,
                Duration::from_secs(config.terraform_timeout_secs),
            )
            .await;
        }

        if config.prefix.is_empty() {
            return Err(invalid("prefix must not be empty".to_string()));
        }
        let targets = config
            .targets
            .iter()
            .map(|t| t.parse::<Provider>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(invalid)?;

        let reaper = ResourceReaper::new(self.factory.clone()).with_settings(ReaperSettings {
            prefix: config.prefix.clone(),
            retry: self.retry.clone(),
        });
        let summary = reaper.scan(ctx, &targets, config.dry_run).await;
        Ok(summary.describe())
    }
}

/// Output of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Run `program args` in `dir`, killing it after `timeout`.
pub async fn run_command(
    program: &str,
    args: &[&str],
    dir: &Path,
    timeout: Duration,
) -> std::io::Result<Option<CommandOutput>> {
    let child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => return Ok(None),
    };
    Ok(Some(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    }))
}

async fn terraform_destroy(
    bin: &str,
    dir: &Path,
    timeout: Duration,
) -> Result<String, StageHandlerError> {
    let steps: [(&str, &[&str]); 2] = [
        ("init", &["init", "-input=false"]),
        ("destroy", &["destroy", "-auto-approve", "-input=false"]),
    ];
    for (step, args) in steps {
        info!(dir = %dir.display(), step, "running terraform");
        let failed = |message: String| StageHandlerError::Terraform {
            step: step.to_string(),
            message,
        };
        let output = run_command(bin, args, dir, timeout)
            .await
            .map_err(|e| failed(e.to_string()))?
            .ok_or_else(|| failed(format!("timed out after {}s", timeout.as_secs())))?;
        if !output.success {
            let tail: String = output.stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            return Err(failed(format!("exit code {}: {}", output.exit_code, tail)));
        }
        debug!(step, stdout_bytes = output.stdout.len(), "terraform step finished");
    }
    Ok(format!("terraform destroy completed in {}", dir.display()))
}

// ---------------------------------------------------------------------------
// Cross-repo dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DispatchConfig {
    #[serde(default)]
    downstream_repos: Vec<String>,
    #[serde(default, alias = "wait_for_ack")]
    wait_for_status: bool,
    #[serde(default = "default_ack_timeout")]
    ack_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    poll_interval_secs: u64,
}

fn default_ack_timeout() -> u64 {
    driftguard_core::dispatch::DEFAULT_ACK_TIMEOUT.as_secs()
}

fn default_poll_interval() -> u64 {
    driftguard_core::dispatch::DEFAULT_POLL_INTERVAL.as_secs()
}

#[derive(Default)]
pub struct DispatchStageHandler {
    api: Option<Arc<dyn DispatchApi>>,
}

impl DispatchStageHandler {
    pub fn with_api(mut self, api: Arc<dyn DispatchApi>) -> Self {
        self.api = Some(api);
        self
    }
}

#[async_trait]
impl StageHandler for DispatchStageHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::CrossRepo
    }

    async fn run(&self, ctx: &Context, stage: &Stage) -> Result<String, StageHandlerError> {
        let config: DispatchConfig = parse_config(stage)?;
        if config.downstream_repos.is_empty() {
            return Ok("no downstream repositories configured".to_string());
        }

        let api: Arc<dyn DispatchApi> = match &self.api {
            Some(api) => api.clone(),
            None => Arc::new(github_client(ctx)?),
        };
        let dispatcher = CrossRepoDispatcher::new(api)
            .with_ack_timeout(Duration::from_secs(config.ack_timeout_secs))
            .with_poll_interval(Duration::from_secs(config.poll_interval_secs));

        let outcome = dispatcher
            .dispatch(ctx, &config.downstream_repos, config.wait_for_status)
            .await?;
        Ok(if config.wait_for_status {
            format!(
                "dispatched to {} and acknowledged by {}",
                outcome.dispatched.join(", "),
                outcome.acknowledged.join(", ")
            )
        } else {
            format!("dispatched to {}", outcome.dispatched.join(", "))
        })
    }
}

// ---------------------------------------------------------------------------
// Infrastructure preview policy
// ---------------------------------------------------------------------------

/// Checks the preview TTL policy; provisioning itself happens outside.
pub struct InfrastructureStageHandler;

#[async_trait]
impl StageHandler for InfrastructureStageHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Infrastructure
    }

    async fn run(&self, _ctx: &Context, stage: &Stage) -> Result<String, StageHandlerError> {
        let ttl = stage
            .config
            .get("ttl_hours")
            .and_then(serde_json::Value::as_u64)
            .filter(|h| *h > 0)
            .ok_or_else(|| StageHandlerError::InvalidConfig {
                stage: stage.name.clone(),
                message: "ttl_hours must be a positive integer".to_string(),
            })?;
        Ok(format!("infrastructure policy checked: TTL {}h enforced", ttl))
    }
}
