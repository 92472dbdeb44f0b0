//! DriftGuard Core Library
//!
//! Governance building blocks shared by the stage engine and the CLI: the
//! multi-cloud resource reaper, the documentation drift analyzer, the
//! cross-repository dispatcher and the GitHub client they depend on.

pub mod cloud;
pub mod dispatch;
pub mod domain;
pub mod drift;
pub mod github;
pub mod obs;
pub mod retry;
pub mod telemetry;

pub use cloud::{
    AdapterFactory, CloudAdapter, CloudResource, DefaultAdapterFactory, ExpiryStatus, Provider,
    ProviderApi, ProviderError, ReapSummary, ReaperSettings, ResourceReaper, SafetyVerdict,
    ScanReport, StorageAdapter, DEFAULT_PREFIX,
};

pub use dispatch::{CrossRepoDispatcher, DispatchError, DispatchOutcome, DISPATCH_EVENT_TYPE};

pub use domain::{Context, ContextBuilder, ContextError, Mode};

pub use drift::{
    AiError, ChangeEvidence, DriftAnalyzer, DriftStatus, DriftVerdict, GeminiModel, VerdictModel,
    VerdictSource,
};

pub use github::{ChangeSource, DispatchApi, GitHubClient, GitHubError, PullRequest, WorkflowRun};

pub use retry::{retry_if, retry_with_backoff, RetryPolicy};

pub use telemetry::init_tracing;
