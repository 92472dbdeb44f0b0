//! Per-run invocation context.
//!
//! A [`Context`] is built once per invocation (from the environment or a
//! builder) and then only ever shared by reference. It carries the change
//! identity, credentials and the run [`Mode`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ContextError;

pub const DEFAULT_CLOUD_REGION: &str = "us-east-1";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Whether the run talks to real providers or to seeded in-memory ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Live,
    Simulation,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Simulation => "simulation",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" | "" => Ok(Mode::Live),
            "simulation" | "demo" => Ok(Mode::Simulation),
            other => Err(ContextError::InvalidValue {
                field: "DRIFTGUARD_MODE",
                value: other.to_string(),
            }),
        }
    }
}

/// Immutable per-run bag of identity and credentials.
#[derive(Clone)]
pub struct Context {
    pr_number: Option<u64>,
    repo_name: Option<String>,
    token: Option<String>,
    ai_api_key: Option<String>,
    cloud_region: String,
    azure_account: Option<String>,
    gcp_project: Option<String>,
    github_api_url: String,
    mode: Mode,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Build the context from process environment variables.
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the context from an arbitrary key lookup (environment-shaped).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ContextError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pr_number = match non_empty("PR_NUMBER") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                ContextError::InvalidValue {
                    field: "PR_NUMBER",
                    value: raw.clone(),
                }
            })?),
            None => None,
        };

        let mode = match non_empty("DRIFTGUARD_MODE") {
            Some(raw) => raw.parse()?,
            None => Mode::Live,
        };

        Ok(Self {
            pr_number,
            repo_name: non_empty("GITHUB_REPOSITORY"),
            token: non_empty("GITHUB_TOKEN"),
            ai_api_key: non_empty("GEMINI_API_KEY"),
            cloud_region: non_empty("AWS_REGION").unwrap_or_else(|| DEFAULT_CLOUD_REGION.to_string()),
            azure_account: non_empty("AZURE_STORAGE_ACCOUNT"),
            gcp_project: non_empty("GOOGLE_CLOUD_PROJECT"),
            github_api_url: non_empty("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            mode,
        })
    }

    pub fn pr_number(&self) -> Option<u64> {
        self.pr_number
    }

    pub fn repo_name(&self) -> Option<&str> {
        self.repo_name.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn ai_api_key(&self) -> Option<&str> {
        self.ai_api_key.as_deref()
    }

    pub fn cloud_region(&self) -> &str {
        &self.cloud_region
    }

    pub fn azure_account(&self) -> Option<&str> {
        self.azure_account.as_deref()
    }

    pub fn gcp_project(&self) -> Option<&str> {
        self.gcp_project.as_deref()
    }

    pub fn github_api_url(&self) -> &str {
        &self.github_api_url
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn require_pr_number(&self) -> Result<u64, ContextError> {
        self.pr_number.ok_or(ContextError::Missing("PR_NUMBER"))
    }

    pub fn require_repo(&self) -> Result<&str, ContextError> {
        self.repo_name().ok_or(ContextError::Missing("GITHUB_REPOSITORY"))
    }

    pub fn require_token(&self) -> Result<&str, ContextError> {
        self.token().ok_or(ContextError::Missing("GITHUB_TOKEN"))
    }
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("pr_number", &self.pr_number)
            .field("repo_name", &self.repo_name)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ai_api_key", &self.ai_api_key.as_ref().map(|_| "<redacted>"))
            .field("cloud_region", &self.cloud_region)
            .field("azure_account", &self.azure_account)
            .field("gcp_project", &self.gcp_project)
            .field("github_api_url", &self.github_api_url)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Builder for [`Context`]; the only way to set fields before the run starts.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    pr_number: Option<u64>,
    repo_name: Option<String>,
    token: Option<String>,
    ai_api_key: Option<String>,
    cloud_region: Option<String>,
    azure_account: Option<String>,
    gcp_project: Option<String>,
    github_api_url: Option<String>,
    mode: Mode,
}

impl ContextBuilder {
    pub fn pr_number(mut self, pr_number: u64) -> Self {
        self.pr_number = Some(pr_number);
        self
    }

    pub fn repo_name(mut self, repo: impl Into<String>) -> Self {
        self.repo_name = Some(repo.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn ai_api_key(mut self, key: impl Into<String>) -> Self {
        self.ai_api_key = Some(key.into());
        self
    }

    pub fn cloud_region(mut self, region: impl Into<String>) -> Self {
        self.cloud_region = Some(region.into());
        self
    }

    pub fn azure_account(mut self, account: impl Into<String>) -> Self {
        self.azure_account = Some(account.into());
        self
    }

    pub fn gcp_project(mut self, project: impl Into<String>) -> Self {
        self.gcp_project = Some(project.into());
        self
    }

    pub fn github_api_url(mut self, url: impl Into<String>) -> Self {
        self.github_api_url = Some(url.into());
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> Context {
        Context {
            pr_number: self.pr_number,
            repo_name: self.repo_name,
            token: self.token,
            ai_api_key: self.ai_api_key,
            cloud_region: self
                .cloud_region
                .unwrap_or_else(|| DEFAULT_CLOUD_REGION.to_string()),
            azure_account: self.azure_account,
            gcp_project: self.gcp_project,
            github_api_url: self
                .github_api_url
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string()),
            mode: self.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_reads_all_fields() {
        let ctx = Context::from_lookup(lookup(&[
            ("PR_NUMBER", "42"),
            ("GITHUB_REPOSITORY", "acme/api"),
            ("GITHUB_TOKEN", "ghs_x"),
            ("GEMINI_API_KEY", "g-key"),
            ("AWS_REGION", "eu-west-1"),
            ("DRIFTGUARD_MODE", "simulation"),
        ]))
        .expect("context");

        assert_eq!(ctx.pr_number(), Some(42));
        assert_eq!(ctx.repo_name(), Some("acme/api"));
        assert_eq!(ctx.token(), Some("ghs_x"));
        assert_eq!(ctx.ai_api_key(), Some("g-key"));
        assert_eq!(ctx.cloud_region(), "eu-west-1");
        assert_eq!(ctx.mode(), Mode::Simulation);
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let ctx = Context::from_lookup(lookup(&[("GITHUB_TOKEN", "  ")])).expect("context");
        assert_eq!(ctx.pr_number(), None);
        assert_eq!(ctx.token(), None);
        assert_eq!(ctx.cloud_region(), DEFAULT_CLOUD_REGION);
        assert_eq!(ctx.github_api_url(), DEFAULT_GITHUB_API_URL);
        assert_eq!(ctx.mode(), Mode::Live);
    }

    #[test]
    fn test_invalid_pr_number_rejected() {
        let err = Context::from_lookup(lookup(&[("PR_NUMBER", "abc")])).unwrap_err();
        assert!(err.to_string().contains("PR_NUMBER"));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let err = Context::from_lookup(lookup(&[("DRIFTGUARD_MODE", "chaos")])).unwrap_err();
        assert!(matches!(err, ContextError::InvalidValue { .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let ctx = Context::builder().token("secret-token").ai_api_key("secret-key").build();
        let rendered = format!("{:?}", ctx);
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_require_helpers() {
        let ctx = Context::builder().repo_name("acme/api").build();
        assert_eq!(ctx.require_repo().unwrap(), "acme/api");
        assert!(matches!(
            ctx.require_token(),
            Err(ContextError::Missing("GITHUB_TOKEN"))
        ));
        assert!(ctx.require_pr_number().is_err());
    }
}
