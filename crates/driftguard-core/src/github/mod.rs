//! Minimal GitHub REST client.
//!
//! Only the endpoints the stages need: pull-request evidence for the drift
//! check, issue comments, `repository_dispatch` fan-out and workflow-run
//! polling for downstream acknowledgement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod fakes;

pub const API_VERSION: &str = "2022-11-28";
const PER_PAGE: usize = 100;
const MAX_PAGES: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GitHubError {
    #[error("GitHub returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("GitHub request failed: {0}")]
    Request(String),

    #[error("unexpected GitHub response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GitHubError::Parse(err.to_string())
        } else {
            GitHubError::Request(err.to_string())
        }
    }
}

/// Head and description of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub body: String,
    pub head_ref: String,
    pub head_sha: String,
}

/// One downstream workflow run as seen through the Actions API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub html_url: Option<String>,
}

impl WorkflowRun {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn succeeded(&self) -> bool {
        self.conclusion.as_deref() == Some("success")
    }
}

/// Read side of a pull request plus commenting.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    async fn pull_request(&self, repo: &str, number: u64) -> Result<PullRequest, GitHubError>;

    /// Concatenated per-file patches.
    async fn pull_request_diff(&self, repo: &str, number: u64) -> Result<String, GitHubError>;

    /// Raw file contents at `reference`, `None` when the file does not exist.
    async fn file_contents(
        &self,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, GitHubError>;

    async fn issue_comments(&self, repo: &str, number: u64) -> Result<Vec<String>, GitHubError>;

    async fn post_comment(&self, repo: &str, number: u64, body: &str) -> Result<(), GitHubError>;
}

/// Fan-out side: `repository_dispatch` and downstream run status.
#[async_trait]
pub trait DispatchApi: Send + Sync {
    /// Send the event; returns the HTTP status the API answered with.
    async fn repository_dispatch(
        &self,
        target: &str,
        event_type: &str,
        client_payload: &serde_json::Value,
    ) -> Result<u16, GitHubError>;

    /// `repository_dispatch` runs in `target` created at or after `since`.
    async fn dispatch_runs(
        &self,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRun>, GitHubError>;
}

/// reqwest-backed client for api.github.com (or an Enterprise base URL).
#[derive(Clone)]
pub struct GitHubClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("driftguard/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "github request");
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GitHubError> {
        let response = self.request(Method::GET, path).query(query).send().await?;
        let response = error_for_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| GitHubError::Parse(e.to_string()))
    }

    /// Walk `page=1..` until a short page comes back.
    async fn get_all<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<Vec<T>, GitHubError> {
        let mut out = Vec::new();
        for page in 1..=MAX_PAGES {
            let items: Vec<T> = self
                .get_json(
                    path,
                    &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())],
                )
                .await?;
            let len = items.len();
            out.extend(items);
            if len < PER_PAGE {
                break;
            }
        }
        Ok(out)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiMessage>(&body)
        .map(|m| m.message)
        .unwrap_or_else(|_| body.chars().take(200).collect());
    Err(GitHubError::Http {
        status: status.as_u16(),
        message,
    })
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Deserialize)]
struct PullPayload {
    number: u64,
    body: Option<String>,
    head: HeadPayload,
}

#[derive(Deserialize)]
struct HeadPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: String,
}

#[derive(Deserialize)]
struct FilePayload {
    filename: String,
    patch: Option<String>,
}

#[derive(Deserialize)]
struct CommentPayload {
    body: Option<String>,
}

#[derive(Deserialize)]
struct RunsPayload {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[async_trait]
impl ChangeSource for GitHubClient {
    async fn pull_request(&self, repo: &str, number: u64) -> Result<PullRequest, GitHubError> {
        let pr: PullPayload = self
            .get_json(&format!("/repos/{}/pulls/{}", repo, number), &[])
            .await?;
        Ok(PullRequest {
            number: pr.number,
            body: pr.body.unwrap_or_default(),
            head_ref: pr.head.git_ref,
            head_sha: pr.head.sha,
        })
    }

    async fn pull_request_diff(&self, repo: &str, number: u64) -> Result<String, GitHubError> {
        let files: Vec<FilePayload> = self
            .get_all(&format!("/repos/{}/pulls/{}/files", repo, number))
            .await?;
        Ok(files
            .into_iter()
            .filter_map(|f| f.patch.map(|patch| format!("\nFile: {}\n{}", f.filename, patch)))
            .collect())
    }

    async fn file_contents(
        &self,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Option<String>, GitHubError> {
        let response = self
            .request(Method::GET, &format!("/repos/{}/contents/{}", repo, path))
            .header("Accept", "application/vnd.github.raw")
            .query(&[("ref", reference)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(repo = %repo, path = %path, reference = %reference, "file not found");
            return Ok(None);
        }
        let response = error_for_status(response).await?;
        Ok(Some(response.text().await?))
    }

    async fn issue_comments(&self, repo: &str, number: u64) -> Result<Vec<String>, GitHubError> {
        let comments: Vec<CommentPayload> = self
            .get_all(&format!("/repos/{}/issues/{}/comments", repo, number))
            .await?;
        Ok(comments.into_iter().filter_map(|c| c.body).collect())
    }

    async fn post_comment(&self, repo: &str, number: u64, body: &str) -> Result<(), GitHubError> {
        let response = self
            .request(Method::POST, &format!("/repos/{}/issues/{}/comments", repo, number))
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        error_for_status(response).await.map(|_| ())
    }
}

#[async_trait]
impl DispatchApi for GitHubClient {
    async fn repository_dispatch(
        &self,
        target: &str,
        event_type: &str,
        client_payload: &serde_json::Value,
    ) -> Result<u16, GitHubError> {
        let response = self
            .request(Method::POST, &format!("/repos/{}/dispatches", target))
            .json(&serde_json::json!({
                "event_type": event_type,
                "client_payload": client_payload,
            }))
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    async fn dispatch_runs(
        &self,
        target: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRun>, GitHubError> {
        let runs: RunsPayload = self
            .get_json(
                &format!("/repos/{}/actions/runs", target),
                &[
                    ("event", "repository_dispatch".to_string()),
                    (
                        "created",
                        format!(">={}", since.format("%Y-%m-%dT%H:%M:%SZ")),
                    ),
                ],
            )
            .await?;
        Ok(runs.workflow_runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_diff_concatenates_patches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/pulls/7/files"))
            .and(header("authorization", "Bearer ghs_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"filename": "src/app.py", "patch": "@@ -1 +1 @@\n+x = os.getenv(\"DB_URL\")"},
                {"filename": "logo.png"}
            ])))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&server.uri(), "ghs_test").unwrap();
        let diff = client.pull_request_diff("acme/api", 7).await.unwrap();
        assert!(diff.contains("File: src/app.py"));
        assert!(diff.contains("DB_URL"));
        assert!(!diff.contains("logo.png"));
    }

    #[tokio::test]
    async fn test_missing_readme_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/contents/README.md"))
            .and(query_param("ref", "feature"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({"message": "Not Found"})))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&server.uri(), "t").unwrap();
        let readme = client
            .file_contents("acme/api", "README.md", "feature")
            .await
            .unwrap();
        assert!(readme.is_none());
    }

    #[tokio::test]
    async fn test_http_error_carries_api_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/api/issues/7/comments"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({"message": "Resource not accessible by integration"})))
            .mount(&server)
            .await;

        let client = GitHubClient::new(&server.uri(), "t").unwrap();
        let err = client.post_comment("acme/api", 7, "hi").await.unwrap_err();
        assert_eq!(
            err,
            GitHubError::Http {
                status: 403,
                message: "Resource not accessible by integration".to_string()
            }
        );
    }

    #[test]
    fn test_workflow_run_state() {
        let run = WorkflowRun {
            id: 1,
            status: "completed".into(),
            conclusion: Some("success".into()),
            created_at: Utc::now(),
            html_url: None,
        };
        assert!(run.is_completed());
        assert!(run.succeeded());
    }
}
