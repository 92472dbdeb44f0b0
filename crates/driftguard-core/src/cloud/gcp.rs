//! Google Cloud Storage provider over the JSON API.
//!
//! Buckets are containers; bucket labels carry expiry and protection.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::cloud::adapter::{ContainerRef, ObjectRef, ProviderApi};
use crate::cloud::error::{ProviderError, ProviderResult};
use crate::cloud::resource::Provider;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Clone)]
pub struct GcpConfig {
    pub project: String,
    pub access_token: String,
    pub endpoint: Option<String>,
}

impl GcpConfig {
    /// `project` usually comes from the run context; the token from
    /// `GOOGLE_OAUTH_ACCESS_TOKEN`, the endpoint override from `GCS_ENDPOINT`.
    pub fn from_env(project: Option<&str>) -> ProviderResult<Self> {
        Self::from_lookup(project, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(project: Option<&str>, lookup: F) -> ProviderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let project = project
            .map(str::to_string)
            .or_else(|| get("GOOGLE_CLOUD_PROJECT"))
            .ok_or_else(|| ProviderError::Credentials("GOOGLE_CLOUD_PROJECT is not set".into()))?;
        let access_token = get("GOOGLE_OAUTH_ACCESS_TOKEN").ok_or_else(|| {
            ProviderError::Credentials("GOOGLE_OAUTH_ACCESS_TOKEN is not set".into())
        })?;
        Ok(Self {
            project,
            access_token,
            endpoint: get("GCS_ENDPOINT"),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl fmt::Debug for GcpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpConfig")
            .field("project", &self.project)
            .field("access_token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// GCS implementation of [`ProviderApi`].
pub struct GcsApi {
    config: GcpConfig,
    http: reqwest::Client,
}

impl GcsApi {
    pub fn new(config: GcpConfig) -> ProviderResult<Self> {
        Ok(Self {
            config,
            http: super::http_client()?,
        })
    }

    /// `/storage/v1/b/<segments...>`, each segment encoded on its own so
    /// object names containing `/` stay a single segment.
    fn url(&self, segments: &[&str]) -> ProviderResult<reqwest::Url> {
        let base = self.config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let mut url = reqwest::Url::parse(base)
            .map_err(|e| ProviderError::Request(format!("invalid GCS endpoint: {}", e)))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ProviderError::Request("GCS endpoint cannot be a base".into()))?;
            path.pop_if_empty().extend(["storage", "v1", "b"]);
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: reqwest::Url) -> ProviderResult<Response> {
        debug!(method = %method, url = %url, "gcs request");
        let response = self
            .http
            .request(method, url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = match serde_json::from_str::<GcsErrorBody>(&body) {
            Ok(err) => err.error.message,
            Err(_) => body.chars().take(200).collect(),
        };
        Err(ProviderError::from_status(status, detail))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: reqwest::Url) -> ProviderResult<T> {
        let body = self.send(Method::GET, url).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ProviderApi for GcsApi {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }

    async fn list_containers(&self) -> ProviderResult<Vec<ContainerRef>> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.url(&[])?;
            url.query_pairs_mut()
                .append_pair("project", &self.config.project);
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: BucketPage = self.get_json(url).await?;
            out.extend(page.items.into_iter().map(|b| ContainerRef {
                created_at: b
                    .time_created
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.with_timezone(&Utc)),
                name: b.name,
            }));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    async fn container_tags(&self, container: &str) -> ProviderResult<BTreeMap<String, String>> {
        let mut url = self.url(&[container])?;
        url.query_pairs_mut().append_pair("fields", "labels");
        let labels: BucketLabels = self.get_json(url).await?;
        Ok(labels.labels)
    }

    async fn list_objects(&self, container: &str) -> ProviderResult<Vec<ObjectRef>> {
        let mut url = self.url(&[container, "o"])?;
        url.query_pairs_mut().append_pair("versions", "true");
        let page: ObjectPage = self.get_json(url).await?;
        Ok(page
            .items
            .into_iter()
            .map(|o| ObjectRef::new(o.name, o.generation))
            .collect())
    }

    async fn delete_object(&self, container: &str, object: &ObjectRef) -> ProviderResult<()> {
        let mut url = self.url(&[container, "o", &object.key])?;
        if let Some(generation) = &object.version {
            url.query_pairs_mut().append_pair("generation", generation);
        }
        self.send(Method::DELETE, url).await.map(|_| ())
    }

    async fn delete_container(&self, container: &str) -> ProviderResult<()> {
        let url = self.url(&[container])?;
        self.send(Method::DELETE, url).await.map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct GcsErrorBody {
    error: GcsErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GcsErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketPage {
    #[serde(default)]
    items: Vec<BucketEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketEntry {
    name: String,
    time_created: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BucketLabels {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ObjectPage {
    #[serde(default)]
    items: Vec<ObjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
    generation: Option<String>,
}
