//! Azure Blob Storage provider over the REST API.
//!
//! Storage containers are the reaped unit; container metadata carries the
//! expiry and protection markers. Authenticated with an OAuth bearer token.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use tracing::debug;

use crate::cloud::adapter::{ContainerRef, ObjectRef, ProviderApi};
use crate::cloud::error::{ProviderError, ProviderResult};
use crate::cloud::resource::Provider;

/// Blob service version sent with every request. Bearer auth needs 2017-11-09 or later.
pub const API_VERSION: &str = "2021-08-06";

const META_PREFIX: &str = "x-ms-meta-";

#[derive(Clone)]
pub struct AzureConfig {
    pub account: String,
    pub token: String,
    pub endpoint: Option<String>,
}

impl AzureConfig {
    /// `account` usually comes from the run context; the token from
    /// `AZURE_STORAGE_TOKEN`, the endpoint override from `AZURE_STORAGE_ENDPOINT`.
    pub fn from_env(account: Option<&str>) -> ProviderResult<Self> {
        Self::from_lookup(account, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(account: Option<&str>, lookup: F) -> ProviderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let account = account
            .map(str::to_string)
            .or_else(|| get("AZURE_STORAGE_ACCOUNT"))
            .ok_or_else(|| ProviderError::Credentials("AZURE_STORAGE_ACCOUNT is not set".into()))?;
        let token = get("AZURE_STORAGE_TOKEN")
            .ok_or_else(|| ProviderError::Credentials("AZURE_STORAGE_TOKEN is not set".into()))?;
        Ok(Self {
            account,
            token,
            endpoint: get("AZURE_STORAGE_ENDPOINT"),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.blob.core.windows.net", self.account),
        }
    }
}

impl fmt::Debug for AzureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureConfig")
            .field("account", &self.account)
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Blob service implementation of [`ProviderApi`].
pub struct BlobApi {
    config: AzureConfig,
    http: reqwest::Client,
}

impl BlobApi {
    pub fn new(config: AzureConfig) -> ProviderResult<Self> {
        Ok(Self {
            config,
            http: super::http_client()?,
        })
    }

    fn url(&self, segments: &[&str]) -> ProviderResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.config.base_url())
            .map_err(|e| ProviderError::Request(format!("invalid blob endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Request("blob endpoint cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: reqwest::Url) -> RequestBuilder {
        debug!(method = %method, url = %url, "blob request");
        self.http
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header("x-ms-version", API_VERSION)
    }

    async fn check(response: Response) -> ProviderResult<Response> {
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(response);
        }
        let code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        let detail = match code {
            Some(code) => code,
            None => body.chars().take(200).collect(),
        };
        let detail = if status == 503 && detail.contains("ServerBusy") {
            format!("SlowDown: {}", detail)
        } else {
            detail
        };
        Err(ProviderError::from_status(status, detail))
    }
}

#[async_trait]
impl ProviderApi for BlobApi {
    fn provider(&self) -> Provider {
        Provider::Azure
    }

    async fn list_containers(&self) -> ProviderResult<Vec<ContainerRef>> {
        let mut out = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut url = self.url(&[])?;
            url.query_pairs_mut().append_pair("comp", "list");
            if let Some(m) = &marker {
                url.query_pairs_mut().append_pair("marker", m);
            }
            let response = Self::check(self.request(Method::GET, url).send().await?).await?;
            let page: ContainerEnumeration = quick_xml::de::from_str(&response.text().await?)?;

            out.extend(page.containers.container.into_iter().map(|c| ContainerRef {
                created_at: c
                    .properties
                    .and_then(|p| p.last_modified)
                    .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
                    .map(|d| d.with_timezone(&Utc)),
                name: c.name,
            }));

            match page.next_marker.filter(|m| !m.is_empty()) {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(out)
    }

    async fn container_tags(&self, container: &str) -> ProviderResult<BTreeMap<String, String>> {
        let mut url = self.url(&[container])?;
        url.query_pairs_mut()
            .append_pair("restype", "container")
            .append_pair("comp", "metadata");
        let response = Self::check(self.request(Method::GET, url).send().await?).await?;
        Ok(metadata_from_headers(response.headers()))
    }

    async fn list_objects(&self, container: &str) -> ProviderResult<Vec<ObjectRef>> {
        let mut url = self.url(&[container])?;
        url.query_pairs_mut()
            .append_pair("restype", "container")
            .append_pair("comp", "list")
            .append_pair("include", "versions");
        let response = Self::check(self.request(Method::GET, url).send().await?).await?;
        let page: BlobEnumeration = quick_xml::de::from_str(&response.text().await?)?;
        Ok(page
            .blobs
            .blob
            .into_iter()
            .map(|b| {
                // The current version goes through a plain delete; older
                // versions are addressed by id.
                let version = match b.is_current_version {
                    Some(true) => None,
                    _ => b.version_id,
                };
                ObjectRef::new(b.name, version)
            })
            .collect())
    }

    async fn delete_object(&self, container: &str, object: &ObjectRef) -> ProviderResult<()> {
        let mut segments = vec![container];
        segments.extend(object.key.split('/'));
        let mut url = self.url(&segments)?;
        let mut request = match &object.version {
            Some(version) => {
                url.query_pairs_mut().append_pair("versionid", version);
                self.request(Method::DELETE, url)
            }
            None => self
                .request(Method::DELETE, url)
                .header("x-ms-delete-snapshots", "include"),
        };
        request = request.header(reqwest::header::CONTENT_LENGTH, 0);
        Self::check(request.send().await?).await.map(|_| ())
    }

    async fn delete_container(&self, container: &str) -> ProviderResult<()> {
        let mut url = self.url(&[container])?;
        url.query_pairs_mut().append_pair("restype", "container");
        let request = self
            .request(Method::DELETE, url)
            .header(reqwest::header::CONTENT_LENGTH, 0);
        Self::check(request.send().await?).await.map(|_| ())
    }
}

/// Container metadata is returned as `x-ms-meta-<name>` response headers.
fn metadata_from_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct ContainerEnumeration {
    #[serde(rename = "Containers", default)]
    containers: ContainerList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ContainerList {
    #[serde(rename = "Container", default)]
    container: Vec<ContainerEntry>,
}

#[derive(Debug, Deserialize)]
struct ContainerEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties", default)]
    properties: Option<ContainerProperties>,
}

#[derive(Debug, Deserialize)]
struct ContainerProperties {
    #[serde(rename = "Last-Modified", default)]
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlobEnumeration {
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    blob: Vec<BlobEntry>,
}

#[derive(Debug, Deserialize)]
struct BlobEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "VersionId", default)]
    version_id: Option<String>,
    #[serde(rename = "IsCurrentVersion", default)]
    is_current_version: Option<bool>,
}
