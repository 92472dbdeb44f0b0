//! AWS S3 provider over the signed REST API.
//!
//! Buckets are the containers; bucket tags carry expiry and protection.
//! Path-style addressing against the regional endpoint, XML responses.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use crate::cloud::adapter::{ContainerRef, ObjectRef, ProviderApi};
use crate::cloud::error::{ProviderError, ProviderResult};
use crate::cloud::resource::Provider;
use crate::cloud::sigv4::{self, SignableRequest, SigningKey, EMPTY_PAYLOAD_SHA256};

/// S3 connection settings.
#[derive(Clone)]
pub struct AwsConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
    /// Override for S3-compatible endpoints and tests.
    pub endpoint: Option<String>,
}

impl AwsConfig {
    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`
    /// and `AWS_ENDPOINT_URL`.
    pub fn from_env(region: &str) -> ProviderResult<Self> {
        Self::from_lookup(region, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(region: &str, lookup: F) -> ProviderResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let access_key_id = get("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| ProviderError::Credentials("AWS_ACCESS_KEY_ID is not set".into()))?;
        let secret_access_key = get("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| ProviderError::Credentials("AWS_SECRET_ACCESS_KEY is not set".into()))?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: get("AWS_SESSION_TOKEN"),
            region: region.to_string(),
            endpoint: get("AWS_ENDPOINT_URL"),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }
}

impl fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// S3 implementation of [`ProviderApi`].
pub struct S3Api {
    config: AwsConfig,
    http: reqwest::Client,
}

impl S3Api {
    pub fn new(config: AwsConfig) -> ProviderResult<Self> {
        Ok(Self {
            config,
            http: super::http_client()?,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
    ) -> ProviderResult<(u16, String)> {
        let base = reqwest::Url::parse(&self.config.base_url())
            .map_err(|e| ProviderError::Request(format!("invalid S3 endpoint: {}", e)))?;
        let host = match (base.host_str(), base.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(ProviderError::Request("S3 endpoint has no host".into())),
        };
        let full_path = format!("{}{}", base.path().trim_end_matches('/'), path);

        let mut url = format!("{}://{}{}", base.scheme(), host, full_path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&sigv4::canonical_query(query));
        }

        let key = SigningKey {
            access_key_id: &self.config.access_key_id,
            secret_access_key: &self.config.secret_access_key,
            session_token: self.config.session_token.as_deref(),
            region: &self.config.region,
            service: "s3",
        };
        let signed = sigv4::sign(
            &key,
            &SignableRequest {
                method: method.as_str(),
                host: &host,
                path: &full_path,
                query,
                headers: &[],
                payload_sha256: EMPTY_PAYLOAD_SHA256,
            },
            Utc::now(),
        )
        .map_err(|_| ProviderError::Credentials("unusable AWS signing key".to_string()))?;

        debug!(method = %method, url = %url, "s3 request");
        let mut request = self.http.request(method, &url);
        for (name, value) in &signed {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Send and map non-2xx responses through the S3 error document.
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
    ) -> ProviderResult<String> {
        let (status, body) = self.send(method, path, query).await?;
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(s3_error(status, &body))
        }
    }
}

fn bucket_path(bucket: &str) -> String {
    format!("/{}", sigv4::uri_encode(bucket, false))
}

fn s3_error(status: u16, body: &str) -> ProviderError {
    let detail = match quick_xml::de::from_str::<S3ErrorBody>(body) {
        Ok(err) => match err.message {
            Some(message) => format!("{}: {}", err.code, message),
            None => err.code,
        },
        Err(_) => body.chars().take(200).collect(),
    };
    ProviderError::from_status(status, detail)
}

#[async_trait]
impl ProviderApi for S3Api {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn list_containers(&self) -> ProviderResult<Vec<ContainerRef>> {
        let body = self.call(Method::GET, "/", &[]).await?;
        let parsed: ListAllMyBucketsResult = quick_xml::de::from_str(&body)?;
        Ok(parsed
            .buckets
            .bucket
            .into_iter()
            .map(|b| ContainerRef {
                created_at: b
                    .creation_date
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.with_timezone(&Utc)),
                name: b.name,
            })
            .collect())
    }

    async fn container_tags(&self, container: &str) -> ProviderResult<BTreeMap<String, String>> {
        let query = [("tagging".to_string(), String::new())];
        let (status, body) = self.send(Method::GET, &bucket_path(container), &query).await?;
        if status == 404 && body.contains("NoSuchTagSet") {
            return Ok(BTreeMap::new());
        }
        if !(200..300).contains(&status) {
            return Err(s3_error(status, &body));
        }
        let parsed: Tagging = quick_xml::de::from_str(&body)?;
        Ok(parsed
            .tag_set
            .tag
            .into_iter()
            .map(|t| (t.key, t.value))
            .collect())
    }

    async fn list_objects(&self, container: &str) -> ProviderResult<Vec<ObjectRef>> {
        let query = [
            ("versions".to_string(), String::new()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        let body = self.call(Method::GET, &bucket_path(container), &query).await?;
        let parsed: ListVersionsResult = quick_xml::de::from_str(&body)?;
        Ok(parsed
            .versions
            .into_iter()
            .chain(parsed.delete_markers)
            .map(|v| ObjectRef::new(v.key, v.version_id))
            .collect())
    }

    async fn delete_object(&self, container: &str, object: &ObjectRef) -> ProviderResult<()> {
        let path = format!(
            "{}/{}",
            bucket_path(container),
            sigv4::uri_encode(&object.key, true)
        );
        let query: Vec<(String, String)> = object
            .version
            .iter()
            .map(|v| ("versionId".to_string(), v.clone()))
            .collect();
        self.call(Method::DELETE, &path, &query).await.map(|_| ())
    }

    async fn delete_container(&self, container: &str) -> ProviderResult<()> {
        self.call(Method::DELETE, &bucket_path(container), &[])
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct S3ErrorBody {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListAllMyBucketsResult {
    #[serde(rename = "Buckets", default)]
    buckets: BucketList,
}

#[derive(Debug, Default, Deserialize)]
struct BucketList {
    #[serde(rename = "Bucket", default)]
    bucket: Vec<BucketEntry>,
}

#[derive(Debug, Deserialize)]
struct BucketEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CreationDate", default)]
    creation_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tagging {
    #[serde(rename = "TagSet", default)]
    tag_set: TagSet,
}

#[derive(Debug, Default, Deserialize)]
struct TagSet {
    #[serde(rename = "Tag", default)]
    tag: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ListVersionsResult {
    #[serde(rename = "Version", default)]
    versions: Vec<VersionEntry>,
    #[serde(rename = "DeleteMarker", default)]
    delete_markers: Vec<VersionEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "VersionId", default)]
    version_id: Option<String>,
}
