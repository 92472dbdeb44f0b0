//! Adapter contract and the shared scan-and-clean core.
//!
//! Each provider implements the narrow [`ProviderApi`] (list, read tags,
//! drain, delete). [`StorageAdapter`] layers the invariants on top so they
//! exist exactly once:
//!
//! 1. blast radius: names outside the prefix are counted and never read;
//! 2. protection: `Protected=true` / `Environment=Production` is final;
//! 3. expiry: only a timestamp strictly in the past qualifies;
//! 4. dry run: no mutating call at all;
//! 5. deletion drains objects first, and "already gone" counts as success.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cloud::error::{ProviderError, ProviderResult};
use crate::cloud::resource::{
    within_blast_radius, CloudResource, ExpiryStatus, Provider, DEFAULT_PREFIX,
};
use crate::obs;
use crate::retry::{retry_if, RetryPolicy};

/// A top-level container (bucket) as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl ContainerRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
        }
    }
}

/// One object (or object version) inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub key: String,
    pub version: Option<String>,
}

impl ObjectRef {
    pub fn new(key: impl Into<String>, version: Option<String>) -> Self {
        Self {
            key: key.into(),
            version,
        }
    }
}

/// Raw provider operations. Implementations do no policy work.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    fn provider(&self) -> Provider;

    /// Enumerate every container visible to the credentials.
    async fn list_containers(&self) -> ProviderResult<Vec<ContainerRef>>;

    /// Read the tags/labels/metadata of one container.
    async fn container_tags(&self, container: &str) -> ProviderResult<BTreeMap<String, String>>;

    /// One page of objects, all versions included. Empty means drained.
    async fn list_objects(&self, container: &str) -> ProviderResult<Vec<ObjectRef>>;

    async fn delete_object(&self, container: &str, object: &ObjectRef) -> ProviderResult<()>;

    /// Remove an (empty) container.
    async fn delete_container(&self, container: &str) -> ProviderResult<()>;
}

/// Per-provider "enumerate, evaluate, destroy safely" capability.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Run one pass. Only a failed enumeration is returned as an error;
    /// per-resource failures are recorded in the report.
    async fn scan_and_clean(&self, dry_run: bool) -> ProviderResult<ScanReport>;
}

/// A resource whose processing failed; the scan moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    pub resource: String,
    pub error: String,
}

/// What one provider pass saw and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub provider: Provider,
    pub dry_run: bool,
    /// Containers returned by enumeration.
    pub examined: usize,
    /// Containers ignored because they lack the governance prefix.
    pub outside_prefix: usize,
    pub protected: Vec<String>,
    pub active: Vec<String>,
    pub untagged: Vec<String>,
    pub unparseable: Vec<String>,
    /// Expired and destroyed (or already gone).
    pub deleted: Vec<String>,
    /// Expired, but left alone because of dry run.
    pub planned: Vec<String>,
    pub failures: Vec<ResourceFailure>,
}

impl ScanReport {
    pub fn new(provider: Provider, dry_run: bool) -> Self {
        Self {
            provider,
            dry_run,
            examined: 0,
            outside_prefix: 0,
            protected: Vec::new(),
            active: Vec::new(),
            untagged: Vec::new(),
            unparseable: Vec::new(),
            deleted: Vec::new(),
            planned: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// One-line summary for stage details and logs.
    pub fn summary(&self) -> String {
        format!(
            "{}: examined={} deleted={} planned={} protected={} active={} failed={}",
            self.provider,
            self.examined,
            self.deleted.len(),
            self.planned.len(),
            self.protected.len(),
            self.active.len(),
            self.failures.len()
        )
    }
}

/// Shared scan-and-clean implementation over any [`ProviderApi`].
pub struct StorageAdapter<A> {
    api: A,
    prefix: String,
    retry: RetryPolicy,
    max_drain_rounds: usize,
}

impl<A: ProviderApi> StorageAdapter<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            prefix: DEFAULT_PREFIX.to_string(),
            retry: RetryPolicy::enumeration(),
            max_drain_rounds: 1_000,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_drain_rounds(mut self, rounds: usize) -> Self {
        self.max_drain_rounds = rounds.max(1);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// [`CloudAdapter::scan_and_clean`] against an explicit clock.
    pub async fn scan_and_clean_at(
        &self,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> ProviderResult<ScanReport> {
        let provider = self.api.provider();
        let mut report = ScanReport::new(provider, dry_run);

        info!(provider = %provider, dry_run, prefix = %self.prefix, "scanning for expired resources");

        let containers = retry_if(
            &self.retry,
            "list_containers",
            ProviderError::is_retryable,
            || self.api.list_containers(),
        )
        .await?;

        for container in &containers {
            report.examined += 1;

            if !within_blast_radius(&container.name, &self.prefix) {
                report.outside_prefix += 1;
                continue;
            }

            if let Err(err) = self.process(container, dry_run, now, &mut report).await {
                obs::emit_resource_failed(provider.as_str(), &container.name, &err);
                report.failures.push(ResourceFailure {
                    resource: container.name.clone(),
                    error: err.to_string(),
                });
            }
        }

        info!(provider = %provider, summary = %report.summary(), "scan finished");
        Ok(report)
    }

    async fn process(
        &self,
        container: &ContainerRef,
        dry_run: bool,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> ProviderResult<()> {
        let provider = self.api.provider();
        let name = container.name.as_str();

        let tags = match self.api.container_tags(name).await {
            Ok(tags) => tags,
            Err(err) if err.is_not_found() => {
                debug!(provider = %provider, resource = %name, "vanished before tags were read");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let mut resource = CloudResource::new(name, provider, tags, container.created_at);

        // Protection is decided before the expiry tag is even parsed.
        let safety = resource.safety();
        if !safety.allowed_to_delete {
            obs::emit_resource_skipped(provider.as_str(), name, &safety.reason);
            report.protected.push(resource.id);
            return Ok(());
        }

        match resource.evaluate(now) {
            ExpiryStatus::Untagged => {
                debug!(provider = %provider, resource = %name, "no expiry tag");
                report.untagged.push(resource.id);
            }
            ExpiryStatus::Unparseable(raw) => {
                warn!(provider = %provider, resource = %name, value = %raw, "unparseable expiry tag, keeping resource");
                report.unparseable.push(resource.id);
            }
            ExpiryStatus::Active(at) => {
                debug!(provider = %provider, resource = %name, expires_at = %at, "active");
                report.active.push(resource.id);
            }
            ExpiryStatus::Expired(at) => {
                if dry_run {
                    info!(provider = %provider, resource = %name, expired_at = %at, "expired (dry run, not deleting)");
                    obs::emit_resource_planned(provider.as_str(), name);
                    report.planned.push(resource.id);
                } else {
                    info!(provider = %provider, resource = %name, expired_at = %at, "expired, destroying");
                    self.destroy(name).await?;
                    obs::emit_resource_deleted(provider.as_str(), name);
                    report.deleted.push(resource.id);
                }
            }
        }
        Ok(())
    }

    /// Drain then delete a container. A container that is already gone is
    /// a success; a failed drain aborts before the container delete.
    pub async fn destroy(&self, container: &str) -> ProviderResult<()> {
        if !self.drain(container).await? {
            info!(resource = %container, "already gone during drain");
            return Ok(());
        }

        match self.api.delete_container(container).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                info!(resource = %container, "already gone at delete, treating as success");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Delete every object and version. Returns `false` if the container
    /// itself disappeared while draining.
    async fn drain(&self, container: &str) -> ProviderResult<bool> {
        for _ in 0..self.max_drain_rounds {
            let objects = match retry_if(
                &self.retry,
                "list_objects",
                ProviderError::is_retryable,
                || self.api.list_objects(container),
            )
            .await
            {
                Ok(objects) => objects,
                Err(err) if err.is_not_found() => return Ok(false),
                Err(err) => return Err(err),
            };

            if objects.is_empty() {
                return Ok(true);
            }

            for object in &objects {
                match self.api.delete_object(container, object).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => {
                        warn!(resource = %container, object = %object.key, error = %err, "drain aborted");
                        return Err(err);
                    }
                }
            }
        }

        Err(ProviderError::Transient(format!(
            "container {} still not empty after {} drain rounds",
            container, self.max_drain_rounds
        )))
    }
}

#[async_trait]
impl<A: ProviderApi> CloudAdapter for StorageAdapter<A> {
    fn provider(&self) -> Provider {
        self.api.provider()
    }

    async fn scan_and_clean(&self, dry_run: bool) -> ProviderResult<ScanReport> {
        self.scan_and_clean_at(dry_run, Utc::now()).await
    }
}
