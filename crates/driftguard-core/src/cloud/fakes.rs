//! In-memory provider used for simulation mode and tests.
//!
//! [`InMemoryProvider`] satisfies the [`ProviderApi`] contract without any
//! network. Clones share state, so a test can hand one clone to an adapter
//! and inspect the other afterwards. Every call is journaled and mutating
//! calls are counted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::cloud::adapter::{ContainerRef, ObjectRef, ProviderApi};
use crate::cloud::error::{ProviderError, ProviderResult};
use crate::cloud::resource::Provider;

#[derive(Debug, Clone, Default)]
struct FakeContainer {
    tags: BTreeMap<String, String>,
    objects: Vec<ObjectRef>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    containers: BTreeMap<String, FakeContainer>,
    tag_reads: Vec<String>,
    mutating_calls: usize,
    list_failures_remaining: u32,
    list_failure: Option<ProviderError>,
    deny_delete: BTreeSet<String>,
    deny_object_delete: BTreeSet<String>,
    vanish_before_delete: BTreeSet<String>,
    page_size: usize,
}

/// Shared-state in-memory provider.
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    provider: Provider,
    state: Arc<Mutex<State>>,
}

impl InMemoryProvider {
    pub fn new(provider: Provider) -> Self {
        let state = State {
            page_size: 1_000,
            ..State::default()
        };
        Self {
            provider,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the journal from the others.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a container with tags.
    pub fn with_container(self, name: &str, tags: &[(&str, &str)]) -> Self {
        self.insert(name, tags, Vec::new());
        self
    }

    /// Add a container holding `object_count` objects.
    pub fn with_objects(self, name: &str, tags: &[(&str, &str)], object_count: usize) -> Self {
        let objects = (0..object_count)
            .map(|i| ObjectRef::new(format!("obj-{:04}", i), Some(format!("v{}", i))))
            .collect();
        self.insert(name, tags, objects);
        self
    }

    /// Fail the next `times` container listings with `error`.
    pub fn failing_list(self, times: u32, error: ProviderError) -> Self {
        {
            let mut s = self.state();
            s.list_failures_remaining = times;
            s.list_failure = Some(error);
        }
        self
    }

    /// Deny container deletion for `name`.
    pub fn denying_delete(self, name: &str) -> Self {
        self.state().deny_delete.insert(name.to_string());
        self
    }

    /// Deny object deletion inside `name` (drain fails midway).
    pub fn denying_object_delete(self, name: &str) -> Self {
        self.state().deny_object_delete.insert(name.to_string());
        self
    }

    /// Simulate a concurrent external cleanup: `name` disappears right
    /// before the reaper's delete call reaches it.
    pub fn vanishing_before_delete(self, name: &str) -> Self {
        self.state().vanish_before_delete.insert(name.to_string());
        self
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state().page_size = page_size.max(1);
        self
    }

    pub fn insert(&self, name: &str, tags: &[(&str, &str)], objects: Vec<ObjectRef>) {
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state().containers.insert(
            name.to_string(),
            FakeContainer {
                tags,
                objects,
                created_at: Some(Utc::now()),
            },
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state().containers.contains_key(name)
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn object_count(&self, name: &str) -> usize {
        self.state()
            .containers
            .get(name)
            .map(|c| c.objects.len())
            .unwrap_or(0)
    }

    /// Containers whose tags were read, in order.
    pub fn tag_reads(&self) -> Vec<String> {
        self.state().tag_reads.clone()
    }

    /// Number of delete calls (objects and containers) that were issued.
    pub fn mutating_calls(&self) -> usize {
        self.state().mutating_calls
    }
}

#[async_trait]
impl ProviderApi for InMemoryProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list_containers(&self) -> ProviderResult<Vec<ContainerRef>> {
        let mut s = self.state();
        if s.list_failures_remaining > 0 {
            s.list_failures_remaining -= 1;
            if let Some(err) = s.list_failure.clone() {
                return Err(err);
            }
        }
        Ok(s.containers
            .iter()
            .map(|(name, c)| ContainerRef {
                name: name.clone(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn container_tags(&self, container: &str) -> ProviderResult<BTreeMap<String, String>> {
        let mut s = self.state();
        s.tag_reads.push(container.to_string());
        s.containers
            .get(container)
            .map(|c| c.tags.clone())
            .ok_or_else(|| ProviderError::NotFound(container.to_string()))
    }

    async fn list_objects(&self, container: &str) -> ProviderResult<Vec<ObjectRef>> {
        let s = self.state();
        let page_size = s.page_size;
        s.containers
            .get(container)
            .map(|c| c.objects.iter().take(page_size).cloned().collect())
            .ok_or_else(|| ProviderError::NotFound(container.to_string()))
    }

    async fn delete_object(&self, container: &str, object: &ObjectRef) -> ProviderResult<()> {
        let mut s = self.state();
        s.mutating_calls += 1;
        if s.deny_object_delete.contains(container) {
            return Err(ProviderError::PermissionDenied(format!(
                "s3:DeleteObjectVersion on {}/{}",
                container, object.key
            )));
        }
        let c = s
            .containers
            .get_mut(container)
            .ok_or_else(|| ProviderError::NotFound(container.to_string()))?;
        let before = c.objects.len();
        c.objects.retain(|o| o != object);
        if c.objects.len() == before {
            return Err(ProviderError::NotFound(object.key.clone()));
        }
        Ok(())
    }

    async fn delete_container(&self, container: &str) -> ProviderResult<()> {
        let mut s = self.state();
        s.mutating_calls += 1;
        if s.vanish_before_delete.remove(container) {
            s.containers.remove(container);
            return Err(ProviderError::NotFound(container.to_string()));
        }
        if s.deny_delete.contains(container) {
            return Err(ProviderError::PermissionDenied(format!(
                "delete denied for {}",
                container
            )));
        }
        let non_empty = match s.containers.get(container) {
            None => return Err(ProviderError::NotFound(container.to_string())),
            Some(c) => !c.objects.is_empty(),
        };
        if non_empty {
            return Err(ProviderError::Http {
                status: 409,
                message: format!("{} is not empty", container),
            });
        }
        s.containers.remove(container);
        Ok(())
    }
}

/// Provider seeded with the demo estate used by simulation mode.
///
/// Mixes protected, expired, active and out-of-prefix resources so a dry run
/// shows every branch of the reaper.
pub fn demo_provider(provider: Provider, now: DateTime<Utc>) -> InMemoryProvider {
    let key = provider.expiry_tag_key();
    let past = |d: Duration| (now - d).to_rfc3339();
    let future = |d: Duration| (now + d).to_rfc3339();

    let fake = InMemoryProvider::new(provider);
    match provider {
        Provider::Aws => {
            let expired = past(Duration::hours(2));
            let active = future(Duration::hours(19));
            let protected_expiry = past(Duration::days(30));
            fake.with_container(
                "driftguard-bucket-prod-01",
                &[("Environment", "Production"), (key, protected_expiry.as_str())],
            )
            .with_objects("driftguard-dev-env-pr-404", &[(key, expired.as_str())], 3)
            .with_container("driftguard-test-db-shard-1", &[(key, active.as_str())])
            .with_container("core-api-v2", &[("Owner", "PlatformTeam")])
        }
        Provider::Azure => {
            let expired = past(Duration::days(1));
            fake.with_objects("driftguard-temp-storage-99", &[(key, expired.as_str())], 2)
                .with_container("shared-assets", &[(key, expired.as_str())])
        }
        Provider::Gcp => {
            let active = future(Duration::days(2));
            fake.with_container("driftguard-preview-pr-17", &[(key, active.as_str())])
                .with_container("driftguard-core-api-v2", &[("owner", "platformteam")])
        }
    }
}
