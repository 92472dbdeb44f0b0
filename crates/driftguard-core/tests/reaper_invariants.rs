//! Safety properties of scan-and-clean, checked against the in-memory
//! provider which journals tag reads and counts mutating calls.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use driftguard_core::cloud::fakes::InMemoryProvider;
use driftguard_core::cloud::{
    AdapterFactory, CloudAdapter, Provider, ProviderError, ReaperSettings, ResourceReaper,
    StorageAdapter,
};
use driftguard_core::{Context, RetryPolicy};

const EXPIRY: &str = "driftguard-expiry";

fn adapter(fake: &InMemoryProvider) -> StorageAdapter<InMemoryProvider> {
    StorageAdapter::new(fake.clone()).with_retry(RetryPolicy::none())
}

#[tokio::test]
async fn test_protected_resources_survive_past_expiry() {
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_container(
            "driftguard-locked",
            &[(EXPIRY, "2020-01-01"), ("Protected", "true")],
        )
        .with_container(
            "driftguard-prod",
            &[(EXPIRY, "2020-01-01"), ("environment", "production")],
        );

    let report = adapter(&fake).scan_and_clean(false).await.unwrap();

    assert!(fake.exists("driftguard-locked"));
    assert!(fake.exists("driftguard-prod"));
    assert_eq!(report.protected.len(), 2);
    assert!(report.deleted.is_empty());
    assert_eq!(fake.mutating_calls(), 0);
}

#[tokio::test]
async fn test_resources_outside_prefix_are_never_read() {
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_container("core-api-v2", &[(EXPIRY, "2000-01-01")])
        .with_container("driftguard-old", &[(EXPIRY, "2000-01-01")]);

    let report = adapter(&fake).scan_and_clean(false).await.unwrap();

    assert_eq!(fake.tag_reads(), vec!["driftguard-old".to_string()]);
    assert!(fake.exists("core-api-v2"));
    assert!(!fake.exists("driftguard-old"));
    assert_eq!(report.outside_prefix, 1);
    assert_eq!(report.examined, 2);
}

#[tokio::test]
async fn test_custom_prefix_narrows_blast_radius() {
    let fake = InMemoryProvider::new(Provider::Gcp)
        .with_container("driftguard-a", &[(EXPIRY, "2000-01-01")])
        .with_container("preview-b", &[(EXPIRY, "2000-01-01")]);

    adapter(&fake)
        .with_prefix("preview-")
        .scan_and_clean(false)
        .await
        .unwrap();

    assert!(fake.exists("driftguard-a"));
    assert!(!fake.exists("preview-b"));
}

#[tokio::test]
async fn test_dry_run_makes_no_mutating_calls() {
    let mut fake = InMemoryProvider::new(Provider::Aws);
    for i in 0..5 {
        fake = fake.with_objects(&format!("driftguard-pr-{}", i), &[(EXPIRY, "2001-05-05")], 3);
    }

    let report = adapter(&fake).scan_and_clean(true).await.unwrap();

    assert_eq!(report.planned.len(), 5);
    assert!(report.deleted.is_empty());
    assert_eq!(fake.mutating_calls(), 0);
    assert_eq!(fake.container_names().len(), 5);
}

#[tokio::test]
async fn test_strictly_past_expiry_only() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_container("driftguard-now", &[(EXPIRY, "2024-06-01T12:00:00Z")])
        .with_container("driftguard-naive", &[(EXPIRY, "2024-06-01T11:59:59")])
        .with_container("driftguard-untagged", &[("Owner", "qa")])
        .with_container("driftguard-garbled", &[(EXPIRY, "next tuesday")]);

    let report = adapter(&fake).scan_and_clean_at(false, now).await.unwrap();

    assert_eq!(report.deleted, vec!["driftguard-naive".to_string()]);
    assert_eq!(report.active, vec!["driftguard-now".to_string()]);
    assert_eq!(report.untagged, vec!["driftguard-untagged".to_string()]);
    assert_eq!(report.unparseable, vec!["driftguard-garbled".to_string()]);
}

#[tokio::test]
async fn test_legacy_and_case_insensitive_expiry_keys() {
    let fake = InMemoryProvider::new(Provider::Azure)
        .with_container("driftguard-legacy", &[("driftguard_ttl_expiry", "2000-01-01")])
        .with_container("driftguard-upper", &[("DriftGuard_Expiry", "2000-01-01 10:00")]);

    let report = adapter(&fake).scan_and_clean(false).await.unwrap();

    assert_eq!(report.deleted.len(), 2);
    assert!(fake.container_names().is_empty());
}

#[tokio::test]
async fn test_already_deleted_counts_as_success() {
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_container("driftguard-racy", &[(EXPIRY, "2000-01-01")])
        .vanishing_before_delete("driftguard-racy");

    let report = adapter(&fake).scan_and_clean(false).await.unwrap();

    assert_eq!(report.deleted, vec!["driftguard-racy".to_string()]);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_failed_drain_keeps_container_and_scan_continues() {
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_objects("driftguard-a", &[(EXPIRY, "2000-01-01")], 4)
        .denying_object_delete("driftguard-a")
        .with_container("driftguard-b", &[(EXPIRY, "2000-01-01")]);

    let report = adapter(&fake).scan_and_clean(false).await.unwrap();

    assert!(fake.exists("driftguard-a"));
    assert_eq!(fake.object_count("driftguard-a"), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].resource, "driftguard-a");
    assert!(report.failures[0].error.contains("permission denied"));
    assert!(!fake.exists("driftguard-b"));
    // One rejected object delete, then the container delete for b.
    assert_eq!(fake.mutating_calls(), 2);
}

#[tokio::test]
async fn test_container_delete_denied_is_isolated() {
    let fake = InMemoryProvider::new(Provider::Gcp)
        .with_container("driftguard-a", &[(EXPIRY, "2000-01-01")])
        .denying_delete("driftguard-a")
        .with_container("driftguard-b", &[(EXPIRY, "2000-01-01")]);

    let report = adapter(&fake).scan_and_clean(false).await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.deleted, vec!["driftguard-b".to_string()]);
}

#[tokio::test]
async fn test_drain_follows_pagination() {
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_objects("driftguard-big", &[(EXPIRY, "2000-01-01")], 7)
        .with_page_size(3);

    let report = adapter(&fake).scan_and_clean(false).await.unwrap();

    assert_eq!(report.deleted, vec!["driftguard-big".to_string()]);
    assert_eq!(fake.mutating_calls(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_enumeration_retries_then_succeeds() {
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_container("driftguard-old", &[(EXPIRY, "2000-01-01")])
        .failing_list(2, ProviderError::Throttled("SlowDown".into()));

    let report = StorageAdapter::new(fake.clone())
        .with_retry(RetryPolicy::enumeration())
        .scan_and_clean(false)
        .await
        .unwrap();

    assert_eq!(report.deleted.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_enumeration_gives_up_after_three_attempts() {
    let fake = InMemoryProvider::new(Provider::Aws)
        .with_container("driftguard-old", &[(EXPIRY, "2000-01-01")])
        .failing_list(3, ProviderError::Transient("503".into()));

    let err = StorageAdapter::new(fake.clone())
        .with_retry(RetryPolicy::enumeration())
        .scan_and_clean(false)
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Transient(_)));
    assert!(fake.exists("driftguard-old"));
}

/// AWS works, Azure has no credentials, GCP cannot list.
struct MixedFactory {
    aws: InMemoryProvider,
    gcp: InMemoryProvider,
}

impl AdapterFactory for MixedFactory {
    fn build(
        &self,
        provider: Provider,
        _ctx: &Context,
        settings: &ReaperSettings,
    ) -> Result<Box<dyn CloudAdapter>, ProviderError> {
        let fake = match provider {
            Provider::Aws => self.aws.clone(),
            Provider::Gcp => self.gcp.clone(),
            Provider::Azure => {
                return Err(ProviderError::Credentials("AZURE_STORAGE_TOKEN not set".into()))
            }
        };
        Ok(Box::new(
            StorageAdapter::new(fake)
                .with_prefix(settings.prefix.clone())
                .with_retry(settings.retry.clone()),
        ))
    }
}

#[tokio::test]
async fn test_reaper_continues_past_broken_providers() {
    let aws = InMemoryProvider::new(Provider::Aws)
        .with_container("driftguard-old", &[(EXPIRY, "2000-01-01")]);
    let gcp = InMemoryProvider::new(Provider::Gcp)
        .failing_list(1, ProviderError::PermissionDenied("storage.buckets.list".into()));
    let reaper = ResourceReaper::new(Arc::new(MixedFactory {
        aws: aws.clone(),
        gcp,
    }))
    .with_settings(ReaperSettings {
        retry: RetryPolicy::none(),
        ..ReaperSettings::default()
    });

    let targets: BTreeSet<Provider> = Provider::ALL.into_iter().collect();
    let summary = reaper
        .scan(&Context::builder().build(), &targets, false)
        .await;

    assert_eq!(summary.deleted(), 1);
    assert!(!aws.exists("driftguard-old"));
    assert_eq!(summary.init_failures.len(), 1);
    assert_eq!(summary.init_failures[0].0, Provider::Azure);
    assert_eq!(summary.scan_failures.len(), 1);
    assert_eq!(summary.scan_failures[0].0, Provider::Gcp);
    assert!(summary.describe().contains("azure: init failed"));
}

#[tokio::test]
async fn test_reaper_only_builds_requested_targets() {
    let aws = InMemoryProvider::new(Provider::Aws)
        .with_container("driftguard-old", &[(EXPIRY, "2000-01-01")]);
    let reaper = ResourceReaper::new(Arc::new(MixedFactory {
        aws: aws.clone(),
        gcp: InMemoryProvider::new(Provider::Gcp),
    }));

    let targets = BTreeSet::from([Provider::Gcp]);
    let summary = reaper
        .scan(&Context::builder().build(), &targets, true)
        .await;

    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].provider, Provider::Gcp);
    assert!(summary.init_failures.is_empty());
    assert!(aws.tag_reads().is_empty());
}
