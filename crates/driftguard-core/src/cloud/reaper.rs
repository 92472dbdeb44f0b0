//! Fan-out over providers.
//!
//! Providers are processed one after another. A provider whose adapter
//! cannot be built, or whose enumeration keeps failing, is logged and
//! recorded; the remaining providers still run.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cloud::adapter::{CloudAdapter, ScanReport, StorageAdapter};
use crate::cloud::aws::{AwsConfig, S3Api};
use crate::cloud::azure::{AzureConfig, BlobApi};
use crate::cloud::error::ProviderError;
use crate::cloud::fakes::demo_provider;
use crate::cloud::gcp::{GcpConfig, GcsApi};
use crate::cloud::resource::{Provider, DEFAULT_PREFIX};
use crate::domain::{Context, Mode};
use crate::retry::RetryPolicy;

/// Knobs shared by every adapter in one reaper run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaperSettings {
    pub prefix: String,
    pub retry: RetryPolicy,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            retry: RetryPolicy::enumeration(),
        }
    }
}

/// Builds the adapter for one provider. Failing here means "credentials or
/// configuration unusable", never "resource problem".
pub trait AdapterFactory: Send + Sync {
    fn build(
        &self,
        provider: Provider,
        ctx: &Context,
        settings: &ReaperSettings,
    ) -> Result<Box<dyn CloudAdapter>, ProviderError>;
}

/// Live mode talks to the provider REST APIs; simulation mode uses the
/// seeded in-memory estate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAdapterFactory;

impl AdapterFactory for DefaultAdapterFactory {
    fn build(
        &self,
        provider: Provider,
        ctx: &Context,
        settings: &ReaperSettings,
    ) -> Result<Box<dyn CloudAdapter>, ProviderError> {
        fn wrap<A: crate::cloud::ProviderApi + 'static>(
            api: A,
            settings: &ReaperSettings,
        ) -> Box<dyn CloudAdapter> {
            Box::new(
                StorageAdapter::new(api)
                    .with_prefix(settings.prefix.clone())
                    .with_retry(settings.retry.clone()),
            )
        }

        if ctx.mode() == Mode::Simulation {
            return Ok(wrap(demo_provider(provider, Utc::now()), settings));
        }

        Ok(match provider {
            Provider::Aws => wrap(S3Api::new(AwsConfig::from_env(ctx.cloud_region())?)?, settings),
            Provider::Azure => wrap(
                BlobApi::new(AzureConfig::from_env(ctx.azure_account())?)?,
                settings,
            ),
            Provider::Gcp => wrap(GcsApi::new(GcpConfig::from_env(ctx.gcp_project())?)?, settings),
        })
    }
}

/// Result of one reaper run across providers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapSummary {
    pub reports: Vec<ScanReport>,
    /// Providers whose adapter could not be initialised.
    pub init_failures: Vec<(Provider, String)>,
    /// Providers whose enumeration failed after retries.
    pub scan_failures: Vec<(Provider, String)>,
}

impl ReapSummary {
    pub fn deleted(&self) -> usize {
        self.reports.iter().map(|r| r.deleted.len()).sum()
    }

    pub fn planned(&self) -> usize {
        self.reports.iter().map(|r| r.planned.len()).sum()
    }

    pub fn resource_failures(&self) -> usize {
        self.reports.iter().map(|r| r.failures.len()).sum()
    }

    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = self.reports.iter().map(ScanReport::summary).collect();
        parts.extend(
            self.init_failures
                .iter()
                .map(|(p, e)| format!("{}: init failed ({})", p, e)),
        );
        parts.extend(
            self.scan_failures
                .iter()
                .map(|(p, e)| format!("{}: scan failed ({})", p, e)),
        );
        if parts.is_empty() {
            "no providers scanned".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Runs scan-and-clean over a set of providers.
#[derive(Clone)]
pub struct ResourceReaper {
    factory: Arc<dyn AdapterFactory>,
    settings: ReaperSettings,
}

impl Default for ResourceReaper {
    fn default() -> Self {
        Self::new(Arc::new(DefaultAdapterFactory))
    }
}

impl ResourceReaper {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            factory,
            settings: ReaperSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ReaperSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ReaperSettings {
        &self.settings
    }

    pub async fn scan(
        &self,
        ctx: &Context,
        providers: &BTreeSet<Provider>,
        dry_run: bool,
    ) -> ReapSummary {
        let mut summary = ReapSummary::default();

        for &provider in providers {
            let adapter = match self.factory.build(provider, ctx, &self.settings) {
                Ok(adapter) => adapter,
                Err(err) => {
                    error!(provider = %provider, error = %err, "adapter initialisation failed, skipping provider");
                    summary.init_failures.push((provider, err.to_string()));
                    continue;
                }
            };

            match adapter.scan_and_clean(dry_run).await {
                Ok(report) => summary.reports.push(report),
                Err(err) => {
                    error!(provider = %provider, error = %err, "enumeration failed, skipping provider");
                    summary.scan_failures.push((provider, err.to_string()));
                }
            }
        }

        info!(
            deleted = summary.deleted(),
            planned = summary.planned(),
            failed_providers = summary.init_failures.len() + summary.scan_failures.len(),
            "reaper run complete"
        );
        summary
    }
}
