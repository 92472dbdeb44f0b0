//! Multi-cloud resource reaper.
//!
//! - [`resource`]: provider-agnostic view plus the safety/expiry rules
//! - [`adapter`]: the adapter contract and the shared scan-and-clean core
//! - [`aws`], [`azure`], [`gcp`]: REST implementations of [`ProviderApi`]
//! - [`reaper`]: fans a scan out over the requested providers
//! - [`fakes`]: in-memory provider for simulation mode and tests

pub mod adapter;
pub mod aws;
pub mod azure;
pub mod error;
pub mod fakes;
pub mod gcp;
pub mod reaper;
pub mod resource;
pub mod sigv4;

use std::time::Duration;

pub use adapter::{
    CloudAdapter, ContainerRef, ObjectRef, ProviderApi, ResourceFailure, ScanReport,
    StorageAdapter,
};
pub use error::{ProviderError, ProviderResult};
pub use reaper::{AdapterFactory, DefaultAdapterFactory, ReapSummary, ReaperSettings, ResourceReaper};
pub use resource::{
    evaluate_expiry, evaluate_safety, parse_expiry, within_blast_radius, CloudResource,
    ExpiryStatus, Provider, SafetyVerdict, DEFAULT_PREFIX,
};

const USER_AGENT: &str = concat!("driftguard/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by the provider adapters.
pub(crate) fn http_client() -> ProviderResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| ProviderError::Credentials(format!("cannot build HTTP client: {}", e)))
}
