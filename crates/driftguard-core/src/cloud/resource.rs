//! Provider-agnostic resource view and the pure safety/expiry rules.
//!
//! Everything here is side-effect free: adapters feed it tags and act on the
//! answers. The ordering contract is blast radius, then protection, then
//! expiry; [`StorageAdapter`](super::adapter::StorageAdapter) follows it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Naming prefix that marks a resource as owned by DriftGuard.
pub const DEFAULT_PREFIX: &str = "driftguard-";

/// Expiry tag keys accepted on every provider, after the provider's own key.
pub const LEGACY_EXPIRY_KEYS: [&str; 3] =
    ["driftguard-expiry", "driftguard_ttl_expiry", "driftguard:expiry"];

/// Supported cloud providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Aws, Provider::Azure, Provider::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }

    /// Provider-appropriate spelling of the expiry tag.
    ///
    /// Azure metadata names must be valid C# identifiers, so no dash there.
    pub fn expiry_tag_key(&self) -> &'static str {
        match self {
            Provider::Aws | Provider::Gcp => "driftguard-expiry",
            Provider::Azure => "driftguard_expiry",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" | "s3" => Ok(Provider::Aws),
            "azure" | "blob" => Ok(Provider::Azure),
            "gcp" | "gcs" | "google" => Ok(Provider::Gcp),
            other => Err(format!("unknown cloud provider: {}", other)),
        }
    }
}

/// Transient, provider-agnostic view of one taggable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudResource {
    pub id: String,
    pub provider: Provider,
    pub tags: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
}

impl CloudResource {
    /// Expiry starts unset; it is only read by [`CloudResource::evaluate`]
    /// once the safety check has passed.
    pub fn new(
        id: impl Into<String>,
        provider: Provider,
        tags: BTreeMap<String, String>,
        created_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            tags,
            created_at,
            expiry: None,
        }
    }

    /// Case-insensitive tag lookup.
    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }

    pub fn safety(&self) -> SafetyVerdict {
        evaluate_safety(&self.tags)
    }

    /// Evaluate the expiry tag against `now` and remember the parsed
    /// timestamp. Callers check [`CloudResource::safety`] first.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> ExpiryStatus {
        let status = evaluate_expiry(&self.tags, self.provider, now);
        self.expiry = match &status {
            ExpiryStatus::Active(at) | ExpiryStatus::Expired(at) => Some(*at),
            ExpiryStatus::Untagged | ExpiryStatus::Unparseable(_) => None,
        };
        status
    }
}

/// Whether a resource may be deleted at all, decided from tags alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub allowed_to_delete: bool,
    pub reason: String,
}

/// Outcome of reading the expiry tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryStatus {
    /// No recognised expiry tag.
    Untagged,
    /// Tag present but not a timestamp we understand.
    Unparseable(String),
    Active(DateTime<Utc>),
    Expired(DateTime<Utc>),
}

/// Blast-radius check: only identifiers carrying the governance prefix.
pub fn within_blast_radius(id: &str, prefix: &str) -> bool {
    !prefix.is_empty() && id.starts_with(prefix)
}

/// Hard protection rule: `Protected=true` or `Environment=Production`
/// forbids deletion whatever the expiry says.
pub fn evaluate_safety(tags: &BTreeMap<String, String>) -> SafetyVerdict {
    if let Some(v) = find_tag(tags, "Protected") {
        if v.trim().eq_ignore_ascii_case("true") {
            return SafetyVerdict {
                allowed_to_delete: false,
                reason: "tagged Protected=true".to_string(),
            };
        }
    }
    if let Some(v) = find_tag(tags, "Environment") {
        if v.trim().eq_ignore_ascii_case("production") {
            return SafetyVerdict {
                allowed_to_delete: false,
                reason: "tagged Environment=Production".to_string(),
            };
        }
    }
    SafetyVerdict {
        allowed_to_delete: true,
        reason: "no protection tags".to_string(),
    }
}

/// Locate the expiry tag: the provider's own key first, then legacy keys.
pub fn expiry_tag(tags: &BTreeMap<String, String>, provider: Provider) -> Option<(&str, &str)> {
    std::iter::once(provider.expiry_tag_key())
        .chain(LEGACY_EXPIRY_KEYS)
        .find_map(|key| {
            tags.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(k, v)| (k.as_str(), v.as_str()))
        })
}

/// Evaluate expiry against `now`. Expired means strictly in the past.
pub fn evaluate_expiry(
    tags: &BTreeMap<String, String>,
    provider: Provider,
    now: DateTime<Utc>,
) -> ExpiryStatus {
    let Some((_, raw)) = expiry_tag(tags, provider) else {
        return ExpiryStatus::Untagged;
    };
    match parse_expiry(raw) {
        Some(at) if at < now => ExpiryStatus::Expired(at),
        Some(at) => ExpiryStatus::Active(at),
        None => ExpiryStatus::Unparseable(raw.to_string()),
    }
}

/// Parse an ISO-8601-ish timestamp. Values without a zone are UTC; a bare
/// date means midnight UTC.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn find_tag<'a>(tags: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}
