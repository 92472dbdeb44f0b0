//! Policy document model and loader.
//!
//! A policy is YAML with two ordered stage lists: `stages` for active
//! pull-request events and `cleanup` for the `closed` action. Loading is
//! two-phase. The raw document is walked first and every schema violation is
//! collected; only a clean document is deserialised into [`Policy`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, error};

pub const DEFAULT_POLICY_FILE: &str = "policy.yaml";

/// The action that routes a run to the `cleanup` section.
pub const CLOSED_ACTION: &str = "closed";

const TOP_LEVEL_KEYS: &[&str] = &["version", "description", "stages", "cleanup"];
const STAGE_KEYS: &[&str] = &["name", "type", "enabled", "severity", "trigger_on", "config"];
const SECTIONS: &[&str] = &["stages", "cleanup"];

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field_path: String,
    pub message: String,
}

impl FieldError {
    fn new(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_path, self.message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("policy file not found: {} (also tried {})", .path.display(), .tried.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotFound { path: PathBuf, tried: Vec<PathBuf> },

    #[error("cannot read policy {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("policy is not valid YAML: {0}")]
    Syntax(#[from] serde_yaml::Error),

    #[error("policy failed validation ({} error(s)): {}", .0.len(), .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Invalid(Vec<FieldError>),
}

impl ConfigError {
    /// Field errors when validation failed, empty otherwise.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            ConfigError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Warning,
    Block,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Block => "block",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which policy section an event runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventClass {
    Active,
    Closed,
}

impl EventClass {
    pub fn from_action(action: &str) -> Self {
        if action == CLOSED_ACTION {
            EventClass::Closed
        } else {
            EventClass::Active
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventClass::Active => "active",
            EventClass::Closed => "closed",
        }
    }
}

/// The firing event: its class selects the section, its action is matched
/// verbatim against `trigger_on`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub class: EventClass,
    pub action: String,
}

impl Event {
    /// Class derived from the action (`closed` → cleanup).
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            name: name.into(),
            class: EventClass::from_action(&action),
            action,
        }
    }

    pub fn with_class(name: impl Into<String>, class: EventClass, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class,
            action: action.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    pub name: String,
    #[serde(rename = "type")]
    pub stage_type: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    pub trigger_on: Vec<String>,
    /// Handler-specific; validated by the handler when it runs.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
}

impl Stage {
    pub fn triggers_on(&self, action: &str) -> bool {
        self.trigger_on.iter().any(|t| t == action)
    }

    pub fn config_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.config.clone().into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub stages: Vec<Stage>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub cleanup: Vec<Stage>,
}

impl Policy {
    /// Parse and validate policy text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml::from_str(text)?;
        let errors = validate_document(&document);
        if !errors.is_empty() {
            for err in &errors {
                error!(event = "policy.invalid", field = %err.field_path, message = %err.message, "policy validation error");
            }
            return Err(ConfigError::Invalid(errors));
        }
        serde_yaml::from_value(document).map_err(|e| {
            let err = FieldError::new("$", e.to_string());
            error!(event = "policy.invalid", field = %err.field_path, message = %err.message, "policy validation error");
            ConfigError::Invalid(vec![err])
        })
    }

    /// Read, parse and validate the policy at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_policy_path(path.as_ref())?;
        debug!(path = %resolved.display(), "loading policy");
        let text = std::fs::read_to_string(&resolved).map_err(|source| ConfigError::Io {
            path: resolved.clone(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn section(&self, class: EventClass) -> &[Stage] {
        match class {
            EventClass::Active => &self.stages,
            EventClass::Closed => &self.cleanup,
        }
    }
}

/// `path` as given, else relative to the working directory, else next to
/// the executable.
pub fn resolve_policy_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let cwd = std::env::current_dir().ok();
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_policy_path_in(path, cwd.as_deref(), exe_dir.as_deref())
}

/// [`resolve_policy_path`] with explicit search directories.
pub fn resolve_policy_path_in(
    path: &Path,
    cwd: Option<&Path>,
    exe_dir: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    let mut tried = Vec::new();
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if path.is_relative() {
        for dir in [cwd, exe_dir].into_iter().flatten() {
            let candidate = dir.join(path);
            if candidate.is_file() {
                debug!(path = %candidate.display(), "policy found by fallback lookup");
                return Ok(candidate);
            }
            tried.push(candidate);
        }
    }
    Err(ConfigError::NotFound {
        path: path.to_path_buf(),
        tried,
    })
}

/// Collect every schema violation in a raw policy document.
pub fn validate_document(document: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();

    let root = match document {
        Value::Mapping(map) => map,
        Value::Null => {
            errors.push(FieldError::new("$", "policy document is empty"));
            return errors;
        }
        _ => {
            errors.push(FieldError::new("$", "policy document must be a mapping"));
            return errors;
        }
    };

    for (key, value) in root {
        let Some(key) = key.as_str() else {
            errors.push(FieldError::new("$", "top-level keys must be strings"));
            continue;
        };
        match key {
            "version" => {
                if !matches!(value, Value::String(_) | Value::Number(_) | Value::Null) {
                    errors.push(FieldError::new("version", "must be a string or number"));
                }
            }
            "description" => {
                if !matches!(value, Value::String(_) | Value::Null) {
                    errors.push(FieldError::new("description", "must be a string"));
                }
            }
            section if SECTIONS.contains(&section) => validate_section(section, value, &mut errors),
            other => errors.push(FieldError::new(
                other,
                format!("unknown key (expected one of: {})", TOP_LEVEL_KEYS.join(", ")),
            )),
        }
    }
    errors
}

fn validate_section(section: &str, value: &Value, errors: &mut Vec<FieldError>) {
    let stages = match value {
        Value::Sequence(items) => items,
        Value::Null => return,
        _ => {
            errors.push(FieldError::new(section, "must be a list of stages"));
            return;
        }
    };

    let mut seen = BTreeSet::new();
    for (idx, stage) in stages.iter().enumerate() {
        let path = format!("{}[{}]", section, idx);
        let Value::Mapping(fields) = stage else {
            errors.push(FieldError::new(path, "stage must be a mapping"));
            continue;
        };

        for key in fields.keys() {
            match key.as_str() {
                Some(k) if STAGE_KEYS.contains(&k) => {}
                Some(k) => errors.push(FieldError::new(
                    format!("{}.{}", path, k),
                    "unknown stage field",
                )),
                None => errors.push(FieldError::new(&path, "stage keys must be strings")),
            }
        }

        match fields.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => {
                if !seen.insert(name.clone()) {
                    errors.push(FieldError::new(
                        format!("{}.name", path),
                        format!("duplicate stage name '{}' in {}", name, section),
                    ));
                }
            }
            Some(Value::String(_)) => {
                errors.push(FieldError::new(format!("{}.name", path), "must not be empty"))
            }
            Some(_) => errors.push(FieldError::new(format!("{}.name", path), "must be a string")),
            None => errors.push(FieldError::new(format!("{}.name", path), "field is required")),
        }

        match fields.get("type") {
            Some(Value::String(t)) if !t.trim().is_empty() => {}
            Some(_) => errors.push(FieldError::new(
                format!("{}.type", path),
                "must be a non-empty string",
            )),
            None => errors.push(FieldError::new(format!("{}.type", path), "field is required")),
        }

        if let Some(v) = fields.get("enabled") {
            if !v.is_bool() {
                errors.push(FieldError::new(format!("{}.enabled", path), "must be true or false"));
            }
        }

        if let Some(v) = fields.get("severity") {
            if !matches!(v.as_str(), Some("warning") | Some("block")) {
                errors.push(FieldError::new(
                    format!("{}.severity", path),
                    "must be 'warning' or 'block'",
                ));
            }
        }

        match fields.get("trigger_on") {
            Some(Value::Sequence(triggers)) if triggers.is_empty() => errors.push(FieldError::new(
                format!("{}.trigger_on", path),
                "must list at least one action",
            )),
            Some(Value::Sequence(triggers)) => {
                for (t_idx, trigger) in triggers.iter().enumerate() {
                    if !trigger.is_string() {
                        errors.push(FieldError::new(
                            format!("{}.trigger_on[{}]", path, t_idx),
                            "must be a string",
                        ));
                    }
                }
            }
            Some(_) => errors.push(FieldError::new(
                format!("{}.trigger_on", path),
                "must be a list of actions",
            )),
            None => errors.push(FieldError::new(
                format!("{}.trigger_on", path),
                "field is required",
            )),
        }

        match fields.get("config") {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(config)) => {
                if config.keys().any(|k| !k.is_string()) {
                    errors.push(FieldError::new(
                        format!("{}.config", path),
                        "keys must be strings",
                    ));
                }
            }
            Some(_) => errors.push(FieldError::new(format!("{}.config", path), "must be a mapping")),
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
