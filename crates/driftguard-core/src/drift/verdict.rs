//! Verdict types and the strict parser for model output.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::drift::error::AiError;

/// Prefix every heuristic reason carries.
pub const FALLBACK_TAG: &str = "[fallback]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriftStatus {
    Pass,
    Fail,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Pass => "PASS",
            DriftStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Ai,
    Fallback,
    Override,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::Ai => "ai",
            VerdictSource::Fallback => "fallback",
            VerdictSource::Override => "override",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftVerdict {
    pub status: DriftStatus,
    pub reason: String,
    pub suggested_edit: String,
    pub source: VerdictSource,
}

impl DriftVerdict {
    pub fn is_fail(&self) -> bool {
        self.status == DriftStatus::Fail
    }

    /// Markdown comment posted on the pull request for a failing verdict.
    pub fn to_comment(&self) -> String {
        let mut body = format!(
            "## DriftGuard Documentation Report\n\n**Status:** {}\n\n**Reason:** {}\n",
            self.status, self.reason
        );
        if !self.suggested_edit.trim().is_empty() {
            body.push_str(&format!(
                "\n**Suggested Edit:**\n```markdown\n{}\n```\n",
                self.suggested_edit
            ));
        }
        body.push_str(&format!("\n_Verdict source: {}_\n", self.source.as_str()));
        body
    }
}

/// Exactly the three fields the prompt asks for.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelVerdict {
    status: DriftStatus,
    reason: String,
    suggested_doc_edit: String,
}

/// Parse model text into a verdict. Markdown code fences around the JSON
/// are tolerated; anything else that is not the exact record is an error.
pub fn parse_model_verdict(text: &str) -> Result<DriftVerdict, AiError> {
    let body = strip_fences(text.trim());
    let parsed: ModelVerdict =
        serde_json::from_str(body).map_err(|e| AiError::Parse(e.to_string()))?;
    Ok(DriftVerdict {
        status: parsed.status,
        reason: parsed.reason,
        suggested_edit: parsed.suggested_doc_edit,
        source: VerdictSource::Ai,
    })
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
