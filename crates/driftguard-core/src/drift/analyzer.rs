//! Documentation-drift analyzer.
//!
//! Three paths, checked in this order:
//!
//! 1. override: a marker in the PR body or comments short-circuits to PASS
//!    and the model is never called;
//! 2. model: one prompt through [`retry_if`], answer parsed strictly;
//! 3. heuristic: any [`AiError`] from the model path lands here.
//!
//! [`DriftAnalyzer::analyze`] therefore always produces a verdict.

use std::sync::Arc;

use tracing::{info, warn};

use crate::drift::error::AiError;
use crate::drift::heuristic::heuristic_verdict;
use crate::drift::model::VerdictModel;
use crate::drift::verdict::{parse_model_verdict, DriftStatus, DriftVerdict, VerdictSource};
use crate::obs;
use crate::retry::{retry_if, RetryPolicy};

pub const DEFAULT_OVERRIDE_MARKER: &str = "/driftguard skip";
pub const DEFAULT_MAX_CHARS: usize = 1000;

/// Everything the analyzer looks at for one change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeEvidence {
    pub diff: String,
    pub reference: String,
    pub body: String,
    pub comments: Vec<String>,
}

pub struct DriftAnalyzer {
    model: Arc<dyn VerdictModel>,
    retry: RetryPolicy,
    max_chars: usize,
    override_marker: String,
}

impl DriftAnalyzer {
    pub fn new(model: Arc<dyn VerdictModel>) -> Self {
        Self {
            model,
            retry: RetryPolicy::ai_call(),
            max_chars: DEFAULT_MAX_CHARS,
            override_marker: DEFAULT_OVERRIDE_MARKER.to_string(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_override_marker(mut self, marker: impl Into<String>) -> Self {
        self.override_marker = marker.into();
        self
    }

    /// Whether the PR body or any comment carries the override marker.
    /// Matching is case-insensitive; an empty marker disables overrides.
    pub fn override_present(&self, body: &str, comments: &[String]) -> bool {
        let marker = self.override_marker.trim().to_lowercase();
        if marker.is_empty() {
            return false;
        }
        std::iter::once(body)
            .chain(comments.iter().map(String::as_str))
            .any(|text| text.to_lowercase().contains(&marker))
    }

    /// Full check of one change, override first.
    pub async fn analyze_change(
        &self,
        evidence: &ChangeEvidence,
        ai_key: Option<&str>,
    ) -> DriftVerdict {
        if self.override_present(&evidence.body, &evidence.comments) {
            let verdict = DriftVerdict {
                status: DriftStatus::Pass,
                reason: format!("skipped: override marker `{}` present", self.override_marker),
                suggested_edit: String::new(),
                source: VerdictSource::Override,
            };
            obs::emit_drift_verdict(verdict.status.as_str(), verdict.source.as_str(), &verdict.reason);
            return verdict;
        }
        self.analyze(&evidence.diff, &evidence.reference, ai_key).await
    }

    /// Model verdict, or the heuristic when the model path fails.
    pub async fn analyze(&self, diff: &str, reference: &str, ai_key: Option<&str>) -> DriftVerdict {
        let verdict = match self.ai_verdict(diff, reference, ai_key).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(error = %err, "model path failed, using heuristic");
                heuristic_verdict(diff, reference, &err.to_string())
            }
        };
        obs::emit_drift_verdict(verdict.status.as_str(), verdict.source.as_str(), &verdict.reason);
        verdict
    }

    /// The primary path on its own.
    pub async fn ai_verdict(
        &self,
        diff: &str,
        reference: &str,
        ai_key: Option<&str>,
    ) -> Result<DriftVerdict, AiError> {
        let key = ai_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(AiError::MissingKey)?;
        let prompt = build_prompt(diff, reference, self.max_chars);

        let text = retry_if(&self.retry, "model.generate", AiError::is_retryable, || {
            self.model.generate(key, &prompt)
        })
        .await?;

        let verdict = parse_model_verdict(&text)?;
        info!(status = %verdict.status, "model verdict received");
        Ok(verdict)
    }
}

/// First `max` characters (not bytes) of `text`.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Evaluation prompt embedding the truncated diff and reference.
pub fn build_prompt(diff: &str, reference: &str, max_chars: usize) -> String {
    format!(
        "You are a senior technical writer reviewing a code change.\n\
         Does the diff change function signatures, API endpoints, or environment variables?\n\
         If so, check whether the README below reflects those changes.\n\n\
         Diff:\n{}\n\n\
         README:\n{}\n\n\
         Answer with only a JSON object of the form \
         {{\"status\": \"PASS\" or \"FAIL\", \"reason\": \"...\", \"suggested_doc_edit\": \"...\"}}.",
        truncate_chars(diff, max_chars),
        truncate_chars(reference, max_chars)
    )
}
