//! Structured lifecycle events for a governance run.
//!
//! Every record carries an `event` field so log pipelines can filter on it
//! without parsing messages.

use tracing::{error, info, warn};

/// Span that tags every record emitted during a run with its `run_id`.
///
/// ```ignore
/// engine_future.instrument(obs::run_span("4f1c...")).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("driftguard.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, event_class: &str, action: &str, stage_count: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        event_class = %event_class,
        action = %action,
        stage_count = stage_count,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, halted_by: Option<&str>) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        halted = halted_by.is_some(),
        halted_by = halted_by.unwrap_or(""),
    );
}

pub fn emit_stage_transition(stage: &str, state: &str, reason: &str) {
    info!(event = "stage.transition", stage = %stage, state = %state, reason = %reason);
}

/// A failed stage; `trace` is the full error chain.
pub fn emit_stage_failed(stage: &str, blocking: bool, error: &str, trace: &str) {
    error!(
        event = "stage.failed",
        stage = %stage,
        blocking = blocking,
        error = %error,
        trace = %trace,
    );
}

pub fn emit_resource_deleted(provider: &str, resource: &str) {
    info!(event = "reaper.deleted", provider = %provider, resource = %resource);
}

pub fn emit_resource_planned(provider: &str, resource: &str) {
    info!(event = "reaper.planned", provider = %provider, resource = %resource, dry_run = true);
}

pub fn emit_resource_skipped(provider: &str, resource: &str, reason: &str) {
    info!(event = "reaper.skipped", provider = %provider, resource = %resource, reason = %reason);
}

pub fn emit_resource_failed(provider: &str, resource: &str, error: &dyn std::fmt::Display) {
    warn!(event = "reaper.failed", provider = %provider, resource = %resource, error = %error);
}

pub fn emit_drift_verdict(status: &str, source: &str, reason: &str) {
    info!(event = "drift.verdict", status = %status, source = %source, reason = %reason);
}

pub fn emit_dispatch_sent(target: &str, source_repo: &str) {
    info!(event = "dispatch.sent", target = %target, source_repo = %source_repo);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = run_span("test-run-id").entered();
        emit_stage_transition("reaper", "running", "trigger matched");
    }
}
