//! Stage state machine.
//!
//! Stages in the section selected by the event class run strictly in
//! declared order:
//!
//! ```text
//! PENDING -> SKIPPED
//! PENDING -> RUNNING -> SUCCEEDED
//! PENDING -> RUNNING -> FAILED
//! ```
//!
//! A failed `block` stage halts the run before the next stage starts; a
//! failed `warning` stage is recorded and the run continues.

use std::error::Error as StdError;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};
use uuid::Uuid;

use driftguard_core::obs;
use driftguard_core::Context;

use crate::handler::{HandlerKind, HandlerRegistry, StageHandlerError};
use crate::policy::{Event, Policy, Severity, Stage};
use crate::report::{RunReport, StageOutcome, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageState {
    Pending,
    Skipped,
    Running,
    Succeeded,
    Failed,
}

impl StageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageState::Pending => "PENDING",
            StageState::Skipped => "SKIPPED",
            StageState::Running => "RUNNING",
            StageState::Succeeded => "SUCCEEDED",
            StageState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outermost error first, one cause per line.
pub fn error_trace(err: &(dyn StdError + 'static)) -> String {
    let mut lines = vec![err.to_string()];
    let mut current = err.source();
    while let Some(cause) = current {
        lines.push(format!("caused by: {}", cause));
        current = cause.source();
    }
    lines.join("\n")
}

pub struct StageEngine {
    policy: Policy,
    registry: HandlerRegistry,
}

impl StageEngine {
    pub fn new(policy: Policy, registry: HandlerRegistry) -> Self {
        Self { policy, registry }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Run every applicable stage for `event`.
    pub async fn run(&self, ctx: &Context, event: &Event) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_inner(run_id, ctx, event).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, ctx: &Context, event: &Event) -> RunReport {
        let start = Instant::now();
        let stages = self.policy.section(event.class);
        obs::emit_run_started(&run_id, event.class.as_str(), &event.action, stages.len());
        info!(mode = %ctx.mode(), "starting governance run");

        let mut results = Vec::with_capacity(stages.len());
        let mut halted_by = None;

        for stage in stages {
            let result = self.run_stage(ctx, event, stage).await;
            let halt = result.is_blocking_failure();
            results.push(result);
            if halt {
                info!(stage = %stage.name, "block-severity stage failed, halting run");
                halted_by = Some(stage.name.clone());
                break;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_run_finished(&run_id, duration_ms, halted_by.as_deref());
        RunReport {
            run_id,
            event: event.clone(),
            results,
            halted_by,
            duration_ms,
        }
    }

    async fn run_stage(&self, ctx: &Context, event: &Event, stage: &Stage) -> StageResult {
        let start = Instant::now();
        let skipped = |reason: String| {
            obs::emit_stage_transition(&stage.name, StageState::Skipped.as_str(), &reason);
            StageResult {
                stage_name: stage.name.clone(),
                outcome: StageOutcome::Skipped,
                detail: reason,
                severity: stage.severity,
                error_trace: None,
                duration_ms: 0,
            }
        };

        if !stage.enabled {
            return skipped("stage disabled".to_string());
        }
        if !stage.triggers_on(&event.action) {
            return skipped(format!("action '{}' not in trigger_on", event.action));
        }

        obs::emit_stage_transition(&stage.name, StageState::Running.as_str(), "trigger matched");
        let outcome = match HandlerKind::resolve(stage).and_then(|kind| self.registry.get(kind)) {
            Some(handler) => handler.run(ctx, stage).await,
            None => Err(StageHandlerError::UnknownStage {
                name: stage.name.clone(),
                stage_type: stage.stage_type.clone(),
            }),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(detail) => {
                obs::emit_stage_transition(&stage.name, StageState::Succeeded.as_str(), &detail);
                StageResult {
                    stage_name: stage.name.clone(),
                    outcome: StageOutcome::Succeeded,
                    detail,
                    severity: stage.severity,
                    error_trace: None,
                    duration_ms,
                }
            }
            Err(err) => {
                let trace = error_trace(&err);
                obs::emit_stage_failed(
                    &stage.name,
                    stage.severity == Severity::Block,
                    &err.to_string(),
                    &trace,
                );
                StageResult {
                    stage_name: stage.name.clone(),
                    outcome: StageOutcome::Failed,
                    detail: err.to_string(),
                    severity: stage.severity,
                    error_trace: Some(trace),
                    duration_ms,
                }
            }
        }
    }
}
