//! Run results.

use serde::{Deserialize, Serialize};

use crate::policy::{Event, Severity};

pub const EXIT_OK: i32 = 0;
pub const EXIT_BLOCKED: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
/// The runner itself failed (bad environment, unwritable report).
pub const EXIT_RUNTIME: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOutcome {
    Skipped,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,
    pub outcome: StageOutcome,
    /// Handler detail on success, skip reason, or the top-level error.
    pub detail: String,
    pub severity: Severity,
    /// Full error chain, outermost first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
    pub duration_ms: u64,
}

impl StageResult {
    pub fn is_blocking_failure(&self) -> bool {
        self.outcome == StageOutcome::Failed && self.severity == Severity::Block
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub event: Event,
    pub results: Vec<StageResult>,
    /// Name of the block-severity stage that stopped the run.
    pub halted_by: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn result(&self, stage_name: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage_name == stage_name)
    }

    pub fn count(&self, outcome: StageOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn exit_code(&self) -> i32 {
        if self.halted_by.is_some() || self.results.iter().any(StageResult::is_blocking_failure) {
            EXIT_BLOCKED
        } else {
            EXIT_OK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: StageOutcome, severity: Severity) -> StageResult {
        StageResult {
            stage_name: "s".to_string(),
            outcome,
            detail: String::new(),
            severity,
            error_trace: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_exit_code_only_blocks_on_block_failures() {
        let mut report = RunReport {
            run_id: "r".to_string(),
            event: Event::new("pull_request", "opened"),
            results: vec![result(StageOutcome::Failed, Severity::Warning)],
            halted_by: None,
            duration_ms: 0,
        };
        assert_eq!(report.exit_code(), EXIT_OK);

        report.results.push(result(StageOutcome::Failed, Severity::Block));
        assert_eq!(report.exit_code(), EXIT_BLOCKED);
    }

    #[test]
    fn test_outcome_serialises_uppercase() {
        let json = serde_json::to_string(&StageOutcome::Succeeded).unwrap();
        assert_eq!(json, "\"SUCCEEDED\"");
    }
}
