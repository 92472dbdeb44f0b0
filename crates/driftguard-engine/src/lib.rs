//! DriftGuard stage engine.
//!
//! Loads a governance policy, routes each applicable stage to its handler
//! and gates the run on stage severity.

pub mod engine;
pub mod handler;
pub mod policy;
pub mod report;

pub use engine::{error_trace, StageEngine, StageState};
pub use handler::{
    DispatchStageHandler, DriftStageHandler, HandlerKind, HandlerRegistry,
    InfrastructureStageHandler, ReaperStageHandler, StageHandler, StageHandlerError,
};
pub use policy::{
    resolve_policy_path, resolve_policy_path_in, validate_document, ConfigError, Event, EventClass, FieldError, Policy,
    Severity, Stage, CLOSED_ACTION, DEFAULT_POLICY_FILE,
};
pub use report::{
    RunReport, StageOutcome, StageResult, EXIT_BLOCKED, EXIT_CONFIG, EXIT_OK, EXIT_RUNTIME,
};
