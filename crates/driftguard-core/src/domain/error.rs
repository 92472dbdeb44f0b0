//! Domain-level error taxonomy shared across DriftGuard components.

/// Errors produced while building or reading the run [`Context`](super::Context).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("required context value not set: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}
