//! Documentation drift analysis: model verdict with a deterministic fallback.

pub mod analyzer;
pub mod error;
pub mod fakes;
pub mod heuristic;
pub mod model;
pub mod verdict;

pub use analyzer::{
    build_prompt, truncate_chars, ChangeEvidence, DriftAnalyzer, DEFAULT_MAX_CHARS,
    DEFAULT_OVERRIDE_MARKER,
};
pub use error::AiError;
pub use heuristic::{extract_env_vars, heuristic_verdict};
pub use model::{GeminiModel, VerdictModel, DEFAULT_MODEL};
pub use verdict::{parse_model_verdict, DriftStatus, DriftVerdict, VerdictSource, FALLBACK_TAG};
