use thiserror::Error;

/// The model path failed. Always answered by the heuristic, never surfaced
/// as a stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    #[error("no model API key configured")]
    MissingKey,

    #[error("model request failed: {0}")]
    Request(String),

    #[error("model API returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("model returned no text")]
    EmptyResponse,

    #[error("model output is not a verdict: {0}")]
    Parse(String),
}

impl AiError {
    /// Network trouble, quota and server faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Request(_) | AiError::EmptyResponse => true,
            AiError::Http { status, .. } => *status == 429 || *status >= 500,
            AiError::MissingKey | AiError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Request(err.to_string())
    }
}
