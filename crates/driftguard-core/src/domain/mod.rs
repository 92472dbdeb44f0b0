//! Domain model shared by every stage handler.

pub mod context;
pub mod error;

pub use context::{Context, ContextBuilder, Mode, DEFAULT_CLOUD_REGION, DEFAULT_GITHUB_API_URL};
pub use error::ContextError;
