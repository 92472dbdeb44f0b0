//! Tracing initialisation for DriftGuard binaries.
//!
//! Library code only emits through `tracing`; the binary owns the subscriber
//! and calls [`init_tracing`] once at start-up. Logs go to stderr so the
//! run summary on stdout stays machine-readable.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter override checked before `RUST_LOG`.
pub const LOG_ENV: &str = "DRIFTGUARD_LOG";

/// DriftGuard crates log at `level`; dependencies (HTTP stack, runtime)
/// only surface warnings.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!(
        "warn,driftguard={l},driftguard_core={l},driftguard_engine={l}",
        l = level
    )
}

fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Initialise the global tracing subscriber.
///
/// * `json` - one JSON object per record, lifecycle fields flattened to the
///   top level and the enclosing `run_id` span attached.
/// * `level` - verbosity for DriftGuard's own crates when neither
///   `DRIFTGUARD_LOG` nor `RUST_LOG` is set.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = build_filter(level);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_driftguard_crates() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("driftguard_core=debug"));
        assert!(directives.contains("driftguard_engine=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
