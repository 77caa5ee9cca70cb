//! Logging and observability
//!
//! Structured logging via tracing-subscriber with either text or JSON
//! formatting, controlled at runtime through CLI flags and environment
//! variables. All log output goes to stderr so stdout stays reserved for
//! the converted Dockerfile.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// `format` selects `"text"` (default) or `"json"` output; the
/// `REFIT_LOG_FORMAT` environment variable is consulted when the argument
/// is `None`. `level` seeds the filter when neither `REFIT_LOG` nor
/// `RUST_LOG` is set. Safe to call multiple times; subsequent calls are
/// no-ops.
pub fn init(format: Option<&str>, level: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(level);

        let env_format = std::env::var("REFIT_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Create an EnvFilter from `REFIT_LOG`, the given level, or `RUST_LOG`.
fn create_env_filter(level: Option<&str>) -> EnvFilter {
    if let Ok(refit_log) = std::env::var("REFIT_LOG") {
        EnvFilter::try_new(&refit_log).unwrap_or_else(|_| EnvFilter::new("info"))
    } else if let Some(level) = level {
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Check if logging has been initialized.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
