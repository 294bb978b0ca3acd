// # Logging Backbone
//
// Structured, context-propagating logging for the platform core.
//
// Two presentation modes: developer-mode colorized console output and
// production-mode JSON lines. In production two size-rotated file streams are
// added (normal and error-only), 10 MiB per generation, 10 generations.
//
// Request correlation identifiers are carried in a task-local scope; see
// `context::request_context`.

pub mod context;
pub mod rotation;
pub mod timing;

pub use context::{current_request_id, current_user_id, request_context, RequestContext};
pub use rotation::{RotatingFileWriter, RotatingMakeWriter};
pub use timing::{log_execution_time, ExecutionTimer};

use std::path::Path;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Settings;
use crate::error::Result;

/// Rotation threshold for file streams.
pub const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated generations kept per stream.
pub const LOG_ROTATE_GENERATIONS: usize = 10;

/// Install the global subscriber for the configured environment.
///
/// Safe to call more than once; later calls are no-ops (tests).
pub fn init(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.environment.is_development() {
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .try_init();
    } else {
        let log_dir = Path::new(&settings.log_dir);
        let normal = RotatingFileWriter::open(
            log_dir.join(format!("{}.log", settings.service_name)),
            LOG_ROTATE_BYTES,
            LOG_ROTATE_GENERATIONS,
        )?;
        let errors = RotatingFileWriter::open(
            log_dir.join(format!("{}-error.log", settings.service_name)),
            LOG_ROTATE_BYTES,
            LOG_ROTATE_GENERATIONS,
        )?;

        let stdout_layer = fmt::layer().json().with_target(true);
        let file_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(RotatingMakeWriter::new(normal));
        let error_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(RotatingMakeWriter::new(errors))
            .with_filter(LevelFilter::ERROR);

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .with(error_layer)
            .try_init();
    }

    tracing::info!(
        service = %settings.service_name,
        version = %settings.service_version,
        environment = ?settings.environment,
        "logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_init_is_idempotent() {
        let settings = Settings::default();
        init(&settings).unwrap();
        init(&settings).unwrap();
    }
}
