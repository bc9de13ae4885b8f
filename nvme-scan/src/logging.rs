//! Logging hook shared by gateways and the collector
//!
//! Every failure goes through one injected `ScanLogger`. The default
//! implementation forwards to `tracing`; tests swap in a recorder.

use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Overridable sink for engine diagnostics
pub trait ScanLogger: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

pub type SharedLogger = Arc<dyn ScanLogger>;

/// Forwards to the `tracing` macros
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ScanLogger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!("{}", message),
            Level::WARN => tracing::warn!("{}", message),
            Level::INFO => tracing::info!("{}", message),
            Level::DEBUG => tracing::debug!("{}", message),
            _ => tracing::trace!("{}", message),
        }
    }
}

/// Default hook used when the caller has no preference
pub fn tracing_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}

/// Install the fmt subscriber for the CLI
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects debug over info.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "nvme_scan=debug" } else { "nvme_scan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // A second init (tests, embedding) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
