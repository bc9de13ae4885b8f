/*!
Test helpers: recording logger and a ready-made collector harness
*/

use crate::fixture::FixtureHost;
use crate::gateway_stub::ScriptedGateway;
use nvme_scan::logging::{ScanLogger, SharedLogger};
use nvme_scan::Collector;
use std::sync::{Arc, Mutex};
use tracing::Level;

/// Captures every line sent through the logging hook
#[derive(Debug, Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn count(&self, level: Level) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }

    /// Any line at `level` containing `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|(l, line)| *l == level && line.contains(needle))
    }
}

impl ScanLogger for RecordingLogger {
    fn log(&self, level: Level, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

/// Scripted gateway, recording logger and collector wired together
pub struct TestHarness {
    pub gateway: ScriptedGateway,
    pub logger: Arc<RecordingLogger>,
}

impl TestHarness {
    pub fn new(host: &FixtureHost) -> Self {
        nvme_scan::logging::init_tracing(false);
        Self {
            gateway: host.render(),
            logger: RecordingLogger::new(),
        }
    }

    pub fn shared_logger(&self) -> SharedLogger {
        self.logger.clone()
    }

    /// Collector over a clone of the scripted gateway
    pub fn collector(&self) -> Collector<ScriptedGateway> {
        Collector::new(self.gateway.clone(), self.shared_logger())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_logger_filters_by_level() {
        let logger = RecordingLogger::new();
        logger.log(Level::ERROR, "failure executing nvme list-ns /dev/nvme0");
        logger.log(Level::INFO, "controller listing not supported by /dev/nvme0");

        assert_eq!(logger.count(Level::ERROR), 1);
        assert!(logger.contains(Level::INFO, "not supported"));
        assert!(!logger.contains(Level::ERROR, "not supported"));
        assert_eq!(logger.lines().len(), 2);
    }
}
