use std::sync::Mutex;
use tracing::info;

/// Receives the output of external tools as it is produced.
pub trait OperationObserver: Send + Sync {
    fn line(&self, program: &str, line: &str);
}

/// Relays every line to the `tracing` subscriber at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl OperationObserver for TracingObserver {
    fn line(&self, program: &str, line: &str) {
        info!(tool = program, ":: {line}");
    }
}

/// Keeps every line in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    lines: Mutex<Vec<String>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }
}

impl OperationObserver for CollectingObserver {
    fn line(&self, _program: &str, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_owned());
        }
    }
}
