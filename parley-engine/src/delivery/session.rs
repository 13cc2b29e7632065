//! Per-turn delivery state.

use tokio::time::{Duration, Instant};

use crate::traits::SessionHandle;

/// Ephemeral state of one in-flight delivery. Never persisted.
#[derive(Debug)]
pub(crate) struct DeliverySession {
    /// Remote message being edited
    pub handle: SessionHandle,
    /// Everything received so far, in arrival order
    pub buffer: String,
    /// Number of non-empty fragments received
    pub sequence: u64,
    /// When the last progress flush was attempted
    pub last_flush: Option<Instant>,
    /// Text of the last successful flush (for no-op suppression)
    pub last_visible: Option<String>,
    /// Successful transport updates
    pub flushes: usize,
}

impl DeliverySession {
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            buffer: String::new(),
            sequence: 0,
            last_flush: None,
            last_visible: None,
            flushes: 0,
        }
    }

    pub fn push(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
        self.sequence += 1;
    }

    /// The first fragment is always due; later ones once the interval has passed.
    pub fn flush_due(&self, interval: Duration) -> bool {
        self.last_flush
            .map_or(true, |last| last.elapsed() >= interval)
    }

    /// Whether `visible` would repeat the last flush.
    pub fn is_unchanged(&self, visible: &str) -> bool {
        self.last_visible.as_deref() == Some(visible)
    }

    pub fn mark_flushed(&mut self, visible: String) {
        self.flushes += 1;
        self.last_visible = Some(visible);
    }
}
