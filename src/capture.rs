//! Frame source boundary.
//!
//! Screen grabbing is platform plumbing that lives outside the
//! orchestration core; the core only needs "encoded image bytes on demand,
//! or `None` on failure".  Whatever backend is wired in at bootstrap
//! implements [`FrameSource`]; when none is available the
//! [`NullFrameSource`] keeps pixel turns failing cleanly instead of
//! crashing the dispatcher.

use std::sync::atomic::{AtomicU32, Ordering};

// ---------------------------------------------------------------------------
// FrameSource
// ---------------------------------------------------------------------------

/// Produce an encoded still image of the configured capture region.
///
/// The core imposes no format contract beyond "opaque bytes passed through
/// to the chat engine as an image payload".
pub trait FrameSource: Send + Sync {
    /// Grab one frame, or `None` when the capture target is invalid or the
    /// backend failed.
    fn capture(&self) -> Option<Vec<u8>>;

    /// Identifier of the configured capture target (monitor index), used
    /// for session snapshot validation.
    fn monitor_index(&self) -> u32;

    /// Point the source at a different monitor.
    fn set_monitor(&self, index: u32);
}

// ---------------------------------------------------------------------------
// NullFrameSource
// ---------------------------------------------------------------------------

/// A frame source with no backend: every capture fails.
///
/// Used when the build/platform provides no screen-capture integration, so
/// a pixel trigger reports "capture failed" instead of taking the process
/// down.
pub struct NullFrameSource {
    monitor_index: AtomicU32,
}

impl NullFrameSource {
    pub fn new(monitor_index: u32) -> Self {
        Self {
            monitor_index: AtomicU32::new(monitor_index),
        }
    }
}

impl FrameSource for NullFrameSource {
    fn capture(&self) -> Option<Vec<u8>> {
        log::warn!("capture: no frame backend configured");
        None
    }

    fn monitor_index(&self) -> u32 {
        self.monitor_index.load(Ordering::Relaxed)
    }

    fn set_monitor(&self, index: u32) {
        self.monitor_index.store(index, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// MockFrameSource  (test-only)
// ---------------------------------------------------------------------------

/// Test double returning a configured frame.
#[cfg(test)]
pub struct MockFrameSource {
    frame: Option<Vec<u8>>,
    monitor_index: AtomicU32,
}

#[cfg(test)]
impl MockFrameSource {
    pub fn with_frame(frame: Vec<u8>) -> Self {
        Self {
            frame: Some(frame),
            monitor_index: AtomicU32::new(1),
        }
    }

    pub fn failing() -> Self {
        Self {
            frame: None,
            monitor_index: AtomicU32::new(1),
        }
    }
}

#[cfg(test)]
impl FrameSource for MockFrameSource {
    fn capture(&self) -> Option<Vec<u8>> {
        self.frame.clone()
    }

    fn monitor_index(&self) -> u32 {
        self.monitor_index.load(Ordering::Relaxed)
    }

    fn set_monitor(&self, index: u32) {
        self.monitor_index.store(index, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_source_always_fails() {
        let source = NullFrameSource::new(1);
        assert!(source.capture().is_none());
    }

    #[test]
    fn monitor_index_is_mutable() {
        let source = NullFrameSource::new(1);
        assert_eq!(source.monitor_index(), 1);
        source.set_monitor(2);
        assert_eq!(source.monitor_index(), 2);
    }
}
