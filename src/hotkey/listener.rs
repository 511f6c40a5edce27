//! Dedicated OS-thread hotkey listener using `rdev::listen`.
//!
//! `rdev::listen` is a blocking call that must live on its own OS thread.
//! [`HotkeyListener`] owns that thread and a stop flag; dropping it sets
//! the flag so the callback silently ignores further events.
//!
//! # Shutdown caveat
//!
//! `rdev::listen` has **no graceful shutdown API**.  Setting the stop flag
//! prevents events from being forwarded, but the OS thread itself remains
//! blocked in the rdev event loop until the process exits.  This is safe —
//! rdev holds no resources that need explicit cleanup.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use crate::dispatch::Trigger;

// ---------------------------------------------------------------------------
// HotkeyListener
// ---------------------------------------------------------------------------

/// Handle to a running hotkey listener thread.
///
/// Construct one with [`HotkeyListener::start`].  Drop it to stop
/// forwarding triggers.
pub struct HotkeyListener {
    /// Shared stop flag — set `true` on [`Drop`].
    stop: Arc<AtomicBool>,
    /// Kept so the thread is not detached prematurely; never joined
    /// because `rdev::listen` never returns.
    _thread: std::thread::JoinHandle<()>,
}

impl HotkeyListener {
    /// Spawn the listener thread with a `(key, trigger)` binding table.
    ///
    /// Only key **presses** fire; releases are ignored (the talk trigger is
    /// a toggle, not push-to-talk).  The thread forwards triggers with
    /// `blocking_send`, which is correct from a non-async context.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to create the thread (extremely unlikely).
    pub fn start(bindings: Vec<(rdev::Key, Trigger)>, tx: mpsc::Sender<Trigger>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                let result = rdev::listen(move |event| {
                    if stop_clone.load(Ordering::Relaxed) {
                        return;
                    }

                    if let rdev::EventType::KeyPress(key) = event.event_type {
                        if let Some((_, trigger)) =
                            bindings.iter().find(|(bound, _)| *bound == key)
                        {
                            log::debug!("hotkey: {trigger:?}");
                            let _ = tx.blocking_send(*trigger);
                        }
                    }
                });

                if let Err(e) = result {
                    log::error!("hotkey-listener: rdev::listen exited with error: {e:?}");
                }
            })
            .expect("failed to spawn hotkey-listener thread");

        Self {
            stop,
            _thread: thread,
        }
    }
}

impl Drop for HotkeyListener {
    /// Set the stop flag so the rdev callback stops forwarding triggers.
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
