//! Microphone capture.
//!
//! [`AudioSource`] is the boundary the recording orchestrator talks to:
//! `start()` opens the microphone, `stop()` closes it and returns everything
//! captured in between as an encoded WAV buffer.  `stop()` without a prior
//! `start()` (or with nothing captured) returns an empty buffer — never an
//! error.
//!
//! [`CpalAudioSource`] is the production implementation; see
//! [`sensor`] for the dedicated-thread design.

pub mod sensor;

pub use sensor::{encode_wav, CpalAudioSource};

use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the microphone.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to open audio stream: {0}")]
    Stream(String),

    #[error("audio capture worker is gone: {0}")]
    Worker(String),
}

// ---------------------------------------------------------------------------
// AudioSource
// ---------------------------------------------------------------------------

/// Start/stop microphone capture producing one WAV buffer per cycle.
pub trait AudioSource: Send {
    /// Open the microphone and begin accumulating samples.
    ///
    /// Calling `start` while already recording is a no-op.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Close the microphone and return the captured audio as encoded WAV
    /// bytes.  Empty when nothing was captured or `start` was never called.
    fn stop(&mut self) -> Vec<u8>;

    /// Whether a capture cycle is currently open.
    fn is_recording(&self) -> bool;
}

// ---------------------------------------------------------------------------
// MockAudioSource  (test-only)
// ---------------------------------------------------------------------------

/// Test double that plays back a configured buffer and counts calls.
#[cfg(test)]
pub struct MockAudioSource {
    buffer: Vec<u8>,
    fail_start: bool,
    recording: bool,
    pub starts: usize,
    pub stops: usize,
}

#[cfg(test)]
impl MockAudioSource {
    pub fn with_buffer(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            fail_start: false,
            recording: false,
            starts: 0,
            stops: 0,
        }
    }

    pub fn failing() -> Self {
        Self {
            buffer: Vec::new(),
            fail_start: true,
            recording: false,
            starts: 0,
            stops: 0,
        }
    }
}

#[cfg(test)]
impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.fail_start {
            return Err(AudioError::NoDevice);
        }
        self.starts += 1;
        self.recording = true;
        Ok(())
    }

    fn stop(&mut self) -> Vec<u8> {
        if !self.recording {
            return Vec::new();
        }
        self.stops += 1;
        self.recording = false;
        self.buffer.clone()
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}
