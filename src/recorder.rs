//! The recording cycle state machine.
//!
//! [`RecordingOrchestrator`] ties an [`AudioSource`] and a
//! [`TranscriptionEngine`] into a single [`toggle`](RecordingOrchestrator::toggle)
//! entry point:
//!
//! ```text
//! Idle ──toggle()──▶ Recording          (audio source started)
//! Recording ──toggle()──▶ Processing ──▶ Idle + Option<transcript>
//! ```
//!
//! `Processing` exists for telemetry of the synchronous transcription step
//! only — by the time `toggle()` returns, the machine is back in `Idle`, so
//! callers never observe it between calls.  Having one entry point (held
//! behind an async mutex by the dispatcher) is what makes out-of-turn
//! toggles structurally impossible rather than reactively handled.

use std::sync::Arc;

use crate::audio::AudioSource;
use crate::transcription::TranscriptionEngine;

// ---------------------------------------------------------------------------
// RecordingState
// ---------------------------------------------------------------------------

/// States of the recording cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// Waiting for a talk trigger.
    #[default]
    Idle,
    /// Microphone is open; audio is accumulating.
    Recording,
    /// Transient: the captured buffer is being transcribed.
    Processing,
}

impl RecordingState {
    /// A short human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            RecordingState::Idle => "IDLE",
            RecordingState::Recording => "RECORDING",
            RecordingState::Processing => "PROCESSING",
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingOrchestrator
// ---------------------------------------------------------------------------

/// Coordinates one microphone and one transcription engine.
pub struct RecordingOrchestrator {
    source: Box<dyn AudioSource>,
    stt: Arc<dyn TranscriptionEngine>,
    state: RecordingState,
}

impl RecordingOrchestrator {
    pub fn new(source: Box<dyn AudioSource>, stt: Arc<dyn TranscriptionEngine>) -> Self {
        Self {
            source,
            stt,
            state: RecordingState::Idle,
        }
    }

    /// Advance the cycle.  Returns the new externally-visible state plus
    /// the transcript when a cycle just finished.
    ///
    /// * `(Recording, None)` — recording has begun; no text yet.
    /// * `(Idle, Some(text))` — a turn is ready to submit.
    /// * `(Idle, None)` — nothing captured, no speech recognized, or the
    ///   microphone failed to open.
    pub async fn toggle(&mut self) -> (RecordingState, Option<String>) {
        match self.state {
            RecordingState::Idle => {
                if let Err(e) = self.source.start() {
                    log::error!("recorder: could not open microphone: {e}");
                    return (RecordingState::Idle, None);
                }
                self.state = RecordingState::Recording;
                (self.state, None)
            }
            RecordingState::Recording => {
                self.state = RecordingState::Processing;
                let buffer = self.source.stop();

                let text = if buffer.is_empty() {
                    log::warn!("recorder: empty capture buffer");
                    None
                } else {
                    self.stt.transcribe(&buffer).await
                };

                self.state = RecordingState::Idle;
                (self.state, text)
            }
            // Unreachable through the public surface: toggle() always
            // leaves Processing before returning.
            RecordingState::Processing => (self.state, None),
        }
    }

    /// Abort an open recording without transcribing (shutdown path).
    pub fn abort(&mut self) {
        if self.state == RecordingState::Recording {
            let _ = self.source.stop();
            self.state = RecordingState::Idle;
            log::info!("recorder: active capture aborted");
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == RecordingState::Idle
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
