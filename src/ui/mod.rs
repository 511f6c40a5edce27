//! Presentation channel.
//!
//! The dispatch layer never prints: it republishes engine events as
//! [`UiMessage`]s over an mpsc channel, and a single renderer task owns the
//! terminal.  Because the renderer's own output goes straight to stdout and
//! never back through any capture path, the re-entrancy hazard of routing
//! presentation output through the event pipeline cannot occur.

pub mod renderer;

pub use renderer::StreamRenderer;

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

/// Which kind of turn a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vector {
    /// Screen-capture driven turn.
    Pixel,
    /// Voice-transcription driven turn.
    Talk,
    /// Skill pivots and other system-initiated turns.
    System,
}

// ---------------------------------------------------------------------------
// UiMessage
// ---------------------------------------------------------------------------

/// One message from the worker context to the presentation context.
#[derive(Debug, Clone, PartialEq)]
pub enum UiMessage {
    /// A new turn begins; resets the renderer's per-turn state.
    TurnStart { vector: Vector },
    /// Incremental model output.
    Chunk { text: String, is_thought: bool },
    /// A progress/status line (display only).
    Status(String),
    /// A non-fatal notice (capture failures, turn errors).
    Notice(String),
    /// The recorder opened (`true`) or closed (`false`) the microphone.
    Recording(bool),
}
