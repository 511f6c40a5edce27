//! Chat engine abstraction.
//!
//! [`ChatEngine`] is the seam between the orchestration core and one
//! upstream chat backend.  Two concrete engines exist:
//!
//! * [`GeminiEngine`] — "session-native": history lives inside an opaque
//!   chat session; skill pivots are in-band override turns that preserve it.
//! * [`GroqEngine`] — "manual-history": the engine bookkeeps an explicit
//!   ordered role/content history and resets it on pivot.
//!
//! Both emit the same [`SidecarEvent`](crate::events::SidecarEvent) protocol
//! from their streaming calls, so the dispatch layer never branches on the
//! active backend.  Where an operation is meaningless for a backend the
//! method is an explicit documented no-op rather than an absent method.

pub mod gemini;
pub mod groq;
pub mod transport;

pub use gemini::GeminiEngine;
pub use groq::GroqEngine;
pub use transport::{Auth, SseTransport, StreamTransport, TransportError};

use crate::events::EventStream;
use crate::skills::SkillData;

// ---------------------------------------------------------------------------
// ModelTier
// ---------------------------------------------------------------------------

/// The two predefined model tiers an engine may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Low-latency tier — the default.
    Fast,
    /// High-reasoning tier.
    Deep,
}

// ---------------------------------------------------------------------------
// HistoryTurn
// ---------------------------------------------------------------------------

/// Role of one persisted conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A flattened view of one persisted turn, for telemetry and tests.
///
/// The engine-internal representation stays engine-specific (opaque session
/// contents vs explicit message list); this is only a read-only projection.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

// ---------------------------------------------------------------------------
// ChatEngine
// ---------------------------------------------------------------------------

/// One upstream chat backend with engine-owned conversation state.
///
/// # Streaming contract
///
/// `stream_analysis`, `stream_pivot` and `stream_completion` return a
/// finite, non-restartable [`EventStream`] for exactly one model turn.  The
/// stream ends with at most one terminal event (ERROR or FINISH); transport
/// failures are converted to a terminal ERROR inside the engine and never
/// propagate as panics or `Err` returns.  Turn-level input validation (no
/// image, no text) also yields a single ERROR without touching the network.
pub trait ChatEngine: Send {
    /// (Re)create the session/history seeded with `system_prompt`.
    ///
    /// Idempotent and safe to call repeatedly.  Streaming calls lazily
    /// self-init when this was never called.
    fn init_session(&mut self, system_prompt: &str);

    /// Append a user turn to history without requesting a response.
    ///
    /// Engines whose history round-trips with the next streaming call
    /// implement this as a documented no-op.
    fn add_user_message(&mut self, content: &str);

    /// One model turn over an optional image and optional text.
    ///
    /// With both present the text rides behind the primary "analyze this
    /// view" instruction (most specific intent last).  On success the final
    /// assembled response text is appended to engine-owned history before
    /// FINISH is emitted.
    fn stream_analysis(&mut self, image: Option<Vec<u8>>, additional_text: &str) -> EventStream;

    /// One model turn acknowledging a persona/system-prompt change.
    ///
    /// Engines with an open session inject the change as an in-band
    /// override turn; engines that reset history on pivot treat the reset
    /// itself as the acknowledgement.
    fn stream_pivot(&mut self, skill: &SkillData, assembled_prompt: &str) -> EventStream;

    /// Trigger a completion over the existing history without adding input.
    ///
    /// Returns `None` for engines that cannot request a response without a
    /// new message (their caller falls back to
    /// [`stream_analysis`](Self::stream_analysis) with no image).
    fn stream_completion(&mut self) -> Option<EventStream>;

    /// Display string: engine + active tier + reasoning depth if any.
    fn model_name(&self) -> String;

    /// Flip between the fast and deep tiers and reinitialize the session so
    /// the new tier takes effect on the current prompt.
    ///
    /// Single-tier engines implement this as a documented no-op returning
    /// the unchanged tier.
    fn toggle_model(&mut self) -> ModelTier;

    /// Read-only projection of the persisted history, for tests/telemetry.
    fn history_snapshot(&self) -> Vec<HistoryTurn>;
}

// Compile-time assertion: Box<dyn ChatEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ChatEngine>) {}
};
