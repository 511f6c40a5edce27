//! The sidecar event protocol.
//!
//! Every chat engine reports streaming progress through the same closed set
//! of [`SidecarEvent`]s, regardless of how its upstream API is shaped.  A
//! logical turn is a finite sequence of events delivered in emission order
//! over a [`tokio::sync::mpsc`] channel:
//!
//! ```text
//! TextChunk* (Status | TextChunk)* (Finish | Error)
//! ```
//!
//! Producers must not emit anything after the terminal event.  Consumers
//! must tolerate a stream that ends with **no** terminal event at all (the
//! producing task died before yielding anything) and treat that as an
//! implicit failure — see [`dispatch`](crate::dispatch).

use std::collections::HashMap;

use tokio::sync::mpsc;

/// Channel capacity for one streamed turn.  Producers block (briefly) when
/// the consumer falls this far behind, which keeps memory bounded without
/// affecting ordering.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// SidecarEventKind
// ---------------------------------------------------------------------------

/// The closed set of event kinds an engine may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarEventKind {
    /// Incremental model output.  May carry the `is_thought` metadata flag
    /// for chain-of-thought segments that the renderer displays separately.
    TextChunk,
    /// Human-readable progress text.  Display-only; no semantic meaning.
    Status,
    /// Terminal for this turn: the turn failed.  Carries a message.
    Error,
    /// Terminal for this turn: the turn completed successfully.
    Finish,
}

// ---------------------------------------------------------------------------
// SidecarEvent
// ---------------------------------------------------------------------------

/// One immutable event in a streamed turn.
///
/// `metadata` carries auxiliary rendering hints only (currently just
/// `is_thought`); control flow must never depend on it.
#[derive(Debug, Clone)]
pub struct SidecarEvent {
    pub kind: SidecarEventKind,
    pub content: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SidecarEvent {
    /// An incremental answer-text chunk.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: SidecarEventKind::TextChunk,
            content: Some(content.into()),
            metadata: HashMap::new(),
        }
    }

    /// An incremental chain-of-thought chunk (`is_thought: true`).
    pub fn thought(content: impl Into<String>) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("is_thought".to_string(), serde_json::Value::Bool(true));
        Self {
            kind: SidecarEventKind::TextChunk,
            content: Some(content.into()),
            metadata,
        }
    }

    /// A display-only progress message.
    pub fn status(content: impl Into<String>) -> Self {
        Self {
            kind: SidecarEventKind::Status,
            content: Some(content.into()),
            metadata: HashMap::new(),
        }
    }

    /// The terminal failure event for a turn.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: SidecarEventKind::Error,
            content: Some(message.into()),
            metadata: HashMap::new(),
        }
    }

    /// The terminal success event for a turn.
    pub fn finish() -> Self {
        Self {
            kind: SidecarEventKind::Finish,
            content: None,
            metadata: HashMap::new(),
        }
    }

    /// `true` for [`Error`](SidecarEventKind::Error) and
    /// [`Finish`](SidecarEventKind::Finish).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            SidecarEventKind::Error | SidecarEventKind::Finish
        )
    }

    /// Whether this chunk is flagged as chain-of-thought output.
    pub fn is_thought(&self) -> bool {
        self.metadata
            .get("is_thought")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// The consumer end of one streamed turn.
///
/// Engines hand the sender to a spawned task and return the receiver
/// immediately, so the caller starts draining events while the network
/// round-trip is still in flight.
pub type EventStream = mpsc::Receiver<SidecarEvent>;

/// Create a channel pair sized for one turn.
pub fn event_channel() -> (mpsc::Sender<SidecarEvent>, EventStream) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// A pre-terminated stream holding exactly one [`Error`] event.
///
/// Used for invalid-input turns that must fail before any network call.
///
/// [`Error`]: SidecarEventKind::Error
pub fn error_stream(message: impl Into<String>) -> EventStream {
    let (tx, rx) = event_channel();
    // Capacity is non-zero, so try_send cannot fail here.
    let _ = tx.try_send(SidecarEvent::error(message));
    rx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_chunk_is_not_terminal() {
        assert!(!SidecarEvent::text("hi").is_terminal());
        assert!(!SidecarEvent::status("working").is_terminal());
    }

    #[test]
    fn error_and_finish_are_terminal() {
        assert!(SidecarEvent::error("boom").is_terminal());
        assert!(SidecarEvent::finish().is_terminal());
    }

    #[test]
    fn thought_flag_round_trips_through_metadata() {
        let ev = SidecarEvent::thought("hmm");
        assert_eq!(ev.kind, SidecarEventKind::TextChunk);
        assert!(ev.is_thought());

        let plain = SidecarEvent::text("answer");
        assert!(!plain.is_thought());
    }

    #[tokio::test]
    async fn error_stream_yields_exactly_one_error() {
        let mut stream = error_stream("no input");

        let first = stream.recv().await.expect("one event");
        assert_eq!(first.kind, SidecarEventKind::Error);
        assert_eq!(first.content.as_deref(), Some("no input"));

        // Sender was dropped after the single event.
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (tx, mut rx) = event_channel();
        tx.send(SidecarEvent::text("a")).await.unwrap();
        tx.send(SidecarEvent::text("b")).await.unwrap();
        tx.send(SidecarEvent::finish()).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().content.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.unwrap().content.as_deref(), Some("b"));
        assert_eq!(rx.recv().await.unwrap().kind, SidecarEventKind::Finish);
        assert!(rx.recv().await.is_none());
    }
}
