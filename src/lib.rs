//! Sidecar — a global-hotkey screen/voice assistant overlay.
//!
//! The crate is organised around a small orchestration core:
//!
//! * [`events`]  — the [`SidecarEvent`](events::SidecarEvent) protocol every
//!   engine streams through.
//! * [`engine`]  — pluggable chat engines (session-native and
//!   manual-history) behind the [`ChatEngine`](engine::ChatEngine) trait.
//! * [`brain`]   — the engine router: active-engine tracking, runtime
//!   engine switching, skill pivoting.
//! * [`recorder`] — the Idle/Recording/Processing state machine tying the
//!   microphone to the transcription engine.
//! * [`dispatch`] — trigger dispatch and the single-in-flight turn gate.
//!
//! Everything long-latency (chat streaming, speech-to-text) runs inside
//! tokio tasks; global hotkeys are delivered from a dedicated OS thread over
//! an mpsc channel so they stay responsive while a turn streams.

pub mod audio;
pub mod brain;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod hotkey;
pub mod ingest;
pub mod recorder;
pub mod session;
pub mod skills;
pub mod transcription;
pub mod ui;
