//! Global hotkey listening, backed by `rdev`.
//!
//! # Design
//!
//! `rdev::listen()` is a blocking OS-level call that never returns while the
//! process is alive.  It must run on a **dedicated OS thread** — it cannot
//! be used inside a tokio task.
//!
//! [`HotkeyListener::start`] spawns that thread with a key→trigger binding
//! table and forwards matching key presses as [`Trigger`]s over a
//! `tokio::sync::mpsc` channel.  Dropping the handle sets a stop flag so
//! the callback silently discards further events (rdev has no graceful
//! shutdown API; the blocked thread costs nothing once flagged).
//!
//! Key names come from config strings via [`parse_key`]; each trigger binds
//! to a single key — rdev reports keys individually, so modifier chords are
//! not part of this listener's contract.

pub mod listener;

pub use listener::HotkeyListener;

use crate::config::HotkeyConfig;
use crate::dispatch::Trigger;

// ---------------------------------------------------------------------------
// parse_key
// ---------------------------------------------------------------------------

/// Parse a hotkey name from a config string into an [`rdev::Key`].
///
/// Supports F1–F12 and single ASCII letters (case-insensitive).  Returns
/// `None` for unrecognised names so callers can fall back to a default.
///
/// # Examples
///
/// ```
/// use sidecar::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("p"),  Some(rdev::Key::KeyP));
/// assert_eq!(parse_key("Ctrl+P"), None);
/// ```
pub fn parse_key(key_str: &str) -> Option<rdev::Key> {
    use rdev::Key::*;

    let function_key = match key_str {
        "F1" => Some(F1),
        "F2" => Some(F2),
        "F3" => Some(F3),
        "F4" => Some(F4),
        "F5" => Some(F5),
        "F6" => Some(F6),
        "F7" => Some(F7),
        "F8" => Some(F8),
        "F9" => Some(F9),
        "F10" => Some(F10),
        "F11" => Some(F11),
        "F12" => Some(F12),
        _ => None,
    };
    if function_key.is_some() {
        return function_key;
    }

    let mut chars = key_str.chars();
    let (Some(letter), None) = (chars.next(), chars.next()) else {
        return None;
    };
    match letter.to_ascii_uppercase() {
        'A' => Some(KeyA),
        'B' => Some(KeyB),
        'C' => Some(KeyC),
        'D' => Some(KeyD),
        'E' => Some(KeyE),
        'F' => Some(KeyF),
        'G' => Some(KeyG),
        'H' => Some(KeyH),
        'I' => Some(KeyI),
        'J' => Some(KeyJ),
        'K' => Some(KeyK),
        'L' => Some(KeyL),
        'M' => Some(KeyM),
        'N' => Some(KeyN),
        'O' => Some(KeyO),
        'P' => Some(KeyP),
        'Q' => Some(KeyQ),
        'R' => Some(KeyR),
        'S' => Some(KeyS),
        'T' => Some(KeyT),
        'U' => Some(KeyU),
        'V' => Some(KeyV),
        'W' => Some(KeyW),
        'X' => Some(KeyX),
        'Y' => Some(KeyY),
        'Z' => Some(KeyZ),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Resolve the configured key names into a `(key, trigger)` binding table.
///
/// Unparseable names are skipped with a warning rather than failing the
/// whole bootstrap — losing one hotkey beats losing the app.
pub fn bindings_from_config(config: &HotkeyConfig) -> Vec<(rdev::Key, Trigger)> {
    let wanted = [
        (&config.pixel_key, Trigger::Pixel),
        (&config.talk_key, Trigger::Talk),
        (&config.model_key, Trigger::ToggleModel),
        (&config.engine_key, Trigger::SwitchEngine),
        (&config.skill_key, Trigger::SkillSwap),
    ];

    let mut bindings = Vec::with_capacity(wanted.len());
    for (name, trigger) in wanted {
        match parse_key(name) {
            Some(key) => bindings.push((key, trigger)),
            None => log::warn!("hotkey: unknown key name {name:?} for {trigger:?}, skipping"),
        }
    }
    bindings
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_function_keys() {
        assert_eq!(parse_key("F8"), Some(rdev::Key::F8));
        assert_eq!(parse_key("F1"), Some(rdev::Key::F1));
        assert_eq!(parse_key("F12"), Some(rdev::Key::F12));
    }

    #[test]
    fn parse_letter_keys_case_insensitive() {
        assert_eq!(parse_key("P"), Some(rdev::Key::KeyP));
        assert_eq!(parse_key("p"), Some(rdev::Key::KeyP));
        assert_eq!(parse_key("z"), Some(rdev::Key::KeyZ));
    }

    #[test]
    fn parse_unknown_key_returns_none() {
        assert_eq!(parse_key("xyz"), None);
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("Ctrl+V"), None);
        assert_eq!(parse_key("F13"), None);
    }

    #[test]
    fn default_config_binds_all_five_triggers() {
        let bindings = bindings_from_config(&HotkeyConfig::default());
        assert_eq!(bindings.len(), 5);
        assert!(bindings.contains(&(rdev::Key::F8, Trigger::Pixel)));
        assert!(bindings.contains(&(rdev::Key::F9, Trigger::Talk)));
        assert!(bindings.contains(&(rdev::Key::F12, Trigger::SkillSwap)));
    }

    #[test]
    fn bad_key_names_are_skipped_not_fatal() {
        let mut config = HotkeyConfig::default();
        config.model_key = "NoSuchKey".into();
        let bindings = bindings_from_config(&config);
        assert_eq!(bindings.len(), 4);
        assert!(!bindings.iter().any(|(_, t)| *t == Trigger::ToggleModel));
    }
}
