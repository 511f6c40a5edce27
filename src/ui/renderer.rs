//! Terminal stream renderer.
//!
//! Formats the [`UiMessage`] stream for a plain terminal: turn banners,
//! `[THINKING]` / `[RESPONSE]` transitions for thought-flagged chunks, and
//! status/notice lines.  Formatting is a pure function of the message
//! sequence ([`StreamRenderer::format`]) so it is testable without
//! capturing stdout; [`StreamRenderer::run`] is the thin task that prints.

use std::io::Write;

use tokio::sync::mpsc;

use super::{UiMessage, Vector};

// ---------------------------------------------------------------------------
// StreamRenderer
// ---------------------------------------------------------------------------

/// Stateful formatter for one presentation stream.
#[derive(Debug, Default)]
pub struct StreamRenderer {
    /// Inside a thought block.
    thinking: bool,
    /// No chunk rendered yet for the current turn.
    first_bite: bool,
}

impl StreamRenderer {
    pub fn new() -> Self {
        Self {
            thinking: false,
            first_bite: true,
        }
    }

    /// Format one message.  Returns the exact text to print (possibly
    /// empty).
    pub fn format(&mut self, msg: &UiMessage) -> String {
        match msg {
            UiMessage::TurnStart { vector } => {
                self.thinking = false;
                self.first_bite = true;
                match vector {
                    Vector::Pixel => "\n==[ VECTOR P: VISUAL CAPTURE ]==\n".to_string(),
                    Vector::Talk => "\n==[ VECTOR T: VERBAL TURN ]==\n".to_string(),
                    Vector::System => "\n[SYSTEM]: ".to_string(),
                }
            }

            UiMessage::Chunk { text, is_thought } => {
                let mut out = String::new();
                if self.first_bite {
                    out.push_str("> ");
                    self.first_bite = false;
                }
                if *is_thought {
                    if !self.thinking {
                        out.push_str("\n[THINKING]: ");
                        self.thinking = true;
                    }
                } else if self.thinking {
                    out.push_str("\n\n[RESPONSE]: ");
                    self.thinking = false;
                }
                out.push_str(text);
                out
            }

            UiMessage::Status(status) => format!("\n[i] {status}"),

            UiMessage::Notice(notice) => format!("\n[!] {notice}\n"),

            UiMessage::Recording(true) => {
                "\n[*] RECORDING... (press the talk key to stop)\n".to_string()
            }
            UiMessage::Recording(false) => String::new(),
        }
    }

    /// Consume the presentation channel until it closes, printing to
    /// stdout.
    pub async fn run(mut self, mut rx: mpsc::Receiver<UiMessage>) {
        let mut stdout = std::io::stdout();
        while let Some(msg) = rx.recv().await {
            let out = self.format(&msg);
            if !out.is_empty() {
                let _ = stdout.write_all(out.as_bytes());
                let _ = stdout.flush();
            }
        }
        log::info!("renderer: presentation channel closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn render_all(messages: &[UiMessage]) -> String {
        let mut renderer = StreamRenderer::new();
        messages.iter().map(|m| renderer.format(m)).collect()
    }

    #[test]
    fn plain_chunks_concatenate_after_prompt_marker() {
        let out = render_all(&[
            UiMessage::TurnStart {
                vector: Vector::Pixel,
            },
            UiMessage::Chunk {
                text: "Hello".into(),
                is_thought: false,
            },
            UiMessage::Chunk {
                text: " world".into(),
                is_thought: false,
            },
        ]);
        assert!(out.contains("VECTOR P"));
        assert!(out.contains("> Hello world"));
    }

    #[test]
    fn thought_to_response_transition_is_labeled() {
        let out = render_all(&[
            UiMessage::TurnStart {
                vector: Vector::Talk,
            },
            UiMessage::Chunk {
                text: "weighing".into(),
                is_thought: true,
            },
            UiMessage::Chunk {
                text: " options".into(),
                is_thought: true,
            },
            UiMessage::Chunk {
                text: "Answer.".into(),
                is_thought: false,
            },
        ]);

        // One THINKING label for the whole block, then one RESPONSE label.
        assert_eq!(out.matches("[THINKING]:").count(), 1);
        assert_eq!(out.matches("[RESPONSE]:").count(), 1);
        assert!(out.find("[THINKING]:").unwrap() < out.find("[RESPONSE]:").unwrap());
        assert!(out.contains("weighing options"));
    }

    #[test]
    fn turn_start_resets_thought_state() {
        let mut renderer = StreamRenderer::new();
        renderer.format(&UiMessage::TurnStart {
            vector: Vector::Pixel,
        });
        renderer.format(&UiMessage::Chunk {
            text: "t".into(),
            is_thought: true,
        });

        // New turn: a plain chunk must not emit a RESPONSE transition.
        renderer.format(&UiMessage::TurnStart {
            vector: Vector::Talk,
        });
        let out = renderer.format(&UiMessage::Chunk {
            text: "fresh".into(),
            is_thought: false,
        });
        assert!(!out.contains("[RESPONSE]"));
        assert!(out.contains("fresh"));
    }

    #[test]
    fn status_and_notice_lines_are_prefixed() {
        let out = render_all(&[
            UiMessage::Status("READY".into()),
            UiMessage::Notice("Capture failed.".into()),
        ]);
        assert!(out.contains("[i] READY"));
        assert!(out.contains("[!] Capture failed."));
    }

    #[test]
    fn recording_stop_renders_nothing() {
        let out = render_all(&[UiMessage::Recording(false)]);
        assert!(out.is_empty());
    }
}
