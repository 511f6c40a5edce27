//! Session-native chat engine for a Gemini-style streaming endpoint.
//!
//! The engine owns an opaque [`ChatSession`]: callers never see or touch
//! the accumulated contents, and [`add_user_message`] is a documented no-op
//! because the session transport appends-and-responds in one round-trip — a
//! standalone append would either be lost or double-counted by the next
//! streaming call.
//!
//! Skill pivots are **in-band**: the remote session abstraction does not
//! support swapping the system instruction of an open session, so the
//! change is phrased as an explicit `[SYSTEM OVERRIDE]` turn carrying the
//! new identity/instructions/context and a request for acknowledgement.
//! History survives the pivot.
//!
//! Two model tiers (flash/pro) with a configurable reasoning depth;
//! toggling reinitializes the session so the new tier takes effect on the
//! current prompt.
//!
//! [`add_user_message`]: ChatEngine::add_user_message

use std::sync::{Arc, Mutex};

use crate::events::{error_stream, event_channel, EventStream, SidecarEvent};
use crate::skills::SkillData;

use super::transport::StreamTransport;
use super::{ChatEngine, HistoryTurn, ModelTier, Role};

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

/// Opaque session state: the wire-shaped contents accumulated so far.
///
/// Entries are `{"role": "user"|"model", "parts": [...]}` values exactly as
/// they go over the wire, so a request payload is history + the new turn.
#[derive(Debug, Default)]
struct ChatSession {
    contents: Vec<serde_json::Value>,
}

/// Parts of one streamed chunk: `(text, is_thought)` pairs in order.
///
/// Payload shape: `{"candidates":[{"content":{"parts":[{"text": "...",
/// "thought": true?}]}}]}`.
fn parse_parts(data: &str) -> Vec<(String, bool)> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        return Vec::new();
    };
    let Some(parts) = value["candidates"][0]["content"]["parts"].as_array() else {
        return Vec::new();
    };

    parts
        .iter()
        .filter_map(|p| {
            let text = p["text"].as_str()?;
            let thought = p["thought"].as_bool().unwrap_or(false);
            Some((text.to_string(), thought))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// GeminiEngine
// ---------------------------------------------------------------------------

/// Session-native engine over a Gemini-style streaming endpoint.
pub struct GeminiEngine {
    /// Transport bound to the fast-tier model endpoint.
    flash: Arc<dyn StreamTransport>,
    /// Transport bound to the deep-tier model endpoint.
    pro: Arc<dyn StreamTransport>,
    thinking_level: String,
    use_deep: bool,
    system_prompt: String,
    session: Arc<Mutex<ChatSession>>,
    initialized: bool,
}

impl GeminiEngine {
    pub fn new(
        flash: Arc<dyn StreamTransport>,
        pro: Arc<dyn StreamTransport>,
        thinking_level: impl Into<String>,
    ) -> Self {
        Self {
            flash,
            pro,
            thinking_level: thinking_level.into(),
            use_deep: false,
            system_prompt: String::new(),
            session: Arc::new(Mutex::new(ChatSession::default())),
            initialized: false,
        }
    }

    fn ensure_init(&mut self) {
        if !self.initialized {
            let prompt = self.system_prompt.clone();
            self.init_session(&prompt);
        }
    }

    fn active_transport(&self) -> Arc<dyn StreamTransport> {
        if self.use_deep {
            Arc::clone(&self.pro)
        } else {
            Arc::clone(&self.flash)
        }
    }

    /// Send one user turn through the session and stream its events.
    ///
    /// On success the user turn and the model's answer text (thought parts
    /// excluded) are appended to the session before FINISH is emitted.
    fn spawn_turn(&self, user_parts: Vec<serde_json::Value>) -> EventStream {
        let user_content = serde_json::json!({"role": "user", "parts": user_parts});

        let payload = {
            let session = self.session.lock().unwrap();
            let mut contents = session.contents.clone();
            contents.push(user_content.clone());
            serde_json::json!({
                "systemInstruction": {"parts": [{"text": self.system_prompt}]},
                "contents": contents,
                "generationConfig": {
                    "temperature": 1.0,
                    "thinkingConfig": {
                        "includeThoughts": true,
                        "thinkingLevel": self.thinking_level,
                    },
                },
            })
        };

        let transport = self.active_transport();
        let session = Arc::clone(&self.session);
        let (tx, rx) = event_channel();

        tokio::spawn(async move {
            let mut lines = match transport.stream_lines(payload).await {
                Ok(lines) => lines,
                Err(e) => {
                    let _ = tx
                        .send(SidecarEvent::error(format!("Gemini error: {e}")))
                        .await;
                    return;
                }
            };

            let mut answer = String::new();

            while let Some(line) = lines.recv().await {
                match line {
                    Ok(data) => {
                        for (text, is_thought) in parse_parts(&data) {
                            let event = if is_thought {
                                SidecarEvent::thought(text)
                            } else {
                                answer.push_str(&text);
                                SidecarEvent::text(text)
                            };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(SidecarEvent::error(format!("Gemini error: {e}")))
                            .await;
                        return;
                    }
                }
            }

            // Persist the exchange: thought segments are ephemeral and are
            // not part of session history.
            {
                let mut session = session.lock().unwrap();
                session.contents.push(user_content);
                session.contents.push(serde_json::json!({
                    "role": "model",
                    "parts": [{"text": answer}],
                }));
            }
            let _ = tx.send(SidecarEvent::finish()).await;
        });

        rx
    }
}

impl ChatEngine for GeminiEngine {
    fn init_session(&mut self, system_prompt: &str) {
        self.system_prompt = system_prompt.to_string();
        *self.session.lock().unwrap() = ChatSession::default();
        self.initialized = true;
    }

    fn add_user_message(&mut self, _content: &str) {
        // No-op by design: the session transport appends the user turn and
        // the response in one round-trip, so a standalone append here would
        // double-count it on the next streaming call.
        log::debug!("gemini: add_user_message ignored (session-managed history)");
    }

    fn stream_analysis(&mut self, image: Option<Vec<u8>>, additional_text: &str) -> EventStream {
        self.ensure_init();

        let text = additional_text.trim();
        if image.is_none() && text.is_empty() {
            return error_stream("Analysis requested with no visual or textual input.");
        }

        let parts = match image {
            Some(png_bytes) => {
                use base64::Engine as _;
                let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes);
                let mut parts = vec![
                    serde_json::json!({"text": "Analyze this view."}),
                    serde_json::json!({
                        "inlineData": {"mimeType": "image/png", "data": encoded}
                    }),
                ];
                if !text.is_empty() {
                    parts.push(serde_json::json!({
                        "text": format!("\n[Additional User Input]: {text}")
                    }));
                }
                parts
            }
            None => vec![serde_json::json!({
                "text": format!("[CONVERSATION TURN]: {text}")
            })],
        };

        self.spawn_turn(parts)
    }

    fn stream_pivot(&mut self, skill: &SkillData, assembled_prompt: &str) -> EventStream {
        self.ensure_init();
        self.system_prompt = assembled_prompt.to_string();

        let override_msg = format!(
            "[SYSTEM OVERRIDE]: Re-tasking sequence initiated.\n\
             # NEW IDENTITY\n{}\n\
             # NEW OPERATIONAL INSTRUCTIONS\n{}\n\
             # NEW SESSION DATA (CONTEXT)\n{}\n\
             Please acknowledge you have absorbed these new instructions.",
            skill.identity, skill.instructions, skill.context
        );

        self.spawn_turn(vec![serde_json::json!({"text": override_msg})])
    }

    fn stream_completion(&mut self) -> Option<EventStream> {
        // The session cannot be asked to respond without a new message.
        None
    }

    fn model_name(&self) -> String {
        if self.use_deep {
            format!("GEMINI PRO ({})", self.thinking_level)
        } else {
            "GEMINI FLASH".to_string()
        }
    }

    fn toggle_model(&mut self) -> ModelTier {
        self.use_deep = !self.use_deep;
        // Reseed the session so the new tier takes effect on the current
        // prompt.  History does not carry across tiers.
        let prompt = self.system_prompt.clone();
        self.init_session(&prompt);
        if self.use_deep {
            ModelTier::Deep
        } else {
            ModelTier::Fast
        }
    }

    fn history_snapshot(&self) -> Vec<HistoryTurn> {
        self.session
            .lock()
            .unwrap()
            .contents
            .iter()
            .map(|content| {
                let role = if content["role"] == "model" {
                    Role::Assistant
                } else {
                    Role::User
                };
                let text = content["parts"]
                    .as_array()
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|p| p["text"].as_str())
                            .collect::<String>()
                    })
                    .unwrap_or_default();
                HistoryTurn { role, text }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
