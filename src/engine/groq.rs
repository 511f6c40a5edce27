//! Manual-history chat engine for an OpenAI-compatible completions endpoint.
//!
//! This engine bookkeeps the conversation itself: an ordered `role/content`
//! message list with the system prompt at index 0, re-sent in full on every
//! completion request.  Two behaviors follow from that shape:
//!
//! * **Stale-image stripping** — before each request, image payloads are
//!   removed from every user turn except the most recent one.  Without this
//!   a long session grows past the upstream request-size limit and
//!   hard-fails; it is required behavior, not an optimization.
//! * **Reset-on-pivot** — a skill pivot replaces the history with a fresh
//!   system message instead of sending an override turn.  The token budget
//!   of re-sending history makes the in-band override a poor fit here, and
//!   the reset doubles as persona isolation.  The acknowledgement event is
//!   synthesized locally.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::events::{error_stream, event_channel, EventStream, SidecarEvent};
use crate::skills::SkillData;

use super::transport::StreamTransport;
use super::{ChatEngine, HistoryTurn, ModelTier, Role};

// ---------------------------------------------------------------------------
// Wire types (OpenAI chat-completions shape)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum WirePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

impl WireContent {
    /// Concatenated text parts; image parts contribute nothing.
    fn flat_text(&self) -> String {
        match self {
            WireContent::Text(t) => t.clone(),
            WireContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    WirePart::Text { text } => Some(text.as_str()),
                    WirePart::ImageUrl { .. } => None,
                })
                .collect(),
        }
    }
}

/// Extract the delta text from one SSE data payload, if any.
///
/// Payload shape: `{"choices":[{"delta":{"content":"..."}}]}`.  Role-only
/// and finish-reason chunks carry no content and yield `None`.
fn parse_delta(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// GroqEngine
// ---------------------------------------------------------------------------

/// Manual-history engine over an OpenAI-compatible streaming endpoint.
///
/// Single fixed model tier; [`toggle_model`](ChatEngine::toggle_model) is a
/// documented no-op.
pub struct GroqEngine {
    transport: Arc<dyn StreamTransport>,
    model_id: String,
    system_prompt: String,
    messages: Arc<Mutex<Vec<WireMessage>>>,
    initialized: bool,
}

impl GroqEngine {
    pub fn new(transport: Arc<dyn StreamTransport>, model_id: impl Into<String>) -> Self {
        Self {
            transport,
            model_id: model_id.into(),
            system_prompt: String::new(),
            messages: Arc::new(Mutex::new(Vec::new())),
            initialized: false,
        }
    }

    fn ensure_init(&mut self) {
        if !self.initialized {
            let prompt = self.system_prompt.clone();
            self.init_session(&prompt);
        }
    }

    /// Remove image parts from every user turn except the most recent one.
    fn strip_stale_images(messages: &mut [WireMessage]) {
        let last_user = messages.iter().rposition(|m| m.role == "user");
        let Some(last_user) = last_user else { return };

        for msg in messages[..last_user].iter_mut().filter(|m| m.role == "user") {
            if let WireContent::Parts(parts) = &mut msg.content {
                parts.retain(|p| matches!(p, WirePart::Text { .. }));
            }
        }
    }

    /// Spawn one completion over the current history and stream its events.
    fn spawn_completion(&self) -> EventStream {
        let payload = {
            let mut messages = self.messages.lock().unwrap();
            Self::strip_stale_images(&mut messages);
            serde_json::json!({
                "model": self.model_id,
                "messages": *messages,
                "stream": true,
                "max_completion_tokens": 1024,
            })
        };

        let transport = Arc::clone(&self.transport);
        let history = Arc::clone(&self.messages);
        let (tx, rx) = event_channel();

        tokio::spawn(async move {
            let mut lines = match transport.stream_lines(payload).await {
                Ok(lines) => lines,
                Err(e) => {
                    let _ = tx.send(SidecarEvent::error(format!("Groq error: {e}"))).await;
                    return;
                }
            };

            let mut full_response = String::new();

            while let Some(line) = lines.recv().await {
                match line {
                    Ok(data) if data == "[DONE]" => break,
                    Ok(data) => {
                        if let Some(delta) = parse_delta(&data) {
                            if delta.is_empty() {
                                continue;
                            }
                            full_response.push_str(&delta);
                            if tx.send(SidecarEvent::text(delta)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(SidecarEvent::error(format!("Groq error: {e}"))).await;
                        return;
                    }
                }
            }

            // History gains the assistant turn before FINISH is observable,
            // so a consumer that saw FINISH can rely on the appended turn.
            history.lock().unwrap().push(WireMessage {
                role: "assistant",
                content: WireContent::Text(full_response),
            });
            let _ = tx.send(SidecarEvent::finish()).await;
        });

        rx
    }
}

impl ChatEngine for GroqEngine {
    fn init_session(&mut self, system_prompt: &str) {
        self.system_prompt = system_prompt.to_string();
        *self.messages.lock().unwrap() = vec![WireMessage {
            role: "system",
            content: WireContent::Text(system_prompt.to_string()),
        }];
        self.initialized = true;
    }

    fn add_user_message(&mut self, content: &str) {
        self.ensure_init();
        self.messages.lock().unwrap().push(WireMessage {
            role: "user",
            content: WireContent::Text(format!("[CONVERSATION TURN]: {content}")),
        });
    }

    fn stream_analysis(&mut self, image: Option<Vec<u8>>, additional_text: &str) -> EventStream {
        self.ensure_init();

        let text = additional_text.trim();
        if image.is_none() && text.is_empty() {
            return error_stream("Analysis requested with no visual or textual input.");
        }

        let content = match image {
            Some(png_bytes) => {
                use base64::Engine as _;
                let encoded = base64::engine::general_purpose::STANDARD.encode(png_bytes);
                let mut parts = vec![
                    WirePart::Text {
                        text: "Analyze this view.".into(),
                    },
                    WirePart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/png;base64,{encoded}"),
                        },
                    },
                ];
                if !text.is_empty() {
                    parts.push(WirePart::Text {
                        text: format!("\n[Additional User Input]: {text}"),
                    });
                }
                WireContent::Parts(parts)
            }
            None => WireContent::Text(format!("[CONVERSATION TURN]: {text}")),
        };

        self.messages.lock().unwrap().push(WireMessage {
            role: "user",
            content,
        });

        self.spawn_completion()
    }

    fn stream_pivot(&mut self, skill: &SkillData, assembled_prompt: &str) -> EventStream {
        // Reset-on-pivot: the fresh system message IS the persona change;
        // the acknowledgement is synthesized to keep the UI flow uniform.
        self.init_session(assembled_prompt);

        let persona: String = skill.identity.chars().take(20).collect();
        let (tx, rx) = event_channel();
        let _ = tx.try_send(SidecarEvent::text(format!(
            "Pivot acknowledged. System re-tasked to {persona}..."
        )));
        let _ = tx.try_send(SidecarEvent::finish());
        rx
    }

    fn stream_completion(&mut self) -> Option<EventStream> {
        self.ensure_init();
        Some(self.spawn_completion())
    }

    fn model_name(&self) -> String {
        let short = self.model_id.rsplit('/').next().unwrap_or(&self.model_id);
        format!("GROQ ({short})")
    }

    fn toggle_model(&mut self) -> ModelTier {
        // Single fixed tier; nothing to flip and no session reset needed.
        log::info!("groq: model tier is fixed; toggle ignored");
        ModelTier::Fast
    }

    fn history_snapshot(&self) -> Vec<HistoryTurn> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| HistoryTurn {
                role: match m.role {
                    "system" => Role::System,
                    "user" => Role::User,
                    _ => Role::Assistant,
                },
                text: m.content.flat_text(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::transport::{Script, ScriptedTransport};
    use crate::events::SidecarEventKind;

    fn delta_line(text: &str) -> String {
        serde_json::json!({"choices": [{"delta": {"content": text}}]}).to_string()
    }

    fn engine_with(script: Script) -> (GroqEngine, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let engine = GroqEngine::new(
            Arc::clone(&transport) as Arc<dyn StreamTransport>,
            "meta-llama/llama-4-maverick-17b-128e-instruct",
        );
        (engine, transport)
    }

    async fn drain(mut stream: EventStream) -> Vec<SidecarEvent> {
        let mut events = Vec::new();
        while let Some(ev) = stream.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn empty_input_yields_exactly_one_error() {
        let (mut engine, transport) = engine_with(Script::Lines(vec![]));
        engine.init_session("You are terse.");

        let events = drain(engine.stream_analysis(None, "")).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SidecarEventKind::Error);
        // The turn aborted before any network call.
        assert!(transport.sent_payloads().is_empty());
    }

    #[tokio::test]
    async fn successful_analysis_streams_chunks_then_finish_and_persists_history() {
        let (mut engine, _) = engine_with(Script::Lines(vec![
            delta_line("Hello"),
            delta_line(" world"),
            "[DONE]".into(),
        ]));
        engine.init_session("You are terse.");

        let events = drain(engine.stream_analysis(Some(b"png".to_vec()), "what is this?")).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].content.as_deref(), Some("Hello"));
        assert_eq!(events[1].content.as_deref(), Some(" world"));
        assert_eq!(events[2].kind, SidecarEventKind::Finish);

        let history = engine.history_snapshot();
        // system + user + assistant
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].text, "Hello world");
    }

    #[tokio::test]
    async fn connect_failure_becomes_single_error_event() {
        let (mut engine, _) = engine_with(Script::ConnectFail(500));
        engine.init_session("p");

        let events = drain(engine.stream_analysis(Some(b"png".to_vec()), "")).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SidecarEventKind::Error);

        // No assistant turn was persisted for the failed turn.
        assert!(engine
            .history_snapshot()
            .iter()
            .all(|t| t.role != Role::Assistant));
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_error_and_no_finish() {
        let (mut engine, _) =
            engine_with(Script::MidStreamFail(vec![delta_line("partial")]));
        engine.init_session("p");

        let events = drain(engine.stream_analysis(Some(b"png".to_vec()), "")).await;
        assert_eq!(events.last().unwrap().kind, SidecarEventKind::Error);
        assert_eq!(
            events
                .iter()
                .filter(|e| e.kind == SidecarEventKind::Finish)
                .count(),
            0
        );
        // Exactly one terminal event.
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn images_are_stripped_from_all_but_the_newest_user_turn() {
        let (mut engine, transport) = engine_with(Script::Lines(vec![
            delta_line("ok"),
            "[DONE]".into(),
        ]));
        engine.init_session("p");

        drain(engine.stream_analysis(Some(b"first".to_vec()), "")).await;
        drain(engine.stream_analysis(Some(b"second".to_vec()), "")).await;

        let payloads = transport.sent_payloads();
        assert_eq!(payloads.len(), 2);

        let messages = payloads[1]["messages"].as_array().unwrap();
        let user_turns: Vec<&serde_json::Value> = messages
            .iter()
            .filter(|m| m["role"] == "user")
            .collect();
        assert_eq!(user_turns.len(), 2);

        let has_image = |turn: &serde_json::Value| {
            turn["content"]
                .as_array()
                .map(|parts| parts.iter().any(|p| p["type"] == "image_url"))
                .unwrap_or(false)
        };
        assert!(!has_image(user_turns[0]), "stale image must be stripped");
        assert!(has_image(user_turns[1]), "newest image must survive");
    }

    #[tokio::test]
    async fn additional_text_rides_after_the_primary_instruction() {
        let (mut engine, transport) = engine_with(Script::Lines(vec!["[DONE]".into()]));
        engine.init_session("p");

        drain(engine.stream_analysis(Some(b"png".to_vec()), "focus on the error")).await;

        let payload = &transport.sent_payloads()[0];
        let parts = payload["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "Analyze this view.");
        assert_eq!(parts[1]["type"], "image_url");
        assert!(parts[2]["text"]
            .as_str()
            .unwrap()
            .contains("focus on the error"));
    }

    #[tokio::test]
    async fn pivot_resets_history_and_synthesizes_acknowledgement() {
        let (mut engine, _) = engine_with(Script::Lines(vec![
            delta_line("answer"),
            "[DONE]".into(),
        ]));
        engine.init_session("old prompt");
        drain(engine.stream_analysis(Some(b"png".to_vec()), "")).await;
        assert!(engine.history_snapshot().len() > 1);

        let skill = SkillData {
            identity: "A meticulous code reviewer persona".into(),
            ..Default::default()
        };
        let events = drain(engine.stream_pivot(&skill, "new prompt")).await;

        assert_eq!(events.len(), 2);
        assert!(events[0]
            .content
            .as_deref()
            .unwrap()
            .starts_with("Pivot acknowledged."));
        assert_eq!(events[1].kind, SidecarEventKind::Finish);

        let history = engine.history_snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].text, "new prompt");
    }

    #[tokio::test]
    async fn add_user_message_tags_turn_and_completion_sends_it() {
        let (mut engine, transport) = engine_with(Script::Lines(vec![
            delta_line("noted"),
            "[DONE]".into(),
        ]));
        engine.init_session("p");

        engine.add_user_message("it should be O(n)");
        let stream = engine.stream_completion().expect("manual-history exposes a trigger");
        drain(stream).await;

        let payload = &transport.sent_payloads()[0];
        let content = payload["messages"][1]["content"].as_str().unwrap();
        assert!(content.starts_with("[CONVERSATION TURN]:"));
        assert!(content.contains("it should be O(n)"));
    }

    #[tokio::test]
    async fn lazy_self_init_seeds_system_turn() {
        let (mut engine, transport) = engine_with(Script::Lines(vec!["[DONE]".into()]));
        // No explicit init_session.
        drain(engine.stream_analysis(Some(b"png".to_vec()), "")).await;

        let payload = &transport.sent_payloads()[0];
        assert_eq!(payload["messages"][0]["role"], "system");
    }

    #[test]
    fn toggle_model_is_a_noop_on_the_fixed_tier() {
        let (mut engine, _) = engine_with(Script::Lines(vec![]));
        assert_eq!(engine.toggle_model(), ModelTier::Fast);
        assert_eq!(engine.toggle_model(), ModelTier::Fast);
    }

    #[test]
    fn model_name_shows_short_model_id() {
        let (engine, _) = engine_with(Script::Lines(vec![]));
        assert_eq!(
            engine.model_name(),
            "GROQ (llama-4-maverick-17b-128e-instruct)"
        );
    }

    #[test]
    fn parse_delta_ignores_contentless_chunks() {
        assert_eq!(parse_delta(&delta_line("hi")).as_deref(), Some("hi"));
        assert!(parse_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).is_none());
        assert!(parse_delta("not json").is_none());
    }
}
