//! Remote speech-to-text.
//!
//! [`TranscriptionEngine`] converts an encoded audio buffer into text or
//! signals "no speech" with `None`.  The `None` filtering is load-bearing:
//! callers treat it as "no intent, stay idle" and never forward it to a
//! chat engine, so misconfiguration, HTTP failures, and silence markers all
//! collapse to the same quiet outcome instead of an error turn.

use async_trait::async_trait;

/// Markers some STT backends return for pure noise.  Compared
/// case-insensitively after trimming.
const SILENCE_MARKERS: [&str; 5] = [".", "...", "[silence]", "[noise]", "(silence)"];

// ---------------------------------------------------------------------------
// TranscriptionEngine
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface for speech-to-text engines.
///
/// `audio` is an encoded WAV buffer as produced by
/// [`AudioSource::stop`](crate::audio::AudioSource::stop).
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe `audio`; `None` means "no usable speech" for any reason.
    async fn transcribe(&self, audio: &[u8]) -> Option<String>;
}

// ---------------------------------------------------------------------------
// Response filtering (pure)
// ---------------------------------------------------------------------------

/// `true` when `text` is too short to be intent or matches a known
/// silence/noise marker.
pub fn is_silence_marker(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 2 {
        return true;
    }
    let lower = trimmed.to_lowercase();
    SILENCE_MARKERS.contains(&lower.as_str())
}

/// Reduce a raw STT response to usable text.
///
/// Returns `None` for non-success statuses, unparseable bodies, and
/// silence-filtered text.  Factored out of the HTTP path so the filtering
/// contract is testable without a server.
pub fn extract_transcript(status: u16, body: &str) -> Option<String> {
    if !(200..300).contains(&status) {
        log::warn!("stt: endpoint returned HTTP {status}: {body}");
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("stt: unparseable response: {e}");
            return None;
        }
    };

    let text = value["text"].as_str().unwrap_or("").trim().to_string();
    if is_silence_marker(&text) {
        return None;
    }
    Some(text)
}

// ---------------------------------------------------------------------------
// RemoteTranscriber
// ---------------------------------------------------------------------------

/// Production engine for an OpenAI-compatible `audio/transcriptions`
/// endpoint (multipart WAV upload, JSON `{"text": …}` response).
pub struct RemoteTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl RemoteTranscriber {
    /// Build a transcriber for `base_url` (e.g. an OpenAI-compatible `/v1`
    /// root).  `api_key = None` disables the engine: every call returns
    /// `None` without touching the network.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            url: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl TranscriptionEngine for RemoteTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Option<String> {
        let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) else {
            log::warn!("stt: no API key configured; transcription disabled");
            return None;
        };

        let audio_part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .ok()?;

        let form = reqwest::multipart::Form::new()
            .part("file", audio_part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        let response = match self
            .client
            .post(&self.url)
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::warn!("stt: request failed: {e}");
                return None;
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        extract_transcript(status, &body)
    }
}

// ---------------------------------------------------------------------------
// MockTranscriber  (test-only)
// ---------------------------------------------------------------------------

/// Test double returning a pre-configured transcript.
#[cfg(test)]
pub struct MockTranscriber {
    response: Option<String>,
}

#[cfg(test)]
impl MockTranscriber {
    pub fn some(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
        }
    }

    pub fn none() -> Self {
        Self { response: None }
    }
}

#[cfg(test)]
#[async_trait]
impl TranscriptionEngine for MockTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Option<String> {
        self.response.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_returns_trimmed_text() {
        let body = r#"{"text": "  Hello world transcription. "}"#;
        assert_eq!(
            extract_transcript(200, body).as_deref(),
            Some("Hello world transcription.")
        );
    }

    #[test]
    fn silence_marker_table_maps_to_none() {
        for marker in ["", ".", "...", "[silence]", "[noise]", "(silence)"] {
            let body = serde_json::json!({ "text": marker }).to_string();
            assert_eq!(extract_transcript(200, &body), None, "marker {marker:?}");
        }
    }

    #[test]
    fn silence_markers_compare_case_insensitively() {
        for marker in ["[SILENCE]", "[Noise]", "(Silence)"] {
            let body = serde_json::json!({ "text": marker }).to_string();
            assert_eq!(extract_transcript(200, &body), None, "marker {marker:?}");
        }
    }

    #[test]
    fn single_character_text_is_filtered() {
        let body = r#"{"text": "k"}"#;
        assert_eq!(extract_transcript(200, body), None);
    }

    #[test]
    fn two_character_text_survives() {
        let body = r#"{"text": "ok"}"#;
        assert_eq!(extract_transcript(200, body).as_deref(), Some("ok"));
    }

    #[test]
    fn unauthorized_status_returns_none() {
        assert_eq!(extract_transcript(401, "Unauthorized"), None);
    }

    #[test]
    fn server_error_returns_none() {
        assert_eq!(extract_transcript(500, r#"{"text": "hello there"}"#), None);
    }

    #[test]
    fn unparseable_body_returns_none() {
        assert_eq!(extract_transcript(200, "not json at all"), None);
    }

    #[tokio::test]
    async fn missing_api_key_short_circuits() {
        let engine = RemoteTranscriber::new("https://example.invalid/v1", None, "model", 1);
        assert_eq!(engine.transcribe(b"wav").await, None);

        let engine =
            RemoteTranscriber::new("https://example.invalid/v1", Some(String::new()), "model", 1);
        assert_eq!(engine.transcribe(b"wav").await, None);
    }

    #[test]
    fn url_is_joined_without_double_slash() {
        let engine =
            RemoteTranscriber::new("https://api.example.com/v1/", Some("k".into()), "m", 1);
        assert_eq!(engine.url, "https://api.example.com/v1/audio/transcriptions");
    }
}
