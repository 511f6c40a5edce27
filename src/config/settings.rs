//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//!
//! API keys may be left out of the file entirely; [`EngineConfig`] falls
//! back to the `GOOGLE_API_KEY` / `GROQ_API_KEY` environment variables at
//! lookup time so credentials never have to live on disk.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Settings for the chat engines (session-native + manual-history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Preferred engine name at startup: `"gemini"` or `"groq"`.
    ///
    /// Falls back to the other engine when the preferred one has no
    /// credential.
    pub preferred: String,
    /// Google API key.  `None` means "read `GOOGLE_API_KEY` from the
    /// environment".
    pub google_api_key: Option<String>,
    /// Groq API key.  `None` means "read `GROQ_API_KEY` from the
    /// environment".
    pub groq_api_key: Option<String>,
    /// Fast-tier Gemini model id.
    pub flash_model: String,
    /// Deep-tier Gemini model id.
    pub pro_model: String,
    /// Reasoning depth passed to the deep tier (`"low"` / `"high"`).
    pub thinking_level: String,
    /// Groq chat model id.
    pub groq_model: String,
    /// Base URL of the Gemini streaming endpoint.
    pub gemini_base_url: String,
    /// Base URL of the Groq OpenAI-compatible endpoint.
    pub groq_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preferred: "gemini".into(),
            google_api_key: None,
            groq_api_key: None,
            flash_model: "models/gemini-3-flash-preview".into(),
            pro_model: "models/gemini-3-pro-preview".into(),
            thinking_level: "high".into(),
            groq_model: "meta-llama/llama-4-maverick-17b-128e-instruct".into(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            groq_base_url: "https://api.groq.com/openai/v1".into(),
        }
    }
}

impl EngineConfig {
    /// Resolved Google credential: config value, else `GOOGLE_API_KEY` env.
    pub fn google_key(&self) -> Option<String> {
        resolve_key(self.google_api_key.as_deref(), "GOOGLE_API_KEY")
    }

    /// Resolved Groq credential: config value, else `GROQ_API_KEY` env.
    pub fn groq_key(&self) -> Option<String> {
        resolve_key(self.groq_api_key.as_deref(), "GROQ_API_KEY")
    }
}

/// Non-empty config value wins; otherwise a non-empty env var; otherwise
/// `None`.
fn resolve_key(configured: Option<&str>, env_var: &str) -> Option<String> {
    match configured {
        Some(k) if !k.trim().is_empty() => Some(k.to_string()),
        _ => std::env::var(env_var).ok().filter(|k| !k.trim().is_empty()),
    }
}

// ---------------------------------------------------------------------------
// SttConfig
// ---------------------------------------------------------------------------

/// Settings for the remote speech-to-text endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// STT model id sent with each transcription request.
    pub model: String,
    /// Base URL of the OpenAI-compatible transcription endpoint.
    pub base_url: String,
    /// Maximum seconds to wait for a transcription response.
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: "whisper-large-v3-turbo".into(),
            base_url: "https://api.groq.com/openai/v1".into(),
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Preferred capture sample rate in Hz.  The device's native rate is
    /// used when the hardware rejects this one.
    pub sample_rate: u32,
    /// Input device name — `None` means the system default.
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Settings for the external frame source.
///
/// The sidecar core only passes these through to whichever capture backend
/// is wired in; it never interprets the pixels itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Monitor index to capture (1 = primary).
    pub monitor_index: u32,
    /// Crop margins in pixels: top, bottom, left, right.
    pub crop: (u32, u32, u32, u32),
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            monitor_index: 1,
            crop: (120, 40, 0, 0),
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey bindings, one single key per trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    /// Screen-capture ("pixel") turn.
    pub pixel_key: String,
    /// Voice ("talk") toggle.
    pub talk_key: String,
    /// Model-tier toggle within the active engine.
    pub model_key: String,
    /// Engine switch.
    pub engine_key: String,
    /// Skill pivot.
    pub skill_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            pixel_key: "F8".into(),
            talk_key: "F9".into(),
            model_key: "F10".into(),
            engine_key: "F11".into(),
            skill_key: "F12".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SkillConfig
// ---------------------------------------------------------------------------

/// Settings for skill (persona) loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    /// Skills directory — `None` means the platform data dir.
    pub dir: Option<String>,
    /// Skill activated when no session snapshot is available.
    pub default_skill: String,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            dir: None,
            default_skill: "default".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use sidecar::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat engine settings.
    pub engines: EngineConfig,
    /// Remote STT settings.
    pub stt: SttConfig,
    /// Microphone capture settings.
    pub audio: AudioConfig,
    /// Frame source settings.
    pub capture: CaptureConfig,
    /// Global hotkey bindings.
    pub hotkeys: HotkeyConfig,
    /// Skill loading settings.
    pub skills: SkillConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save to the platform-appropriate `settings.toml`.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path, creating parent directories as needed.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
