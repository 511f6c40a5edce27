//! Session snapshot and bootstrap assembly.
//!
//! [`SessionSnapshot`] is the flat key-value record of the last session
//! (engine, skill, resolved placeholders, device identifiers, free-text
//! session context), persisted as JSON in the config dir.  At startup it is
//! loaded and validated — a snapshot referencing a skill or engine that no
//! longer exists is discarded and the bootstrap falls back to config
//! defaults.  It is written back after a successful bootstrap.
//!
//! [`bootstrap`] assembles every component once and hands them to `main`;
//! nothing else in the crate constructs engines or wires collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::audio::CpalAudioSource;
use crate::brain::Brain;
use crate::capture::{FrameSource, NullFrameSource};
use crate::config::{AppConfig, AppPaths};
use crate::engine::{Auth, ChatEngine, GeminiEngine, GroqEngine, SseTransport};
use crate::ingest::TranscriptWell;
use crate::recorder::RecordingOrchestrator;
use crate::skills::{SkillData, SkillManager};
use crate::transcription::RemoteTranscriber;

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// Flat persisted record of the last session's choices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub engine_name: String,
    pub skill_name: String,
    #[serde(default)]
    pub placeholders: HashMap<String, String>,
    #[serde(default)]
    pub monitor_index: Option<u32>,
    #[serde(default)]
    pub audio_device: Option<String>,
    #[serde(default)]
    pub session_context: String,
}

impl SessionSnapshot {
    /// Load from `path`.  Missing or corrupt files degrade to `None` —
    /// snapshot recovery is best-effort by design.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("session: cannot read {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("session: corrupt snapshot {}: {e}", path.display());
                None
            }
        }
    }

    /// Write to `path`, creating parent directories as needed.  Failures
    /// are logged, never fatal — losing the snapshot only costs the next
    /// fast boot.
    pub fn save(&self, path: &Path) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(self)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            std::fs::write(path, content)
        };
        if let Err(e) = write() {
            log::warn!("session: failed to save snapshot: {e}");
        }
    }

    /// A snapshot is restorable when its skill still exists and its engine
    /// slot is constructible.
    pub fn validate(&self, skills: &SkillManager, available_engines: &[&str]) -> bool {
        if !available_engines.contains(&self.engine_name.as_str()) {
            log::info!(
                "session: engine {:?} no longer available, full setup",
                self.engine_name
            );
            return false;
        }
        if !skills.list_skills().iter().any(|s| s == &self.skill_name) {
            log::info!(
                "session: skill {:?} no longer exists, full setup",
                self.skill_name
            );
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Everything `main` wires into the dispatcher, built exactly once.
pub struct Components {
    pub brain: Arc<Mutex<Brain>>,
    pub recorder: Arc<Mutex<RecordingOrchestrator>>,
    pub frames: Arc<dyn FrameSource>,
    pub skills: SkillManager,
    pub well: TranscriptWell,
    pub placeholders: HashMap<String, String>,
    pub current_skill: String,
}

/// Built-in persona used when no skill could be loaded; the sidecar must
/// come up usable even on a pristine machine with an empty skills dir.
fn fallback_skill() -> SkillData {
    SkillData {
        identity: "You are a capable screen-side assistant.".into(),
        instructions: "Answer about whatever is on screen or asked aloud; be direct.".into(),
        context: String::new(),
    }
}

// ---------------------------------------------------------------------------
// bootstrap
// ---------------------------------------------------------------------------

/// Assemble all components from config (+ snapshot, when valid).
///
/// The one unrecoverable failure is having no chat engine credential at
/// all; everything else degrades with a warning.
pub fn bootstrap(config: &AppConfig, paths: &AppPaths) -> anyhow::Result<Components> {
    let skills_dir = config
        .skills
        .dir
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| paths.skills_dir.clone());
    let skills = SkillManager::new(skills_dir);

    // ── Engines (absent credential ⇒ absent slot) ────────────────────────
    let gemini: Option<Box<dyn ChatEngine>> = config.engines.google_key().map(|key| {
        let url = |model: &str| {
            format!(
                "{}/{}:streamGenerateContent?alt=sse",
                config.engines.gemini_base_url.trim_end_matches('/'),
                model
            )
        };
        Box::new(GeminiEngine::new(
            Arc::new(SseTransport::new(
                url(&config.engines.flash_model),
                Auth::GoogleApiKey(key.clone()),
            )),
            Arc::new(SseTransport::new(
                url(&config.engines.pro_model),
                Auth::GoogleApiKey(key),
            )),
            config.engines.thinking_level.clone(),
        )) as Box<dyn ChatEngine>
    });

    let groq_key = config.engines.groq_key();
    let groq: Option<Box<dyn ChatEngine>> = groq_key.clone().map(|key| {
        Box::new(GroqEngine::new(
            Arc::new(SseTransport::new(
                format!(
                    "{}/chat/completions",
                    config.engines.groq_base_url.trim_end_matches('/')
                ),
                Auth::Bearer(key),
            )),
            config.engines.groq_model.clone(),
        )) as Box<dyn ChatEngine>
    });

    let mut brain = Brain::new(gemini, groq, &config.engines.preferred)
        .context("no usable engine credential")?;

    // ── Snapshot restore (best-effort) ───────────────────────────────────
    let available = brain.available_engines();
    let snapshot = SessionSnapshot::load(&paths.session_file)
        .filter(|s| s.validate(&skills, &available));

    let (engine_name, skill_name, placeholders, session_context, monitor_index) = match snapshot {
        Some(s) => {
            log::info!(
                "session: restoring skill {:?} on engine {:?}",
                s.skill_name,
                s.engine_name
            );
            (
                s.engine_name,
                s.skill_name,
                s.placeholders,
                s.session_context,
                s.monitor_index.unwrap_or(config.capture.monitor_index),
            )
        }
        None => (
            config.engines.preferred.clone(),
            config.skills.default_skill.clone(),
            HashMap::new(),
            String::new(),
            config.capture.monitor_index,
        ),
    };

    brain.set_active_engine(&engine_name);

    // ── Skill activation ─────────────────────────────────────────────────
    let skill_data = match skills.load(&skill_name) {
        Ok((mut data, required)) => {
            let unresolved: Vec<&String> = required
                .iter()
                .filter(|name| !placeholders.contains_key(*name))
                .collect();
            if unresolved.is_empty() {
                skills.apply_placeholders(&mut data, &placeholders);
                data.append_context(&session_context);
                Some(data)
            } else {
                log::warn!(
                    "session: skill {skill_name:?} needs values for {unresolved:?}; using fallback persona"
                );
                None
            }
        }
        Err(e) => {
            log::warn!("session: cannot load skill {skill_name:?} ({e}); using fallback persona");
            None
        }
    };
    let skill_data = skill_data.unwrap_or_else(fallback_skill);

    let prompt = skills.assemble_prompt(&skill_data);
    brain.set_skill(skill_data, &prompt);

    // ── Collaborators ────────────────────────────────────────────────────
    let transcriber = Arc::new(RemoteTranscriber::new(
        &config.stt.base_url,
        groq_key,
        config.stt.model.clone(),
        config.stt.timeout_secs,
    ));
    let audio = Box::new(CpalAudioSource::new(config.audio.sample_rate));
    let recorder = RecordingOrchestrator::new(audio, transcriber);

    // No screen-capture backend ships with the core; the null source keeps
    // pixel turns failing cleanly until one is wired in.
    let frames: Arc<dyn FrameSource> = Arc::new(NullFrameSource::new(monitor_index));

    let well = TranscriptWell::new(&paths.transcript_file);

    // ── Commit the session ───────────────────────────────────────────────
    SessionSnapshot {
        engine_name: brain.active_engine_name().to_string(),
        skill_name: skill_name.clone(),
        placeholders: placeholders.clone(),
        monitor_index: Some(monitor_index),
        audio_device: config.audio.device.clone(),
        session_context,
    }
    .save(&paths.session_file);

    Ok(Components {
        brain: Arc::new(Mutex::new(brain)),
        recorder: Arc::new(Mutex::new(recorder)),
        frames,
        skills,
        well,
        placeholders,
        current_skill: skill_name,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
