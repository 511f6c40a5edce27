//! The engine router.
//!
//! [`Brain`] owns the constructed chat engines and routes every streaming
//! call to whichever one is active.  An engine whose credential is missing
//! simply has no slot — there is never a half-constructed engine to trip
//! over.  Exactly one engine is active at any time; switching re-seeds the
//! new engine's session with the current system prompt so the persona
//! carries across even though history does not.

use std::collections::HashMap;

use thiserror::Error;

use crate::engine::{ChatEngine, ModelTier};
use crate::events::{error_stream, EventStream};
use crate::skills::SkillData;

/// Name of the session-native engine slot.
pub const ENGINE_GEMINI: &str = "gemini";
/// Name of the manual-history engine slot.
pub const ENGINE_GROQ: &str = "groq";

// ---------------------------------------------------------------------------
// BrainError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BrainError {
    /// No engine could be constructed from the available credentials.
    #[error("no chat engine available — configure at least one API key")]
    NoEngines,
}

// ---------------------------------------------------------------------------
// Brain
// ---------------------------------------------------------------------------

/// Engine slots, active-engine pointer, and current-skill bookkeeping.
pub struct Brain {
    engines: HashMap<&'static str, Box<dyn ChatEngine>>,
    active: &'static str,
    current_skill: Option<SkillData>,
    system_prompt: String,
}

impl Brain {
    /// Build a brain from whichever engines the credentials allowed.
    ///
    /// `preferred` falls back to the other engine when its slot is absent;
    /// with no engines at all this is an unrecoverable startup failure.
    pub fn new(
        gemini: Option<Box<dyn ChatEngine>>,
        groq: Option<Box<dyn ChatEngine>>,
        preferred: &str,
    ) -> Result<Self, BrainError> {
        let mut engines: HashMap<&'static str, Box<dyn ChatEngine>> = HashMap::new();
        if let Some(engine) = gemini {
            engines.insert(ENGINE_GEMINI, engine);
        }
        if let Some(engine) = groq {
            engines.insert(ENGINE_GROQ, engine);
        }

        let preferred = if preferred == ENGINE_GROQ {
            ENGINE_GROQ
        } else {
            ENGINE_GEMINI
        };

        let active = if engines.contains_key(preferred) {
            preferred
        } else {
            *engines.keys().next().ok_or(BrainError::NoEngines)?
        };

        Ok(Self {
            engines,
            active,
            current_skill: None,
            system_prompt: String::new(),
        })
    }

    fn active_engine(&mut self) -> &mut Box<dyn ChatEngine> {
        // The constructor and every mutation keep `active` pointing at an
        // existing slot.
        self.engines
            .get_mut(self.active)
            .expect("active engine slot exists")
    }

    /// Name of the currently active engine slot.
    pub fn active_engine_name(&self) -> &str {
        self.active
    }

    /// Names of all constructed engine slots, sorted.
    pub fn available_engines(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.engines.keys().copied().collect();
        names.sort();
        names
    }

    /// Point at `name` if that slot exists; warn and keep the current
    /// engine otherwise.  The system is never left without an active
    /// engine.
    pub fn set_active_engine(&mut self, name: &str) {
        match name {
            ENGINE_GEMINI if self.engines.contains_key(ENGINE_GEMINI) => {
                self.active = ENGINE_GEMINI;
            }
            ENGINE_GROQ if self.engines.contains_key(ENGINE_GROQ) => {
                self.active = ENGINE_GROQ;
            }
            _ => {
                log::warn!("brain: engine {name:?} not available, staying on {}", self.active);
            }
        }
    }

    /// Swap to the other engine at runtime.
    ///
    /// Returns a display message either way; a missing credential refuses
    /// the switch instead of erroring.  On success the new engine's session
    /// is re-initialized with the current prompt so the persona survives
    /// the swap.
    pub fn switch_engine(&mut self) -> String {
        let target = if self.active == ENGINE_GEMINI {
            ENGINE_GROQ
        } else {
            ENGINE_GEMINI
        };

        if !self.engines.contains_key(target) {
            return format!("{} key missing - cannot switch.", target.to_uppercase());
        }

        self.active = target;
        let prompt = self.system_prompt.clone();
        self.active_engine().init_session(&prompt);
        format!("Switched engine to {}", target.to_uppercase())
    }

    /// Apply a skill to **all** constructed engines so a later
    /// [`switch_engine`](Self::switch_engine) lands on a primed session.
    pub fn set_skill(&mut self, data: SkillData, assembled_prompt: &str) {
        self.current_skill = Some(data);
        self.system_prompt = assembled_prompt.to_string();
        for engine in self.engines.values_mut() {
            engine.init_session(assembled_prompt);
        }
    }

    /// (Re)initialize the active engine's session with the current prompt.
    pub fn init_chat(&mut self) {
        let prompt = self.system_prompt.clone();
        self.active_engine().init_session(&prompt);
    }

    /// One image-driven turn on the active engine.
    pub fn analyze_image_stream(
        &mut self,
        image: Option<Vec<u8>>,
        additional_text: &str,
    ) -> EventStream {
        self.active_engine().stream_analysis(image, additional_text)
    }

    /// One text-only follow-up turn on the active engine.
    ///
    /// Routed through `add_user_message` plus the engine's completion
    /// trigger when it has one; engines with session-managed history fall
    /// back to a text-only `stream_analysis` (their `add_user_message` is a
    /// no-op, so the text is appended exactly once either way).
    pub fn analyze_verbal_stream(&mut self, text: &str) -> EventStream {
        if text.trim().is_empty() {
            return error_stream("Verbal turn requested with no transcribed text.");
        }

        let engine = self.active_engine();
        engine.add_user_message(text);
        match engine.stream_completion() {
            Some(stream) => stream,
            None => engine.stream_analysis(None, text),
        }
    }

    /// Pivot the active engine to a new skill, keeping Brain's own
    /// skill/prompt bookkeeping current regardless of which engine runs.
    pub fn pivot_skill(&mut self, data: SkillData, assembled_prompt: &str) -> EventStream {
        self.current_skill = Some(data.clone());
        self.system_prompt = assembled_prompt.to_string();
        self.active_engine().stream_pivot(&data, assembled_prompt)
    }

    /// Display string for the active engine + model tier.
    pub fn model_name(&mut self) -> String {
        self.active_engine().model_name()
    }

    /// Toggle the active engine's model tier.
    pub fn toggle_model(&mut self) -> ModelTier {
        self.active_engine().toggle_model()
    }

    /// The currently assembled system prompt.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// The currently applied skill data, if a skill was set.
    pub fn current_skill(&self) -> Option<&SkillData> {
        self.current_skill.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
