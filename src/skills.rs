//! Skill (persona) loading and system-prompt assembly.
//!
//! A skill is a directory of three free-text layers:
//!
//! ```text
//! <skills_dir>/<name>/identity.md
//! <skills_dir>/<name>/instructions.md
//! <skills_dir>/<name>/context.md
//! ```
//!
//! `context.md` may contain `{{VAR}}` placeholders.  [`SkillManager::load`]
//! only *reports* the distinct variable names — resolution is the caller's
//! job (session snapshot or interactive bootstrap), after which
//! [`SkillManager::apply_placeholders`] substitutes every occurrence.
//! [`SkillManager::assemble_prompt`] then renders the fixed section
//! template.  Skill data is never mutated after assembly.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

/// Fixed protocol boilerplate included in every assembled prompt.
///
/// The sidecar renders into a compact overlay terminal, so every persona
/// shares the same output discipline regardless of its identity layer.
const RESPONSE_PROTOCOL: &str = "You are operating inside a compact overlay terminal. \
Answer directly and keep output tight; prefer short paragraphs and plain lists over headings.";

// ---------------------------------------------------------------------------
// SkillData
// ---------------------------------------------------------------------------

/// The three persona layers of one loaded skill.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkillData {
    pub identity: String,
    pub instructions: String,
    pub context: String,
}

impl SkillData {
    /// Append free-text session context gathered after loading (e.g. the
    /// snapshot's saved session notes).  Must happen before assembly.
    pub fn append_context(&mut self, extra: &str) {
        if extra.trim().is_empty() {
            return;
        }
        if !self.context.is_empty() && !self.context.ends_with('\n') {
            self.context.push('\n');
        }
        self.context.push_str(extra);
    }
}

// ---------------------------------------------------------------------------
// SkillError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill not found: {0}")]
    NotFound(String),

    #[error("failed to read skill file: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// SkillManager
// ---------------------------------------------------------------------------

/// Loads skills from disk and assembles system prompts.
pub struct SkillManager {
    skills_dir: PathBuf,
    placeholder_re: Regex,
}

impl SkillManager {
    /// Create a manager over `skills_dir`, creating the directory when it
    /// does not exist yet.
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        let skills_dir = skills_dir.into();
        if let Err(e) = std::fs::create_dir_all(&skills_dir) {
            log::warn!(
                "skills: could not create {}: {e}",
                skills_dir.display()
            );
        }
        Self {
            skills_dir,
            // Greedy-minimal: the shortest span between double braces.
            placeholder_re: Regex::new(r"\{\{(.*?)\}\}").expect("valid placeholder regex"),
        }
    }

    /// Directory this manager loads from.
    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    /// All available skill names, sorted.  Directories prefixed with `_`
    /// are templates and are excluded.
    pub fn list_skills(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.skills_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("skills: cannot list {}: {e}", self.skills_dir.display());
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('_'))
            .collect();
        names.sort();
        names
    }

    /// Load the three layers of `name` and report the distinct `{{VAR}}`
    /// names found in the context layer, unresolved.
    pub fn load(&self, name: &str) -> Result<(SkillData, BTreeSet<String>), SkillError> {
        let skill_path = self.skills_dir.join(name);
        if !skill_path.is_dir() {
            return Err(SkillError::NotFound(name.to_string()));
        }

        let data = SkillData {
            identity: read_layer(&skill_path.join("identity.md"))?,
            instructions: read_layer(&skill_path.join("instructions.md"))?,
            context: read_layer(&skill_path.join("context.md"))?,
        };

        let placeholders = self.scan_placeholders(&data.context);
        Ok((data, placeholders))
    }

    /// Distinct placeholder names in `text`.
    pub fn scan_placeholders(&self, text: &str) -> BTreeSet<String> {
        self.placeholder_re
            .captures_iter(text)
            .map(|c| c[1].trim().to_string())
            .collect()
    }

    /// Substitute every `{{VAR}}` occurrence in the context layer for which
    /// `values` holds a resolution.  Names absent from `values` are left in
    /// place; callers decide whether that blocks assembly.
    pub fn apply_placeholders(&self, data: &mut SkillData, values: &HashMap<String, String>) {
        for (var, val) in values {
            data.context = data.context.replace(&format!("{{{{{var}}}}}"), val);
        }
    }

    /// Render the fixed section template.  Section order and the protocol
    /// boilerplate are not configurable per call.
    pub fn assemble_prompt(&self, data: &SkillData) -> String {
        format!(
            "# CORE IDENTITY\n{}\n\n# OPERATIONAL INSTRUCTIONS\n{}\n\n# RESPONSE PROTOCOL\n{}\n\n# SESSION CONTEXT\n{}\n",
            data.identity, data.instructions, RESPONSE_PROTOCOL, data.context
        )
    }
}

/// Read one layer file; a missing layer is an empty string, not an error.
fn read_layer(path: &Path) -> Result<String, SkillError> {
    if !path.exists() {
        return Ok(String::new());
    }
    Ok(std::fs::read_to_string(path)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_skill(dir: &Path, name: &str, identity: &str, instructions: &str, context: &str) {
        let skill = dir.join(name);
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::write(skill.join("identity.md"), identity).unwrap();
        std::fs::write(skill.join("instructions.md"), instructions).unwrap();
        std::fs::write(skill.join("context.md"), context).unwrap();
    }

    #[test]
    fn list_skills_is_sorted_and_skips_templates() {
        let dir = tempdir().unwrap();
        write_skill(dir.path(), "zeta", "", "", "");
        write_skill(dir.path(), "alpha", "", "", "");
        write_skill(dir.path(), "_template", "", "", "");

        let mgr = SkillManager::new(dir.path());
        assert_eq!(mgr.list_skills(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn load_missing_skill_errors() {
        let dir = tempdir().unwrap();
        let mgr = SkillManager::new(dir.path());
        assert!(matches!(mgr.load("ghost"), Err(SkillError::NotFound(_))));
    }

    #[test]
    fn load_reports_distinct_placeholders_without_resolving() {
        let dir = tempdir().unwrap();
        write_skill(
            dir.path(),
            "analyst",
            "You are an analyst.",
            "Be terse.",
            "Project: {{PROJECT}}\nOwner: {{OWNER}}\nAgain: {{PROJECT}}",
        );

        let mgr = SkillManager::new(dir.path());
        let (data, placeholders) = mgr.load("analyst").unwrap();

        assert_eq!(
            placeholders,
            ["OWNER", "PROJECT"]
                .into_iter()
                .map(String::from)
                .collect()
        );
        // Unresolved — load never substitutes.
        assert!(data.context.contains("{{PROJECT}}"));
    }

    #[test]
    fn missing_layer_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let skill = dir.path().join("bare");
        std::fs::create_dir_all(&skill).unwrap();
        std::fs::write(skill.join("identity.md"), "id only").unwrap();

        let mgr = SkillManager::new(dir.path());
        let (data, placeholders) = mgr.load("bare").unwrap();
        assert_eq!(data.identity, "id only");
        assert!(data.instructions.is_empty());
        assert!(data.context.is_empty());
        assert!(placeholders.is_empty());
    }

    #[test]
    fn placeholder_round_trip_substitutes_every_occurrence() {
        let mgr = SkillManager::new(tempdir().unwrap().path());
        let mut data = SkillData {
            identity: "i".into(),
            instructions: "n".into(),
            context: "name={{NAME}} and again {{NAME}}".into(),
        };

        let values = HashMap::from([("NAME".to_string(), "X".to_string())]);
        mgr.apply_placeholders(&mut data, &values);

        let prompt = mgr.assemble_prompt(&data);
        assert_eq!(prompt.matches('X').count(), 2);
        assert!(mgr.scan_placeholders(&prompt).is_empty());
    }

    #[test]
    fn assemble_prompt_renders_fixed_sections_in_order() {
        let mgr = SkillManager::new(tempdir().unwrap().path());
        let data = SkillData {
            identity: "IDY".into(),
            instructions: "INS".into(),
            context: "CTX".into(),
        };

        let prompt = mgr.assemble_prompt(&data);
        let identity = prompt.find("# CORE IDENTITY").unwrap();
        let instructions = prompt.find("# OPERATIONAL INSTRUCTIONS").unwrap();
        let protocol = prompt.find("# RESPONSE PROTOCOL").unwrap();
        let context = prompt.find("# SESSION CONTEXT").unwrap();
        assert!(identity < instructions && instructions < protocol && protocol < context);
        assert!(prompt.contains("IDY") && prompt.contains("INS") && prompt.contains("CTX"));
    }

    #[test]
    fn append_context_adds_newline_separator() {
        let mut data = SkillData {
            context: "base".into(),
            ..Default::default()
        };
        data.append_context("extra notes");
        assert_eq!(data.context, "base\nextra notes");

        // Blank extras are ignored.
        data.append_context("   ");
        assert_eq!(data.context, "base\nextra notes");
    }
}
