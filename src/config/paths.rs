//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings + session snapshot):
//!   Windows: %APPDATA%\sidecar\
//!   macOS:   ~/Library/Application Support/sidecar/
//!   Linux:   ~/.config/sidecar/
//!
//! Data dir (skills):
//!   Windows: %LOCALAPPDATA%\sidecar\
//!   macOS:   ~/Library/Application Support/sidecar/
//!   Linux:   ~/.local/share/sidecar/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml` and `session.json`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Full path to the persisted session snapshot.
    pub session_file: PathBuf,
    /// Default skills directory (overridable via [`SkillConfig`]).
    ///
    /// [`SkillConfig`]: crate::config::SkillConfig
    pub skills_dir: PathBuf,
    /// Default path of the persistent transcript well.
    pub transcript_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "sidecar";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path (should be extremely rare in practice).
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let session_file = config_dir.join("session.json");
        let skills_dir = data_dir.join("skills");
        let transcript_file = data_dir.join("transcription.txt");

        Self {
            config_dir,
            settings_file,
            session_file,
            skills_dir,
            transcript_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
