//! Persistent transcript well.
//!
//! An external dictation tool may keep a rolling transcript file alongside
//! the sidecar.  Pixel turns read it as persistent context (non-clearing);
//! verbal-style consumers read-and-clear so the same text is never
//! submitted twice.  The file is truncated in place rather than replaced so
//! external writers keep their handle.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File-backed transcript well.
pub struct TranscriptWell {
    path: PathBuf,
}

impl TranscriptWell {
    /// Create a well over `path`, touching the file so external watchers
    /// find it immediately.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                log::warn!("ingest: could not create {}: {e}", path.display());
            }
        }
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current transcript, trimmed.
    ///
    /// `clear = true` wipes the content in place after reading (fresh
    /// intent); `clear = false` leaves it as persistent context.  Read
    /// failures degrade to an empty string.
    pub fn poll(&self, clear: bool) -> String {
        let mut file = match std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(e) => {
                log::warn!("ingest: cannot open {}: {e}", self.path.display());
                return String::new();
            }
        };

        let mut text = String::new();
        if let Err(e) = file.read_to_string(&mut text) {
            log::warn!("ingest: cannot read {}: {e}", self.path.display());
            return String::new();
        }
        let text = text.trim().to_string();

        if clear && !text.is_empty() {
            let wiped = file
                .seek(SeekFrom::Start(0))
                .and_then(|_| file.set_len(0))
                .and_then(|_| file.flush());
            if let Err(e) = wiped {
                log::warn!("ingest: cannot clear {}: {e}", self.path.display());
            }
        }

        text
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_well_touches_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transcription.txt");
        let well = TranscriptWell::new(&path);
        assert!(well.path().exists());
        assert_eq!(well.poll(false), "");
    }

    #[test]
    fn persistent_poll_keeps_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, "context from dictation\n").unwrap();

        let well = TranscriptWell::new(&path);
        assert_eq!(well.poll(false), "context from dictation");
        // Vector P reads are non-destructive.
        assert_eq!(well.poll(false), "context from dictation");
    }

    #[test]
    fn clearing_poll_wipes_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, "fresh intent").unwrap();

        let well = TranscriptWell::new(&path);
        assert_eq!(well.poll(true), "fresh intent");
        // Consumed: the next poll sees nothing, but the file still exists.
        assert_eq!(well.poll(true), "");
        assert!(path.exists());
    }
}
