//! On-disk media layout for event artefacts.
//!
//! Layout: `<media>/clips/<type>_<camera>_<yyyymmdd_hhmmss>.mp4`,
//! `<media>/thumbnails/...jpg`, `<media>/json/...json`.

use crate::events::EventKind;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join("clips")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join("thumbnails")
    }

    pub fn json_dir(&self) -> PathBuf {
        self.root.join("json")
    }

    /// Create the clips/thumbnails/json subtree if missing.
    pub fn ensure_tree(&self) -> Result<()> {
        for dir in [self.clips_dir(), self.thumbnails_dir(), self.json_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("create media directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Base artefact name shared by clip, thumbnail and sidecar.
    pub fn base_name(kind: EventKind, camera_id: &str, at: &DateTime<Local>) -> String {
        format!("{}_{}_{}", kind, camera_id, at.format("%Y%m%d_%H%M%S"))
    }

    pub fn clip_path(&self, base: &str) -> PathBuf {
        self.clips_dir().join(format!("{base}.mp4"))
    }

    /// Intermediate clip container; carries a uniqueness suffix so two
    /// events in the same wall-clock second cannot collide.
    pub fn intermediate_clip_path(&self, base: &str, unique: &str) -> PathBuf {
        self.clips_dir().join(format!("{base}_{unique}_temp.avi"))
    }

    /// Fallback clip path kept when transcoding is unavailable.
    pub fn fallback_clip_path(&self, base: &str) -> PathBuf {
        self.clips_dir().join(format!("{base}.avi"))
    }

    pub fn thumbnail_path(&self, base: &str) -> PathBuf {
        self.thumbnails_dir().join(format!("{base}.jpg"))
    }

    pub fn json_path(&self, base: &str) -> PathBuf {
        self.json_dir().join(format!("{base}.json"))
    }
}
