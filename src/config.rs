use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Static, secret-free configuration: the defaults CLI flags fall back to.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Folder IDs to list body documents from when no `--source-folder` is
    /// given.
    #[serde(default)]
    pub source_folders: Vec<String>,
    /// Default cover template document ID.
    #[serde(default)]
    pub cover_file_id: Option<String>,
    /// Override for the local cover cache directory.
    #[serde(default)]
    pub cover_cache_dir: Option<PathBuf>,
    /// Default preface documents (after the cover, before the TOC).
    #[serde(default)]
    pub preface_file_ids: Vec<String>,
    /// Default postface documents (at the very end).
    #[serde(default)]
    pub postface_file_ids: Vec<String>,
}

impl GeneratorConfig {
    pub fn trace_loaded(&self) {
        info!(
            source_folders = self.source_folders.len(),
            has_cover = self.cover_file_id.is_some(),
            "Loaded GeneratorConfig"
        );
        debug!(?self, "GeneratorConfig loaded (full debug)");
    }
}
