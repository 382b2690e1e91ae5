//! Loads the static YAML config file. Secrets never live here; the Drive
//! access token is read from the environment by [`crate::drive`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::GeneratorConfig;

/// Default location: `<user config dir>/songbook-generator/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new()
        .map(|base| base.config_dir().join("songbook-generator").join("config.yaml"))
}

/// Loads the config file, or empty defaults when the default file does not
/// exist. An explicitly requested path must exist.
pub fn load_config(path: Option<&Path>) -> Result<GeneratorConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(GeneratorConfig::default()),
        },
    };

    if !path.exists() {
        if explicit {
            anyhow::bail!("config file not found: {}", path.display());
        }
        debug!(path = %path.display(), "No config file present, using defaults");
        return Ok(GeneratorConfig::default());
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: GeneratorConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse config YAML {}", path.display()))?;
    info!(path = %path.display(), "Parsed config file");
    config.trace_loaded();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "source_folders:\n  - folder-a\n  - folder-b\ncover_file_id: cover-1\npreface_file_ids:\n  - pre-1\n"
        )
        .unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.source_folders, vec!["folder-a", "folder-b"]);
        assert_eq!(config.cover_file_id.as_deref(), Some("cover-1"));
        assert_eq!(config.preface_file_ids, vec!["pre-1"]);
        assert!(config.postface_file_ids.is_empty());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/songbook.yaml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
