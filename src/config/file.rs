//! TOML configuration file loading
//!
//! Supports `~/.config/voice-session/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Streaming backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Session lifecycle tuning
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Microphone capture
    #[serde(default)]
    pub capture: CaptureFileConfig,
}

/// Backend connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. `http://localhost:8000`)
    pub base_url: Option<String>,

    /// Bearer token
    pub api_token: Option<String>,

    pub request_timeout_secs: Option<u64>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Language hint (`auto`, `en`, `zh`, ...)
    pub language: Option<String>,

    pub chunk_duration_secs: Option<f64>,
    pub max_duration_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,

    /// Consecutive failed health probes before the session is marked failed
    pub max_poll_failures: Option<u32>,

    pub start_timeout_secs: Option<u64>,
    pub teardown_timeout_secs: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Input device name; default input if unset
    pub device_id: Option<String>,

    /// Microphone test length
    pub test_duration_ms: Option<u64>,

    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    config_file_path().map_or_else(VoiceConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-session/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-session").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nlanguage = \"zh\"\nmax_poll_failures = 5\n\n[capture]\ndevice_id = \"USB Mic\"\n",
        )
        .unwrap();

        let fc = load_from(&path);
        assert_eq!(fc.session.language.as_deref(), Some("zh"));
        assert_eq!(fc.session.max_poll_failures, Some(5));
        assert_eq!(fc.capture.device_id.as_deref(), Some("USB Mic"));
        assert!(fc.backend.base_url.is_none());
    }

    #[test]
    fn unparsable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session\nlanguage = ").unwrap();

        let fc = load_from(&path);
        assert!(fc.session.language.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        let fc = load_from(Path::new("/nonexistent/voice-session/config.toml"));
        assert!(fc.capture.sample_rate.is_none());
    }
}
