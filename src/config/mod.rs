//! Configuration management for voice sessions
//!
//! Layered as env > TOML file > default.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use self::file::VoiceConfigFile;
use crate::voice::SAMPLE_RATE;
use crate::{Error, Result};

/// Default streaming backend
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Voice session configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Streaming backend connection
    pub backend: BackendConfig,

    /// Session lifecycle tuning
    pub session: SessionConfig,

    /// Microphone capture
    pub capture: CaptureConfig,
}

/// Streaming backend connection
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the backend (validated on load)
    pub base_url: String,

    /// Bearer token, if the backend requires one
    pub api_token: Option<SecretString>,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Session lifecycle tuning
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Language hint sent to the backend and the speech services
    pub language: String,

    /// Length of each captured chunk
    pub chunk_duration: Duration,

    /// Sessions are ended after this long
    pub max_duration: Duration,

    /// Health poll period
    pub poll_interval: Duration,

    /// Consecutive failed polls before the session is marked failed
    pub max_poll_failures: u32,

    /// Bound on the session start round-trip
    pub start_timeout: Duration,

    /// Bound on best-effort remote teardown
    pub teardown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            chunk_duration: Duration::from_secs(2),
            max_duration: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(5),
            max_poll_failures: 3,
            start_timeout: Duration::from_secs(15),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Input device; default input if `None`
    pub device_id: Option<String>,

    /// Microphone test length
    pub test_duration: Duration,

    /// Capture sample rate in Hz
    pub sample_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            test_duration: Duration::from_millis(1000),
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// Zero durations would stall the poll and chunk timers
fn positive_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if the backend URL is invalid
    pub fn load() -> Result<Self> {
        // Load optional TOML config file (env > toml > default)
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Layer `env` over a parsed config file over defaults
    ///
    /// # Errors
    ///
    /// Returns error if the backend URL is invalid
    pub fn from_sources(fc: VoiceConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let base_url = env("VOICE_SESSION_BACKEND_URL")
            .or(fc.backend.base_url)
            .unwrap_or(defaults.backend.base_url);
        Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))?;

        let backend = BackendConfig {
            base_url,
            api_token: env("VOICE_SESSION_API_TOKEN")
                .or(fc.backend.api_token)
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            request_timeout: fc
                .backend
                .request_timeout_secs
                .and_then(positive_secs)
                .unwrap_or(defaults.backend.request_timeout),
        };

        let s = fc.session;
        let session = SessionConfig {
            language: env("VOICE_SESSION_LANGUAGE")
                .or(s.language)
                .unwrap_or(defaults.session.language),
            chunk_duration: s
                .chunk_duration_secs
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .unwrap_or(defaults.session.chunk_duration),
            max_duration: s
                .max_duration_secs
                .and_then(positive_secs)
                .unwrap_or(defaults.session.max_duration),
            poll_interval: s
                .poll_interval_secs
                .and_then(positive_secs)
                .unwrap_or(defaults.session.poll_interval),
            max_poll_failures: s
                .max_poll_failures
                .unwrap_or(defaults.session.max_poll_failures)
                .max(1),
            start_timeout: s
                .start_timeout_secs
                .and_then(positive_secs)
                .unwrap_or(defaults.session.start_timeout),
            teardown_timeout: s
                .teardown_timeout_secs
                .and_then(positive_secs)
                .unwrap_or(defaults.session.teardown_timeout),
        };

        let c = fc.capture;
        let capture = CaptureConfig {
            device_id: env("VOICE_SESSION_DEVICE").or(c.device_id),
            test_duration: c
                .test_duration_ms
                .filter(|ms| *ms > 0)
                .map_or(defaults.capture.test_duration, Duration::from_millis),
            sample_rate: c.sample_rate.unwrap_or(defaults.capture.sample_rate),
        };

        Ok(Self {
            backend,
            session,
            capture,
        })
    }
}
