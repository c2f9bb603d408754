//! Error types for voice sessions
//!
//! Two layers: [`AudioError`] is the closed taxonomy every platform failure is
//! classified into before it leaves an audio component, and [`Error`] is the
//! crate-wide error that also covers the session layer and its collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::PlatformError;

/// Result type alias for voice session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for audio component boundaries
pub type AudioResult<T> = std::result::Result<T, AudioError>;

/// Errors that can occur in the voice session layer
#[derive(Debug, Error)]
pub enum Error {
    /// Classified audio hardware or permission failure
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// The remote session stopped answering health probes
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),

    /// Streaming session backend error
    #[error("session error: {0}")]
    Session(String),

    /// A start attempt finished after it was cancelled or replaced
    #[error("session start superseded by a later call")]
    SessionSuperseded,

    /// Capture was stopped before the microphone finished opening
    #[error("capture stopped before it started")]
    CaptureCancelled,

    /// Speech-to-text error
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Text-to-speech error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio encoding or decoding error
    #[error("codec error: {0}")]
    Codec(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// The taxonomy kind, if this is a classified audio failure
    #[must_use]
    pub const fn audio_kind(&self) -> Option<AudioErrorKind> {
        match self {
            Self::Audio(e) => Some(e.kind),
            _ => None,
        }
    }
}

/// Closed taxonomy of audio failures
///
/// Every platform-level rejection maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioErrorKind {
    /// User or policy rejected the permission prompt
    PermissionDenied,
    /// No input hardware present
    NoDevices,
    /// Requested constraints cannot be satisfied by any device
    DeviceNotFound,
    /// Device is exclusively held by another process
    DeviceInUse,
    /// Capture start aborted or failed at driver level
    HardwareError,
    /// Platform lacks the capture or recording primitives
    BrowserNotSupported,
    /// Anything unclassified
    #[serde(other)]
    UnknownError,
}

impl AudioErrorKind {
    /// All taxonomy members, in declaration order
    pub const ALL: [Self; 7] = [
        Self::PermissionDenied,
        Self::NoDevices,
        Self::DeviceNotFound,
        Self::DeviceInUse,
        Self::HardwareError,
        Self::BrowserNotSupported,
        Self::UnknownError,
    ];

    /// Stable wire name of this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::NoDevices => "NO_DEVICES",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::DeviceInUse => "DEVICE_IN_USE",
            Self::HardwareError => "HARDWARE_ERROR",
            Self::BrowserNotSupported => "BROWSER_NOT_SUPPORTED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for AudioErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified audio failure
///
/// Constructed where the failure happens and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct AudioError {
    /// Taxonomy kind
    pub kind: AudioErrorKind,

    /// Human-readable detail (not the user-facing message, see `messages`)
    pub message: String,

    /// Underlying platform failure, if any
    #[source]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PlatformError>,
}

impl AudioError {
    /// Create an error with no underlying cause
    #[must_use]
    pub fn new(kind: AudioErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping a platform failure
    #[must_use]
    pub fn with_source(kind: AudioErrorKind, source: PlatformError) -> Self {
        Self {
            kind,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Shorthand for `BrowserNotSupported`
    #[must_use]
    pub fn not_supported() -> Self {
        Self::new(
            AudioErrorKind::BrowserNotSupported,
            "audio capture or recording is not available on this platform",
        )
    }

    /// Shorthand for a driver-level failure
    #[must_use]
    pub fn hardware(source: PlatformError) -> Self {
        Self::with_source(AudioErrorKind::HardwareError, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_match_serde() {
        for kind in AudioErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn unrecognised_kind_is_unknown() {
        let kind: AudioErrorKind = serde_json::from_str("\"SPEAKER_ON_FIRE\"").unwrap();
        assert_eq!(kind, AudioErrorKind::UnknownError);
    }

    #[test]
    fn audio_error_exposes_platform_source() {
        use std::error::Error as _;

        let err = AudioError::hardware(PlatformError::Aborted("driver reset".to_string()));
        assert_eq!(err.kind, AudioErrorKind::HardwareError);
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("HARDWARE_ERROR"));
    }

    #[test]
    fn crate_error_reports_audio_kind() {
        let err: Error = AudioError::not_supported().into();
        assert_eq!(err.audio_kind(), Some(AudioErrorKind::BrowserNotSupported));
        assert_eq!(Error::SessionSuperseded.audio_kind(), None);
    }
}
