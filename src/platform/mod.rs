//! Platform media capabilities
//!
//! The platform's capture primitives are modelled as one injected capability
//! set ([`MediaPlatform`]) so every component above it can be driven by a
//! test double. The real implementation is [`crate::voice::CpalPlatform`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw failure reported by the platform's media layer
///
/// These never leave an audio component unclassified; see
/// [`crate::voice::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "name", content = "detail")]
pub enum PlatformError {
    /// Access was refused by the user or the OS
    #[error("capture not allowed: {0}")]
    NotAllowed(String),

    /// A security policy blocked capture
    #[error("capture blocked by security policy: {0}")]
    Security(String),

    /// No device matched the request
    #[error("no matching capture device: {0}")]
    NotFound(String),

    /// A specific constraint cannot be satisfied
    #[error("constraint cannot be satisfied: {constraint}")]
    Overconstrained {
        /// Name of the offending constraint
        constraint: String,
    },

    /// The device exists but cannot be opened (usually held elsewhere)
    #[error("capture device not readable: {0}")]
    NotReadable(String),

    /// Capture start was aborted by the driver
    #[error("capture aborted: {0}")]
    Aborted(String),

    /// The primitive is missing on this platform
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Kind of media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Microphone or other capture device
    AudioInput,
    /// Speaker or other render device
    AudioOutput,
    /// Camera
    VideoInput,
}

/// One physical or logical media device
///
/// Produced fresh on every enumeration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Opaque stable handle
    pub device_id: String,

    /// Human name; empty until permission is granted on some platforms
    pub label: String,

    /// Device kind
    pub kind: DeviceKind,
}

impl AudioDevice {
    /// Create an audio input device entry
    #[must_use]
    pub fn input(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
            kind: DeviceKind::AudioInput,
        }
    }
}

/// Permission registry state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// Access granted
    Granted,
    /// Access refused
    Denied,
    /// Not yet decided; acquiring would prompt
    Prompt,
}

/// Capture constraints passed to [`MediaPlatform::acquire`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraints {
    /// Exact device to open; `None` means the default input
    pub device_id: Option<String>,

    /// Desired sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Desired channel count
    pub channel_count: Option<u16>,

    /// Request echo cancellation
    pub echo_cancellation: Option<bool>,

    /// Request noise suppression
    pub noise_suppression: Option<bool>,

    /// Request automatic gain control
    pub auto_gain_control: Option<bool>,
}

impl Constraints {
    /// Constraints tuned for speech capture: mono with processing on
    ///
    /// The sample rate is left to the platform's preferred rate so devices
    /// that cannot run at it still open.
    #[must_use]
    pub fn speech() -> Self {
        Self {
            device_id: None,
            sample_rate: None,
            channel_count: Some(1),
            echo_cancellation: Some(true),
            noise_suppression: Some(true),
            auto_gain_control: Some(true),
        }
    }

    /// Pin these constraints to a device
    #[must_use]
    pub fn with_device(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }
}

/// An open hardware capture stream
///
/// Exactly one logical consumer owns a stream at a time. `stop` releases all
/// of its tracks and must be idempotent.
pub trait MediaStream: Send + Sync {
    /// Stream identifier
    fn id(&self) -> &str;

    /// Device backing this stream, if known
    fn device_id(&self) -> Option<&str>;

    /// Whether any track is still live
    fn is_live(&self) -> bool;

    /// Release every track
    fn stop(&self);

    /// Start a recorder that yields one encoded chunk per `timeslice`
    ///
    /// # Errors
    ///
    /// Returns error if the recorder cannot be started
    fn record(&self, timeslice: Duration) -> Result<Box<dyn Recorder>, PlatformError>;
}

/// A running recorder attached to a [`MediaStream`]
#[async_trait]
pub trait Recorder: Send {
    /// Wait for the next chunk; `None` once the recorder has stopped
    async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, PlatformError>>;

    /// Stop recording; idempotent
    fn stop(&mut self);
}

/// The platform's media capability set
#[async_trait]
pub trait MediaPlatform: Send + Sync {
    /// Whether capture primitives exist
    fn supports_capture(&self) -> bool;

    /// Whether recording primitives exist
    fn supports_recording(&self) -> bool;

    /// Query the permission registry; `None` if the platform has none
    async fn permission_state(&self) -> Option<PermissionState>;

    /// Which capture constraints the platform honours
    fn supported_constraints(&self) -> BTreeMap<String, bool>;

    /// List media devices of every kind
    async fn enumerate(&self) -> Result<Vec<AudioDevice>, PlatformError>;

    /// Open a capture stream (may prompt for permission)
    async fn acquire(&self, constraints: &Constraints) -> Result<Box<dyn MediaStream>, PlatformError>;
}

/// Exclusive owner of an open stream and, optionally, its recorder
///
/// Dropping the guard stops the recorder first and then the stream, so every
/// exit path (including cancellation) releases the hardware.
pub struct CaptureGuard {
    stream: Box<dyn MediaStream>,
    recorder: Option<Box<dyn Recorder>>,
}

impl CaptureGuard {
    /// Take ownership of a stream
    #[must_use]
    pub fn new(stream: Box<dyn MediaStream>) -> Self {
        Self {
            stream,
            recorder: None,
        }
    }

    /// Borrow the stream
    #[must_use]
    pub fn stream(&self) -> &dyn MediaStream {
        self.stream.as_ref()
    }

    /// Start recording on the owned stream
    ///
    /// # Errors
    ///
    /// Returns error if the recorder cannot be started
    pub fn start_recording(&mut self, timeslice: Duration) -> Result<(), PlatformError> {
        let recorder = self.stream.record(timeslice)?;
        self.recorder = Some(recorder);
        Ok(())
    }

    /// Wait for the next recorded chunk; `None` if not recording or stopped
    pub async fn next_chunk(&mut self) -> Option<Result<Vec<u8>, PlatformError>> {
        match self.recorder.as_mut() {
            Some(recorder) => recorder.next_chunk().await,
            None => None,
        }
    }

    /// Stop the recorder, then release the stream
    pub fn release(&mut self) {
        if let Some(mut recorder) = self.recorder.take() {
            recorder.stop();
        }
        if self.stream.is_live() {
            self.stream.stop();
            tracing::debug!(stream = self.stream.id(), "capture stream released");
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_constraints_pin_device() {
        let c = Constraints::speech().with_device(Some("usb-mic".to_string()));
        assert_eq!(c.device_id.as_deref(), Some("usb-mic"));
        assert_eq!(c.sample_rate, None);
        assert_eq!(c.echo_cancellation, Some(true));
        assert_eq!(c.channel_count, Some(1));
    }

    #[test]
    fn platform_error_serializes_with_name() {
        let err = PlatformError::NotReadable("busy".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["name"], "NotReadable");
        assert_eq!(json["detail"], "busy");
    }
}
