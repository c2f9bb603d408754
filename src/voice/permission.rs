//! Microphone permission negotiation
//!
//! Every platform rejection is classified into exactly one
//! [`AudioErrorKind`] before it leaves this module.

use std::sync::Arc;

use crate::error::{AudioError, AudioErrorKind, AudioResult};
use crate::platform::{Constraints, MediaPlatform, MediaStream, PermissionState, PlatformError};

/// Requests hardware access and classifies failures
#[derive(Clone)]
pub struct PermissionNegotiator {
    platform: Arc<dyn MediaPlatform>,
}

impl PermissionNegotiator {
    /// Create a negotiator over `platform`
    #[must_use]
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self { platform }
    }

    /// Open a capture stream matching `constraints`
    ///
    /// On success the caller owns the stream and must stop it.
    ///
    /// # Errors
    ///
    /// Returns the classified failure
    pub async fn request_access(
        &self,
        constraints: &Constraints,
    ) -> AudioResult<Box<dyn MediaStream>> {
        if !(self.platform.supports_capture() && self.platform.supports_recording()) {
            return Err(AudioError::not_supported());
        }

        // A recorded denial is never re-prompted
        if self.platform.permission_state().await == Some(PermissionState::Denied) {
            return Err(AudioError::new(
                AudioErrorKind::PermissionDenied,
                "microphone access was previously denied",
            ));
        }

        match self.platform.acquire(constraints).await {
            Ok(stream) => {
                tracing::debug!(
                    stream = stream.id(),
                    device = stream.device_id().unwrap_or("default"),
                    "microphone access granted"
                );
                Ok(stream)
            }
            Err(e) => {
                let kind = classify(&e, constraints);
                tracing::warn!(kind = %kind, error = %e, "microphone access failed");
                Err(AudioError::with_source(kind, e))
            }
        }
    }

    /// Acquire and immediately release a stream to trigger the permission
    /// prompt
    ///
    /// # Errors
    ///
    /// Returns the classified failure
    pub async fn probe(&self, constraints: &Constraints) -> AudioResult<()> {
        let stream = self.request_access(constraints).await?;
        stream.stop();
        Ok(())
    }
}

/// Classify a platform failure into the audio error taxonomy
///
/// `NotFound` means different things depending on whether a specific device
/// was requested: with a device id the constraint is unsatisfiable, without
/// one there is no hardware at all.
#[must_use]
pub fn classify(error: &PlatformError, constraints: &Constraints) -> AudioErrorKind {
    match error {
        PlatformError::NotAllowed(_) | PlatformError::Security(_) => {
            AudioErrorKind::PermissionDenied
        }
        PlatformError::NotFound(_) if constraints.device_id.is_some() => {
            AudioErrorKind::DeviceNotFound
        }
        PlatformError::NotFound(_) => AudioErrorKind::NoDevices,
        PlatformError::Overconstrained { .. } => AudioErrorKind::DeviceNotFound,
        PlatformError::NotReadable(_) => AudioErrorKind::DeviceInUse,
        PlatformError::Aborted(_) => AudioErrorKind::HardwareError,
        PlatformError::NotSupported(_) => AudioErrorKind::BrowserNotSupported,
        PlatformError::Other(_) => AudioErrorKind::UnknownError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> String {
        "x".to_string()
    }

    #[test]
    fn classification_is_total() {
        let any = Constraints::default();
        let cases = [
            (PlatformError::NotAllowed(detail()), AudioErrorKind::PermissionDenied),
            (PlatformError::Security(detail()), AudioErrorKind::PermissionDenied),
            (PlatformError::NotFound(detail()), AudioErrorKind::NoDevices),
            (
                PlatformError::Overconstrained {
                    constraint: "sampleRate".to_string(),
                },
                AudioErrorKind::DeviceNotFound,
            ),
            (PlatformError::NotReadable(detail()), AudioErrorKind::DeviceInUse),
            (PlatformError::Aborted(detail()), AudioErrorKind::HardwareError),
            (PlatformError::NotSupported(detail()), AudioErrorKind::BrowserNotSupported),
            (PlatformError::Other(detail()), AudioErrorKind::UnknownError),
        ];

        for (error, expected) in cases {
            assert_eq!(classify(&error, &any), expected, "{error:?}");
        }
    }

    #[test]
    fn missing_requested_device_is_not_found() {
        let pinned = Constraints::default().with_device(Some("usb".to_string()));
        assert_eq!(
            classify(&PlatformError::NotFound(detail()), &pinned),
            AudioErrorKind::DeviceNotFound
        );
    }
}
