//! Audio input device enumeration

use std::sync::Arc;

use crate::error::{AudioError, AudioResult};
use crate::platform::{AudioDevice, DeviceKind, MediaPlatform};

/// Lists audio input devices
#[derive(Clone)]
pub struct DeviceEnumerator {
    platform: Arc<dyn MediaPlatform>,
}

impl DeviceEnumerator {
    /// Create an enumerator over `platform`
    #[must_use]
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self { platform }
    }

    /// List audio input devices
    ///
    /// Zero devices is a valid result. Labels may be empty before permission
    /// has been granted.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the platform cannot enumerate at all, or
    /// `BrowserNotSupported` if capture is unavailable
    pub async fn list_audio_input_devices(&self) -> AudioResult<Vec<AudioDevice>> {
        if !self.platform.supports_capture() {
            return Err(AudioError::not_supported());
        }

        let devices = self
            .platform
            .enumerate()
            .await
            .map_err(AudioError::hardware)?;

        let inputs: Vec<_> = devices
            .into_iter()
            .filter(|d| d.kind == DeviceKind::AudioInput)
            .collect();

        tracing::debug!(count = inputs.len(), "enumerated audio input devices");
        Ok(inputs)
    }
}
