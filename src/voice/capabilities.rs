//! Platform capability probing

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{DeviceEnumerator, PermissionNegotiator};
use crate::error::{AudioError, AudioResult};
use crate::platform::{AudioDevice, Constraints, MediaPlatform, PermissionState};

/// Permission tri-state with an optional error detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    /// Registry state
    pub state: PermissionState,

    /// Failure observed while determining the state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AudioError>,
}

impl PermissionStatus {
    fn from_state(state: PermissionState) -> Self {
        Self { state, error: None }
    }

    /// Whether access is granted
    #[must_use]
    pub fn granted(&self) -> bool {
        self.state == PermissionState::Granted
    }

    /// Whether access was refused
    #[must_use]
    pub fn denied(&self) -> bool {
        self.state == PermissionState::Denied
    }

    /// Whether acquiring would prompt
    #[must_use]
    pub fn prompt(&self) -> bool {
        self.state == PermissionState::Prompt
    }
}

/// Immutable snapshot of what the environment allows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCapabilities {
    /// True iff `devices` is non-empty
    pub has_audio_input: bool,

    /// Whether microphone access is granted
    pub has_permission: bool,

    /// Audio input devices
    pub devices: Vec<AudioDevice>,

    /// Capture constraints the platform honours
    pub supported_constraints: BTreeMap<String, bool>,
}

impl AudioCapabilities {
    fn new(
        has_permission: bool,
        devices: Vec<AudioDevice>,
        supported_constraints: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            has_audio_input: !devices.is_empty(),
            has_permission,
            devices,
            supported_constraints,
        }
    }
}

/// Detects platform support and permission state
#[derive(Clone)]
pub struct CapabilityProber {
    platform: Arc<dyn MediaPlatform>,
    enumerator: DeviceEnumerator,
    negotiator: PermissionNegotiator,
}

impl CapabilityProber {
    /// Create a prober over `platform`
    #[must_use]
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self {
            enumerator: DeviceEnumerator::new(Arc::clone(&platform)),
            negotiator: PermissionNegotiator::new(Arc::clone(&platform)),
            platform,
        }
    }

    /// Whether capture and recording primitives exist
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.platform.supports_capture() && self.platform.supports_recording()
    }

    /// Query the permission registry
    ///
    /// Platforms without a registry report `prompt`.
    pub async fn permission_status(&self) -> PermissionStatus {
        let state = self
            .platform
            .permission_state()
            .await
            .unwrap_or(PermissionState::Prompt);
        PermissionStatus::from_state(state)
    }

    /// Build a capability snapshot
    ///
    /// If enumeration fails before permission is granted, access is probed
    /// once and enumeration retried. Secondary failures end up as
    /// `has_permission: false` with no devices.
    ///
    /// # Errors
    ///
    /// Returns `BrowserNotSupported` if the platform lacks capture or
    /// recording; nothing else fails the call
    pub async fn capabilities(&self) -> AudioResult<AudioCapabilities> {
        if !self.is_supported() {
            return Err(AudioError::not_supported());
        }

        let supported_constraints = self.platform.supported_constraints();
        let permission = self.permission_status().await;

        match self.enumerator.list_audio_input_devices().await {
            Ok(devices) => Ok(AudioCapabilities::new(
                permission.granted(),
                devices,
                supported_constraints,
            )),
            Err(e) if !permission.granted() => {
                tracing::debug!(error = %e, "enumeration failed before permission, probing access");
                if let Err(e) = self.negotiator.probe(&Constraints::default()).await {
                    tracing::debug!(kind = %e.kind, "permission probe failed");
                    return Ok(AudioCapabilities::new(false, Vec::new(), supported_constraints));
                }

                let devices = self
                    .enumerator
                    .list_audio_input_devices()
                    .await
                    .unwrap_or_else(|e| {
                        tracing::debug!(error = %e, "enumeration retry failed");
                        Vec::new()
                    });
                Ok(AudioCapabilities::new(true, devices, supported_constraints))
            }
            Err(e) => {
                tracing::warn!(error = %e, "device enumeration failed");
                Ok(AudioCapabilities::new(
                    permission.granted(),
                    Vec::new(),
                    supported_constraints,
                ))
            }
        }
    }
}
