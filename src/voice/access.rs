//! Caller-facing audio access state
//!
//! Wraps the prober, negotiator and tester with the loading/error state a UI
//! renders, and remembers the last failed action so it can be replayed on
//! request. Nothing here retries on its own.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{AudioCapabilities, CapabilityProber, MicrophoneTester, PermissionNegotiator};
use crate::error::{AudioError, AudioResult};
use crate::platform::{Constraints, MediaPlatform};

/// Operation that can be replayed by [`AudioAccess::retry_last_action`]
#[derive(Debug, Clone, PartialEq, Eq)]
enum LastAction {
    RequestPermission,
    TestAudio {
        device_id: Option<String>,
        duration: Duration,
    },
    RefreshCapabilities,
}

/// Result of a replayed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Permission was granted
    PermissionGranted,
    /// Microphone test finished; `true` if audio was observed
    MicrophoneTested(bool),
    /// A fresh capability snapshot
    Capabilities(AudioCapabilities),
}

#[derive(Debug, Default)]
struct AccessState {
    capabilities: Option<AudioCapabilities>,
    loading: bool,
    error: Option<AudioError>,
    permission_granted: bool,
    last_failed: Option<LastAction>,
}

/// Audio access surface for a UI layer
pub struct AudioAccess {
    prober: CapabilityProber,
    negotiator: PermissionNegotiator,
    tester: MicrophoneTester,
    state: Mutex<AccessState>,
}

impl AudioAccess {
    /// Create the access surface over `platform`
    #[must_use]
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self {
            prober: CapabilityProber::new(Arc::clone(&platform)),
            negotiator: PermissionNegotiator::new(Arc::clone(&platform)),
            tester: MicrophoneTester::new(platform),
            state: Mutex::new(AccessState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AccessState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Latest capability snapshot, if one has been taken
    #[must_use]
    pub fn capabilities(&self) -> Option<AudioCapabilities> {
        self.state().capabilities.clone()
    }

    /// Whether an operation is in flight
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    /// Last classified failure
    #[must_use]
    pub fn error(&self) -> Option<AudioError> {
        self.state().error.clone()
    }

    /// Whether microphone access is known to be granted
    #[must_use]
    pub fn has_permission(&self) -> bool {
        let state = self.state();
        state.permission_granted
            || state
                .capabilities
                .as_ref()
                .is_some_and(|c| c.has_permission)
    }

    /// Whether the platform supports capture and recording
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.prober.is_supported()
    }

    /// Clear the stored error
    pub fn clear_error(&self) {
        let mut state = self.state();
        state.error = None;
        state.last_failed = None;
    }

    fn begin(&self) {
        let mut state = self.state();
        state.loading = true;
        state.error = None;
    }

    fn finish<T>(&self, action: LastAction, result: &AudioResult<T>) {
        let mut state = self.state();
        state.loading = false;
        match result {
            Ok(_) => {
                state.error = None;
                state.last_failed = None;
            }
            Err(e) => {
                state.error = Some(e.clone());
                state.last_failed = Some(action);
            }
        }
    }

    /// Ask for microphone access and refresh the snapshot on success
    ///
    /// # Errors
    ///
    /// Returns the classified failure
    pub async fn request_permission(&self) -> AudioResult<()> {
        self.begin();
        let result = self.negotiator.probe(&Constraints::default()).await;

        if result.is_ok() {
            self.state().permission_granted = true;
            let refreshed = self.prober.capabilities().await;
            if let Ok(caps) = refreshed {
                self.state().capabilities = Some(caps);
            }
        }

        self.finish(LastAction::RequestPermission, &result);
        result
    }

    /// Run a bounded microphone test
    ///
    /// # Errors
    ///
    /// Returns the classified failure
    pub async fn test_audio(&self, device_id: Option<&str>, duration: Duration) -> AudioResult<bool> {
        self.begin();
        let result = self.tester.test_microphone(device_id, duration).await;
        self.finish(
            LastAction::TestAudio {
                device_id: device_id.map(str::to_string),
                duration,
            },
            &result,
        );
        result
    }

    /// Take a fresh capability snapshot
    ///
    /// # Errors
    ///
    /// Returns `BrowserNotSupported` on an unsupported platform
    pub async fn refresh_capabilities(&self) -> AudioResult<AudioCapabilities> {
        self.begin();
        let result = self.prober.capabilities().await;
        if let Ok(caps) = &result {
            self.state().capabilities = Some(caps.clone());
        }
        self.finish(LastAction::RefreshCapabilities, &result);
        result
    }

    /// Replay the last failed action with the same arguments
    ///
    /// Returns `Ok(None)` if nothing has failed since the last success or
    /// [`Self::clear_error`].
    ///
    /// # Errors
    ///
    /// Returns the replayed action's failure
    pub async fn retry_last_action(&self) -> AudioResult<Option<ActionOutcome>> {
        let last = self.state().last_failed.clone();
        let Some(action) = last else {
            return Ok(None);
        };

        tracing::debug!(action = ?action, "retrying last failed action");
        let outcome = match action {
            LastAction::RequestPermission => self
                .request_permission()
                .await
                .map(|()| ActionOutcome::PermissionGranted)?,
            LastAction::TestAudio {
                device_id,
                duration,
            } => self
                .test_audio(device_id.as_deref(), duration)
                .await
                .map(ActionOutcome::MicrophoneTested)?,
            LastAction::RefreshCapabilities => self
                .refresh_capabilities()
                .await
                .map(ActionOutcome::Capabilities)?,
        };
        Ok(Some(outcome))
    }
}
