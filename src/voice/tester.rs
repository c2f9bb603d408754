//! Short bounded microphone test

use std::sync::Arc;
use std::time::Duration;

use super::PermissionNegotiator;
use crate::error::{AudioError, AudioResult};
use crate::platform::{CaptureGuard, Constraints, MediaPlatform};

/// Default test length
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_millis(1000);

/// Recorder chunk interval used while testing
const TEST_TIMESLICE: Duration = Duration::from_millis(100);

/// Confirms that a device actually produces audio
#[derive(Clone)]
pub struct MicrophoneTester {
    negotiator: PermissionNegotiator,
}

impl MicrophoneTester {
    /// Create a tester over `platform`
    #[must_use]
    pub fn new(platform: Arc<dyn MediaPlatform>) -> Self {
        Self {
            negotiator: PermissionNegotiator::new(platform),
        }
    }

    /// Record for at most `duration` and report whether any non-empty chunk
    /// arrived
    ///
    /// The stream and recorder are released before this returns, whatever
    /// the outcome.
    ///
    /// # Errors
    ///
    /// Returns the classified acquisition failure, or `HardwareError` if the
    /// recorder fails
    pub async fn test_microphone(
        &self,
        device_id: Option<&str>,
        duration: Duration,
    ) -> AudioResult<bool> {
        let constraints = Constraints::default().with_device(device_id.map(str::to_string));
        let stream = self.negotiator.request_access(&constraints).await?;
        let mut guard = CaptureGuard::new(stream);

        let timeslice = TEST_TIMESLICE.min(duration).max(Duration::from_millis(1));
        guard
            .start_recording(timeslice)
            .map_err(AudioError::hardware)?;

        let observed = tokio::time::timeout(duration, async {
            while let Some(chunk) = guard.next_chunk().await {
                match chunk {
                    Ok(data) if !data.is_empty() => return Ok(true),
                    Ok(_) => {}
                    Err(e) => return Err(AudioError::hardware(e)),
                }
            }
            Ok(false)
        })
        .await
        .unwrap_or(Ok(false));

        guard.release();

        tracing::debug!(
            device = device_id.unwrap_or("default"),
            ok = matches!(observed, Ok(true)),
            "microphone test finished"
        );
        observed
    }
}
