//! Voice capture layer
//!
//! Capability probing, device enumeration, permission negotiation and
//! microphone testing on top of an injected [`MediaPlatform`], plus the cpal
//! implementations of capture and playback.
//!
//! [`MediaPlatform`]: crate::platform::MediaPlatform

mod access;
mod capabilities;
mod capture;
mod devices;
mod permission;
mod playback;
mod tester;

pub use access::{ActionOutcome, AudioAccess};
pub use capabilities::{AudioCapabilities, CapabilityProber, PermissionStatus};
pub use capture::{CpalPlatform, SAMPLE_RATE, samples_to_wav};
pub use devices::DeviceEnumerator;
pub use permission::{PermissionNegotiator, classify};
pub use playback::{CpalPlayback, Pcm, decode};
pub use tester::{DEFAULT_TEST_DURATION, MicrophoneTester};
