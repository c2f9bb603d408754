//! Voice Session - microphone access and streaming voice sessions
//!
//! This library provides the client side of a streaming voice interaction:
//! - Capability probing and audio input device enumeration
//! - Microphone permission negotiation with a closed error taxonomy
//! - Bounded microphone tests
//! - User-facing messages and remediation steps for every failure
//! - A session manager that keeps a remote voice session alive, dispatches
//!   captured chunks for transcription and plays synthesized responses
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Session Manager                    │
//! │  state machine │ health poll │ capture │ playback   │
//! └──────────┬───────────────────────────┬──────────────┘
//!            │                           │
//! ┌──────────▼──────────────┐ ┌──────────▼──────────────┐
//! │       Voice layer       │ │      Collaborators      │
//! │ prober │ negotiator │   │ │ backend │ STT │ TTS     │
//! │ enumerator │ tester     │ │ playback │ reporter     │
//! └──────────┬──────────────┘ └─────────────────────────┘
//!            │
//! ┌──────────▼──────────────┐
//! │   MediaPlatform (cpal)  │
//! └─────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod messages;
pub mod platform;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{AudioError, AudioErrorKind, AudioResult, Error, Result};
pub use messages::{error_message, troubleshooting_steps};
pub use platform::{AudioDevice, Constraints, MediaPlatform, PermissionState, PlatformError};
pub use session::{
    Collaborators, SessionEvent, SessionManager, SessionStatus, VoiceSession,
};
pub use voice::{
    AudioAccess, AudioCapabilities, CapabilityProber, DeviceEnumerator, MicrophoneTester,
    PermissionNegotiator, PermissionStatus,
};
