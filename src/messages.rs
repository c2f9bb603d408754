//! User-facing messages and remediation steps for audio failures
//!
//! Pure lookups; every taxonomy kind has a message and an ordered list of
//! steps, and anything outside the taxonomy gets the generic fallback.

use crate::error::{AudioErrorKind, Error};

const GENERIC_MESSAGE: &str = "Something went wrong with voice input. Please try again.";

const GENERIC_STEPS: &[&str] = &[
    "Try again",
    "Restart the application if the problem persists",
];

/// Message for an audio error kind
#[must_use]
pub const fn kind_message(kind: AudioErrorKind) -> &'static str {
    match kind {
        AudioErrorKind::PermissionDenied => {
            "Microphone access was denied. Allow microphone access in your settings to use voice input."
        }
        AudioErrorKind::NoDevices => {
            "No microphone was found. Connect a microphone to use voice input."
        }
        AudioErrorKind::DeviceNotFound => {
            "The selected microphone is not available. Choose another device."
        }
        AudioErrorKind::DeviceInUse => {
            "The microphone is being used by another application."
        }
        AudioErrorKind::HardwareError => {
            "The microphone could not be started due to a hardware error."
        }
        AudioErrorKind::BrowserNotSupported => {
            "Audio recording is not supported on this platform."
        }
        AudioErrorKind::UnknownError => {
            "An unexpected error occurred while accessing the microphone."
        }
    }
}

/// Ordered remediation steps for an audio error kind
#[must_use]
pub const fn kind_steps(kind: AudioErrorKind) -> &'static [&'static str] {
    match kind {
        AudioErrorKind::PermissionDenied => &[
            "Open your system or browser privacy settings",
            "Find the microphone permission for this application",
            "Change the permission to \"Allow\"",
            "Restart voice input",
        ],
        AudioErrorKind::NoDevices => &[
            "Connect a microphone or headset",
            "Make sure the device is switched on and not muted",
            "Refresh the device list",
        ],
        AudioErrorKind::DeviceNotFound => &[
            "Check that the selected microphone is still connected",
            "Select a different microphone",
            "Refresh the device list",
        ],
        AudioErrorKind::DeviceInUse => &[
            "Close other applications that may be using the microphone",
            "Try again",
        ],
        AudioErrorKind::HardwareError => &[
            "Disconnect and reconnect the microphone",
            "Try again",
            "Restart your computer if the problem persists",
        ],
        AudioErrorKind::BrowserNotSupported => &[
            "Use a platform with audio capture support",
            "Update your audio drivers or browser to the latest version",
        ],
        AudioErrorKind::UnknownError => GENERIC_STEPS,
    }
}

/// User-facing message for any crate error
#[must_use]
pub fn error_message(error: &Error) -> &'static str {
    match error {
        Error::Audio(e) => kind_message(e.kind),
        Error::SessionUnavailable(_) => {
            "The voice session was lost. Start voice input again to reconnect."
        }
        _ => GENERIC_MESSAGE,
    }
}

/// Ordered remediation steps for any crate error
#[must_use]
pub fn troubleshooting_steps(error: &Error) -> &'static [&'static str] {
    match error {
        Error::Audio(e) => kind_steps(e.kind),
        Error::SessionUnavailable(_) => &[
            "Check your network connection",
            "Start voice input again",
        ],
        _ => GENERIC_STEPS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;

    #[test]
    fn every_kind_has_message_and_steps() {
        for kind in AudioErrorKind::ALL {
            assert!(!kind_message(kind).is_empty());
            assert!(!kind_steps(kind).is_empty());
        }
    }

    #[test]
    fn permission_denied_has_four_settings_steps() {
        let err: Error = AudioError::new(AudioErrorKind::PermissionDenied, "denied").into();
        assert!(error_message(&err).contains("denied"));
        assert_eq!(troubleshooting_steps(&err).len(), 4);
    }

    #[test]
    fn non_audio_errors_fall_back() {
        let err = Error::Config("bad".to_string());
        assert_eq!(error_message(&err), GENERIC_MESSAGE);
        assert_eq!(troubleshooting_steps(&err), GENERIC_STEPS);
    }
}
