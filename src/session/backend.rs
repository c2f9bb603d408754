//! Collaborator contracts consumed by the session manager
//!
//! The streaming backend, transcription, synthesis and playback are external
//! systems. They are reached through these traits so the manager can be
//! driven by real HTTP/cpal implementations or by test doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reply to a session creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Server-assigned session id
    pub session_id: String,

    /// Language the server will transcribe in
    #[serde(default)]
    pub language: Option<String>,

    /// Server-side push channel for this session, if any
    #[serde(default)]
    pub websocket_url: Option<String>,
}

/// Server-observed statistics for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session id these stats describe
    pub session_id: String,

    /// Whether the server still considers the session live
    pub is_active: bool,

    /// Creation time (seconds since epoch)
    #[serde(default)]
    pub created_at: f64,

    /// Last activity (seconds since epoch)
    #[serde(default)]
    pub last_activity: f64,

    /// Session language
    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub conversation_entries: u64,

    #[serde(default)]
    pub buffer_chunks: u64,

    /// Buffered audio in bytes
    #[serde(default)]
    pub buffer_size: u64,

    #[serde(default)]
    pub pending_transcriptions: u64,

    #[serde(default)]
    pub pending_responses: u64,
}

/// A captured audio chunk on its way to transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Unique chunk id
    pub chunk_id: String,

    /// Encoded audio (WAV)
    pub data: Vec<u8>,

    /// Capture time
    pub timestamp: DateTime<Utc>,

    /// Last chunk of an utterance
    pub is_final: bool,
}

impl AudioChunk {
    /// Wrap encoded audio in a new chunk
    #[must_use]
    pub fn new(data: Vec<u8>, is_final: bool) -> Self {
        Self {
            chunk_id: uuid::Uuid::new_v4().to_string(),
            data,
            timestamp: Utc::now(),
            is_final,
        }
    }
}

/// Transcribed text for one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    /// Recognised text
    pub text: String,

    /// Detected or requested language
    #[serde(default)]
    pub language: Option<String>,

    /// Recognition confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// A playable audio reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Encoded audio bytes
    pub data: Vec<u8>,

    /// MIME type (`audio/mpeg`, `audio/wav`)
    pub mime_type: String,
}

impl AudioClip {
    /// Whether the clip holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Server that tracks streaming voice sessions
#[async_trait]
pub trait StreamingBackend: Send + Sync {
    /// Create a session
    async fn create(&self, language: &str) -> Result<SessionHandle>;

    /// Query a session; `Ok(None)` if the server no longer knows it
    async fn stats(&self, session_id: &str) -> Result<Option<SessionStats>>;

    /// Destroy a session
    async fn destroy(&self, session_id: &str) -> Result<()>;
}

/// Speech-to-text service
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one chunk with a language hint
    async fn transcribe(&self, chunk: &AudioChunk, language: &str) -> Result<Transcription>;
}

/// Text-to-speech service
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize text with a language hint
    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioClip>;
}

/// Plays synthesized audio
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Start playing a clip
    async fn play(&self, clip: AudioClip) -> Result<()>;

    /// Halt any in-flight playback; idempotent
    fn stop(&self);
}

/// Receives failures that are reported rather than returned
pub trait ErrorReporter: Send + Sync {
    /// Report a failure
    fn report(&self, context: &str, error: &Error);
}

/// Reports failures to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &str, error: &Error) {
        tracing::error!(context, error = %error, "voice session failure");
    }
}
