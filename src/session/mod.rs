//! Streaming voice session lifecycle
//!
//! [`SessionManager`] owns at most one remote session at a time and drives
//! it through `disconnected -> connecting -> connected -> (disconnected |
//! error)`. While the manager is alive a background task polls the backend
//! for session stats so a silently dropped session surfaces as `error`.
//!
//! State lives behind a synchronous mutex that is never held across an
//! await. Overlapping calls are serialized by the state they observe, not
//! by holding the lock.
//!
//! A start response is matched to its call by attempt id rather than by
//! session id, since no session id exists until the backend replies.
//! Capture starts carry a stop epoch so a stop or end issued while the
//! microphone is being acquired always wins.

mod backend;
mod http;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

pub use backend::{
    AudioChunk, AudioClip, ErrorReporter, PlaybackSink, SessionHandle, SessionStats,
    StreamingBackend, Synthesizer, Transcriber, Transcription, TracingReporter,
};
pub use http::HttpBackend;

use crate::config::SessionConfig;
use crate::error::AudioError;
use crate::platform::{CaptureGuard, Constraints, MediaPlatform};
use crate::voice::PermissionNegotiator;
use crate::{Error, Result};

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 64;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session (initial and terminal)
    Disconnected,
    /// Waiting for the backend to create a session
    Connecting,
    /// Session live
    Connected,
    /// Session failed; recoverable by starting again
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        })
    }
}

/// Snapshot of the tracked session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSession {
    /// Server-assigned id
    pub session_id: String,

    /// Manager status at snapshot time
    pub status: SessionStatus,

    /// When the session connected
    pub started_at: DateTime<Utc>,

    /// Capture chunk length
    pub chunk_duration_seconds: f64,

    /// Session lifetime limit
    pub max_duration_seconds: u64,

    /// True iff `status` is `connected`
    pub is_active: bool,
}

/// Notification broadcast to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Status changed
    StatusChanged(SessionStatus),
    /// A chunk was transcribed
    Transcript(Transcription),
    /// A health probe returned server stats
    Stats(SessionStats),
    /// Synthesized speech was handed to the playback sink
    SpeechPlayed {
        /// Text that was spoken
        text: String,
    },
}

/// External systems the session manager composes
#[derive(Clone)]
pub struct Collaborators {
    /// Media capture platform
    pub platform: Arc<dyn MediaPlatform>,
    /// Session tracking backend
    pub backend: Arc<dyn StreamingBackend>,
    /// Speech-to-text
    pub transcriber: Arc<dyn Transcriber>,
    /// Text-to-speech
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Audio output
    pub playback: Arc<dyn PlaybackSink>,
    /// Sink for failures that are reported rather than returned
    pub reporter: Arc<dyn ErrorReporter>,
}

struct TrackedSession {
    session_id: String,
    started_at: DateTime<Utc>,
    connected_at: Instant,
}

struct State {
    status: SessionStatus,
    session: Option<TrackedSession>,
    /// Start attempt whose response may still be applied
    attempt: Option<Uuid>,
    enabled: bool,
    poll_failures: u32,
    last_stats: Option<SessionStats>,
}

#[derive(Default)]
struct CaptureSlot {
    /// Bumped by every stop
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

impl CaptureSlot {
    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|h| !h.is_finished())
    }
}

struct Inner {
    collaborators: Collaborators,
    negotiator: PermissionNegotiator,
    config: SessionConfig,
    state: Mutex<State>,
    capture: Mutex<CaptureSlot>,
    events: broadcast::Sender<SessionEvent>,
    status_tx: watch::Sender<SessionStatus>,
}

/// Owns the lifecycle of one streaming voice session
pub struct SessionManager {
    inner: Arc<Inner>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager and start its health poll
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(collaborators: Collaborators, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status_tx, _) = watch::channel(SessionStatus::Disconnected);

        let inner = Arc::new(Inner {
            negotiator: PermissionNegotiator::new(Arc::clone(&collaborators.platform)),
            collaborators,
            config,
            state: Mutex::new(State {
                status: SessionStatus::Disconnected,
                session: None,
                attempt: None,
                enabled: false,
                poll_failures: 0,
                last_stats: None,
            }),
            capture: Mutex::new(CaptureSlot::default()),
            events,
            status_tx,
        });

        let poller = tokio::spawn(poll_loop(
            Arc::downgrade(&inner),
            inner.config.poll_interval,
        ));

        Self {
            inner,
            poller: Mutex::new(Some(poller)),
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.state().status
    }

    /// Whether streaming is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.state().enabled
    }

    /// Snapshot of the tracked session without querying the backend
    #[must_use]
    pub fn session(&self) -> Option<VoiceSession> {
        self.inner.snapshot(&self.inner.state())
    }

    /// Stats from the most recent successful health probe
    #[must_use]
    pub fn last_stats(&self) -> Option<SessionStats> {
        self.inner.state().last_stats.clone()
    }

    /// Subscribe to session events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Watch the status
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Start a session
    ///
    /// Returns the resulting status; if a session is already connecting or
    /// connected this is a no-op returning that status.
    ///
    /// # Errors
    ///
    /// Returns the backend failure or timeout (status becomes `error`), or
    /// [`Error::SessionSuperseded`] if the session was ended or restarted
    /// while this call was waiting
    pub async fn start_session(&self) -> Result<SessionStatus> {
        self.inner.start().await
    }

    /// End the session
    ///
    /// Remote teardown is best-effort; local state always ends
    /// `disconnected` and any live capture is released.
    pub async fn end_session(&self) -> SessionStatus {
        self.inner.end().await
    }

    /// Query the backend for the tracked session
    ///
    /// Returns `None` unless connected. A failed or negative probe moves the
    /// session to `error` and returns `None`.
    pub async fn get_session_stats(&self) -> Option<VoiceSession> {
        self.inner.probe().await
    }

    /// Flip the enabled flag, starting a session if enabling while
    /// disconnected
    ///
    /// Disabling never ends a session. Returns the new flag value.
    ///
    /// # Errors
    ///
    /// Returns the start failure if enabling triggered a start
    pub async fn toggle_streaming(&self) -> Result<bool> {
        let (enabled, should_start) = {
            let mut state = self.inner.state();
            state.enabled = !state.enabled;
            (
                state.enabled,
                state.enabled && state.status == SessionStatus::Disconnected,
            )
        };

        tracing::info!(enabled, "voice streaming toggled");
        if should_start {
            self.inner.start().await?;
        }
        Ok(enabled)
    }

    /// Synthesize `text` and play it
    ///
    /// Does nothing while streaming is disabled or for blank text. Failures
    /// go to the error reporter. Returns whether audio was played.
    pub async fn generate_speech_response(&self, text: &str) -> bool {
        if !self.is_enabled() || text.trim().is_empty() {
            return false;
        }

        let c = &self.inner.collaborators;
        let clip = match c
            .synthesizer
            .synthesize(text, &self.inner.config.language)
            .await
        {
            Ok(clip) => clip,
            Err(e) => {
                c.reporter.report("speech synthesis", &e);
                return false;
            }
        };

        if let Err(e) = c.playback.play(clip).await {
            c.reporter.report("speech playback", &e);
            return false;
        }

        let _ = self.inner.events.send(SessionEvent::SpeechPlayed {
            text: text.to_string(),
        });
        true
    }

    /// Halt any in-flight playback
    pub fn stop_audio(&self) {
        self.inner.collaborators.playback.stop();
    }

    /// Transcribe one chunk and broadcast the result
    ///
    /// A failure only loses this chunk; it is reported and `None` returned.
    pub async fn dispatch_chunk(&self, chunk: AudioChunk) -> Option<Transcription> {
        self.inner.dispatch(chunk).await
    }

    /// Capture from the microphone and dispatch one chunk per chunk duration
    ///
    /// No-op if capture is already running.
    ///
    /// # Errors
    ///
    /// Returns the classified acquisition or recorder failure, or
    /// [`Error::CaptureCancelled`] if capture was stopped or the session
    /// ended while the microphone was being acquired
    pub async fn start_capture(&self, constraints: &Constraints) -> Result<()> {
        let epoch = {
            let slot = self.inner.capture_slot();
            if slot.is_running() {
                return Ok(());
            }
            slot.epoch
        };

        let stream = self.inner.negotiator.request_access(constraints).await?;
        let mut guard = CaptureGuard::new(stream);
        guard
            .start_recording(self.inner.config.chunk_duration)
            .map_err(AudioError::hardware)?;

        let mut slot = self.inner.capture_slot();
        if slot.epoch != epoch {
            tracing::debug!(stream = guard.stream().id(), "capture stopped while acquiring");
            drop(slot);
            guard.release();
            return Err(Error::CaptureCancelled);
        }
        if slot.is_running() {
            // Lost a race with a concurrent start; the guard releases on drop
            return Ok(());
        }

        tracing::info!(stream = guard.stream().id(), "voice capture started");
        slot.task = Some(tokio::spawn(capture_loop(Arc::downgrade(&self.inner), guard)));
        Ok(())
    }

    /// Stop the recorder and release the microphone
    pub async fn stop_capture(&self) {
        self.inner.stop_capture().await;
    }

    /// Tear down in order: stop the health poll, end the session (bounded,
    /// best-effort) and release capture, then halt playback
    pub async fn dispose(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = poller {
            handle.abort();
            let _ = handle.await;
        }

        self.inner.end().await;
        self.inner.stop_capture().await;
        self.stop_audio();
        tracing::debug!("session manager disposed");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        if let Some(handle) = self.inner.capture_slot().task.take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn capture_slot(&self) -> MutexGuard<'_, CaptureSlot> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self, state: &State) -> Option<VoiceSession> {
        state.session.as_ref().map(|s| VoiceSession {
            session_id: s.session_id.clone(),
            status: state.status,
            started_at: s.started_at,
            chunk_duration_seconds: self.config.chunk_duration.as_secs_f64(),
            max_duration_seconds: self.config.max_duration.as_secs(),
            is_active: state.status == SessionStatus::Connected,
        })
    }

    fn transition(&self, state: &mut State, to: SessionStatus) {
        if state.status == to {
            return;
        }

        tracing::info!(from = %state.status, to = %to, "session status changed");
        state.status = to;
        self.status_tx.send_replace(to);
        let _ = self.events.send(SessionEvent::StatusChanged(to));
    }

    async fn start(&self) -> Result<SessionStatus> {
        let (attempt, failed) = {
            let mut state = self.state();
            if matches!(
                state.status,
                SessionStatus::Connecting | SessionStatus::Connected
            ) {
                return Ok(state.status);
            }

            let attempt = Uuid::new_v4();
            state.attempt = Some(attempt);
            state.poll_failures = 0;
            state.last_stats = None;
            // A session left behind by `error` is replaced, never kept alongside
            let failed = state.session.take();
            self.transition(&mut state, SessionStatus::Connecting);
            (attempt, failed)
        };

        if let Some(failed) = failed {
            tracing::debug!(session_id = %failed.session_id, "discarding failed session");
            self.destroy_remote(&failed.session_id).await;
        }

        let backend = &self.collaborators.backend;
        let result = tokio::time::timeout(
            self.config.start_timeout,
            backend.create(&self.config.language),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::Session(format!(
                "session start timed out after {}s",
                self.config.start_timeout.as_secs()
            )))
        });

        let superseded = {
            let mut state = self.state();
            if state.attempt == Some(attempt) {
                state.attempt = None;
                match &result {
                    Ok(handle) => {
                        state.session = Some(TrackedSession {
                            session_id: handle.session_id.clone(),
                            started_at: Utc::now(),
                            connected_at: Instant::now(),
                        });
                        tracing::info!(
                            session_id = %handle.session_id,
                            language = handle.language.as_deref().unwrap_or(&self.config.language),
                            "session connected"
                        );
                        self.transition(&mut state, SessionStatus::Connected);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "session start failed");
                        self.transition(&mut state, SessionStatus::Error);
                    }
                }
                false
            } else {
                true
            }
        };

        if superseded {
            if let Ok(handle) = &result {
                tracing::debug!(session_id = %handle.session_id, "discarding superseded session");
                self.destroy_remote(&handle.session_id).await;
            }
            return Err(Error::SessionSuperseded);
        }

        result.map(|_| SessionStatus::Connected)
    }

    async fn end(&self) -> SessionStatus {
        let session = {
            let mut state = self.state();
            state.attempt = None;
            state.poll_failures = 0;
            let session = state.session.take();
            self.transition(&mut state, SessionStatus::Disconnected);
            session
        };

        if let Some(session) = session {
            self.destroy_remote(&session.session_id).await;
            tracing::info!(session_id = %session.session_id, "session ended");
        }

        self.stop_capture().await;
        SessionStatus::Disconnected
    }

    async fn destroy_remote(&self, session_id: &str) {
        let destroy = self.collaborators.backend.destroy(session_id);
        match tokio::time::timeout(self.config.teardown_timeout, destroy).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(session_id, error = %e, "session teardown failed"),
            Err(_) => tracing::warn!(session_id, "session teardown timed out"),
        }
    }

    async fn stop_capture(&self) {
        let handle = {
            let mut slot = self.capture_slot();
            slot.epoch = slot.epoch.wrapping_add(1);
            slot.task.take()
        };
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            tracing::info!("voice capture stopped");
        }
    }

    fn connected_session(&self) -> Option<(String, Instant)> {
        let state = self.state();
        if state.status != SessionStatus::Connected {
            return None;
        }
        state
            .session
            .as_ref()
            .map(|s| (s.session_id.clone(), s.connected_at))
    }

    /// Apply a healthy stats reply if it still matches the tracked session
    fn apply_stats(&self, session_id: &str, stats: SessionStats) -> Option<VoiceSession> {
        let mut state = self.state();
        let tracked = state
            .session
            .as_ref()
            .is_some_and(|s| s.session_id == session_id);
        if !tracked || state.status != SessionStatus::Connected {
            return None;
        }

        state.poll_failures = 0;
        state.last_stats = Some(stats.clone());
        let _ = self.events.send(SessionEvent::Stats(stats));
        self.snapshot(&state)
    }

    /// Move a still-tracked connected session to `error`
    fn fail(&self, session_id: &str, error: &Error) {
        {
            let mut state = self.state();
            let tracked = state
                .session
                .as_ref()
                .is_some_and(|s| s.session_id == session_id);
            if !tracked || state.status != SessionStatus::Connected {
                return;
            }
            self.transition(&mut state, SessionStatus::Error);
        }
        self.collaborators.reporter.report("session health", error);
    }

    async fn probe(&self) -> Option<VoiceSession> {
        let (session_id, _) = self.connected_session()?;

        match self.collaborators.backend.stats(&session_id).await {
            Ok(Some(stats)) if stats.is_active => self.apply_stats(&session_id, stats),
            Ok(_) => {
                self.fail(
                    &session_id,
                    &Error::SessionUnavailable(format!("session {session_id} is no longer active")),
                );
                None
            }
            Err(e) => {
                self.fail(&session_id, &Error::SessionUnavailable(e.to_string()));
                None
            }
        }
    }

    async fn poll_once(&self) {
        let Some((session_id, connected_at)) = self.connected_session() else {
            return;
        };

        if connected_at.elapsed() >= self.config.max_duration {
            tracing::info!(session_id = %session_id, "session reached maximum duration");
            self.end().await;
            return;
        }

        match self.collaborators.backend.stats(&session_id).await {
            Ok(Some(stats)) if stats.is_active => {
                self.apply_stats(&session_id, stats);
            }
            Ok(_) => {
                self.fail(
                    &session_id,
                    &Error::SessionUnavailable(format!("session {session_id} is no longer active")),
                );
            }
            Err(e) => {
                let failures = {
                    let mut state = self.state();
                    state.poll_failures += 1;
                    state.poll_failures
                };
                tracing::warn!(
                    session_id = %session_id,
                    failures,
                    error = %e,
                    "session health probe failed"
                );
                if failures >= self.config.max_poll_failures {
                    self.fail(
                        &session_id,
                        &Error::SessionUnavailable(format!(
                            "{failures} consecutive health probes failed: {e}"
                        )),
                    );
                }
            }
        }
    }

    async fn dispatch(&self, chunk: AudioChunk) -> Option<Transcription> {
        let c = &self.collaborators;
        match c.transcriber.transcribe(&chunk, &self.config.language).await {
            Ok(transcription) => {
                tracing::debug!(
                    chunk_id = %chunk.chunk_id,
                    chars = transcription.text.len(),
                    "chunk transcribed"
                );
                let _ = self
                    .events
                    .send(SessionEvent::Transcript(transcription.clone()));
                Some(transcription)
            }
            Err(e) => {
                c.reporter.report("transcription", &e);
                None
            }
        }
    }
}

/// Health poll; holds only a weak reference so it never outlives the manager
async fn poll_loop(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.poll_once().await;
    }
}

async fn capture_loop(inner: Weak<Inner>, mut guard: CaptureGuard) {
    while let Some(chunk) = guard.next_chunk().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match chunk {
            Ok(data) if data.is_empty() => {}
            Ok(data) => {
                inner.dispatch(AudioChunk::new(data, false)).await;
            }
            Err(e) => {
                let error = Error::Audio(AudioError::hardware(e));
                inner.collaborators.reporter.report("capture", &error);
                break;
            }
        }
    }
    guard.release();
}
