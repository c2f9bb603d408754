//! Shared test utilities
//!
//! Fakes for every injected contract. The platform fake counts open tracks so
//! tests can assert nothing leaks.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use voice_session::config::SessionConfig;
use voice_session::platform::{
    AudioDevice, Constraints, DeviceKind, MediaPlatform, MediaStream, PermissionState,
    PlatformError, Recorder,
};
use voice_session::session::{
    AudioChunk, AudioClip, ErrorReporter, PlaybackSink, SessionHandle, SessionStats,
    StreamingBackend, Synthesizer, Transcriber, Transcription,
};
use voice_session::{Collaborators, Error, Result, SessionManager};

/// One scripted recorder step
#[derive(Debug, Clone)]
pub enum RecorderStep {
    /// Deliver a chunk after one timeslice
    Chunk(Vec<u8>),
    /// Fail after one timeslice
    Fail(PlatformError),
    /// Never deliver anything
    Hang,
}

/// Stream-tracking fake platform
pub struct FakePlatform {
    pub capture: bool,
    pub recording: bool,
    pub permission: Mutex<Option<PermissionState>>,
    pub devices: Mutex<Vec<AudioDevice>>,
    /// Enumeration fails while permission is not granted
    pub enumerate_needs_grant: AtomicBool,
    pub enumerate_error: Mutex<Option<PlatformError>>,
    pub acquire_error: Mutex<Option<PlatformError>>,
    /// Time the device takes to open
    pub acquire_delay: Mutex<Option<Duration>>,
    pub record_error: Mutex<Option<PlatformError>>,
    pub script: Mutex<Vec<RecorderStep>>,
    pub open_tracks: Arc<AtomicUsize>,
    pub acquire_calls: AtomicUsize,
    pub enumerate_calls: AtomicUsize,
    pub recorders_stopped: Arc<AtomicUsize>,
}

impl FakePlatform {
    /// A supported platform with one microphone that yields audio
    pub fn with_microphone() -> Self {
        Self {
            capture: true,
            recording: true,
            permission: Mutex::new(Some(PermissionState::Prompt)),
            devices: Mutex::new(vec![
                AudioDevice::input("mic-1", "Built-in Microphone"),
                AudioDevice {
                    device_id: "spk-1".to_string(),
                    label: "Speakers".to_string(),
                    kind: DeviceKind::AudioOutput,
                },
            ]),
            enumerate_needs_grant: AtomicBool::new(false),
            enumerate_error: Mutex::new(None),
            acquire_error: Mutex::new(None),
            acquire_delay: Mutex::new(None),
            record_error: Mutex::new(None),
            script: Mutex::new(vec![RecorderStep::Chunk(vec![1, 2, 3, 4])]),
            open_tracks: Arc::new(AtomicUsize::new(0)),
            acquire_calls: AtomicUsize::new(0),
            enumerate_calls: AtomicUsize::new(0),
            recorders_stopped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A platform missing recording primitives
    pub fn without_recording() -> Self {
        Self {
            recording: false,
            ..Self::with_microphone()
        }
    }

    /// A platform missing capture primitives
    pub fn without_capture() -> Self {
        Self {
            capture: false,
            ..Self::with_microphone()
        }
    }

    /// A supported platform with no input hardware
    pub fn without_devices() -> Self {
        let platform = Self::with_microphone();
        platform.devices.lock().unwrap().clear();
        *platform.acquire_error.lock().unwrap() =
            Some(PlatformError::NotFound("no audio input".to_string()));
        platform
    }

    pub fn set_permission(&self, state: Option<PermissionState>) {
        *self.permission.lock().unwrap() = state;
    }

    pub fn fail_acquire(&self, error: PlatformError) {
        *self.acquire_error.lock().unwrap() = Some(error);
    }

    pub fn delay_acquire(&self, delay: Duration) {
        *self.acquire_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_record(&self, error: PlatformError) {
        *self.record_error.lock().unwrap() = Some(error);
    }

    pub fn fail_enumerate(&self, error: PlatformError) {
        *self.enumerate_error.lock().unwrap() = Some(error);
    }

    pub fn set_script(&self, steps: Vec<RecorderStep>) {
        *self.script.lock().unwrap() = steps;
    }

    pub fn open_tracks(&self) -> usize {
        self.open_tracks.load(Ordering::SeqCst)
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaPlatform for FakePlatform {
    fn supports_capture(&self) -> bool {
        self.capture
    }

    fn supports_recording(&self) -> bool {
        self.recording
    }

    async fn permission_state(&self) -> Option<PermissionState> {
        *self.permission.lock().unwrap()
    }

    fn supported_constraints(&self) -> BTreeMap<String, bool> {
        BTreeMap::from([
            ("deviceId".to_string(), true),
            ("echoCancellation".to_string(), true),
        ])
    }

    async fn enumerate(&self) -> std::result::Result<Vec<AudioDevice>, PlatformError> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.enumerate_error.lock().unwrap().clone() {
            return Err(e);
        }
        let granted = *self.permission.lock().unwrap() == Some(PermissionState::Granted);
        if self.enumerate_needs_grant.load(Ordering::SeqCst) && !granted {
            return Err(PlatformError::NotAllowed("enumeration requires permission".to_string()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn acquire(
        &self,
        constraints: &Constraints,
    ) -> std::result::Result<Box<dyn MediaStream>, PlatformError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.acquire_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.acquire_error.lock().unwrap().clone() {
            return Err(e);
        }
        if let Some(wanted) = &constraints.device_id {
            let known = self
                .devices
                .lock()
                .unwrap()
                .iter()
                .any(|d| &d.device_id == wanted);
            if !known {
                return Err(PlatformError::NotFound(wanted.clone()));
            }
        }

        // Acquiring grants permission, as a real prompt would
        self.set_permission(Some(PermissionState::Granted));
        self.open_tracks.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeStream {
            id: format!("stream-{}", self.acquire_calls()),
            device_id: constraints.device_id.clone(),
            live: AtomicBool::new(true),
            open_tracks: Arc::clone(&self.open_tracks),
            recorders_stopped: Arc::clone(&self.recorders_stopped),
            record_error: self.record_error.lock().unwrap().clone(),
            script: self.script.lock().unwrap().clone(),
        }))
    }
}

struct FakeStream {
    id: String,
    device_id: Option<String>,
    live: AtomicBool,
    open_tracks: Arc<AtomicUsize>,
    recorders_stopped: Arc<AtomicUsize>,
    record_error: Option<PlatformError>,
    script: Vec<RecorderStep>,
}

impl MediaStream for FakeStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        // Only an explicit stop releases the track, so leaks stay visible
        if self.live.swap(false, Ordering::SeqCst) {
            self.open_tracks.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn record(&self, timeslice: Duration) -> std::result::Result<Box<dyn Recorder>, PlatformError> {
        if let Some(e) = self.record_error.clone() {
            return Err(e);
        }
        Ok(Box::new(FakeRecorder {
            steps: self.script.clone().into(),
            timeslice,
            stopped: false,
            stop_count: Arc::clone(&self.recorders_stopped),
        }))
    }
}

struct FakeRecorder {
    steps: VecDeque<RecorderStep>,
    timeslice: Duration,
    stopped: bool,
    stop_count: Arc<AtomicUsize>,
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn next_chunk(&mut self) -> Option<std::result::Result<Vec<u8>, PlatformError>> {
        if self.stopped {
            return None;
        }
        match self.steps.pop_front()? {
            RecorderStep::Chunk(data) => {
                tokio::time::sleep(self.timeslice).await;
                Some(Ok(data))
            }
            RecorderStep::Fail(e) => {
                tokio::time::sleep(self.timeslice).await;
                Some(Err(e))
            }
            RecorderStep::Hang => std::future::pending().await,
        }
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stop_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Scripted reply to a stats query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsReply {
    Active,
    Inactive,
    Missing,
    Fail,
}

/// Scripted streaming backend
#[derive(Default)]
pub struct ScriptedBackend {
    pub create_delay: Mutex<Option<Duration>>,
    pub create_failures: Mutex<VecDeque<String>>,
    pub stats_script: Mutex<VecDeque<StatsReply>>,
    /// Reply once the script is exhausted
    pub stats_default: Mutex<Option<StatsReply>>,
    pub destroy_fails: AtomicBool,
    pub created: Mutex<Vec<String>>,
    pub destroyed: Mutex<Vec<String>>,
    pub stats_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay_create(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_next_create(&self, message: &str) {
        self.create_failures
            .lock()
            .unwrap()
            .push_back(message.to_string());
    }

    pub fn script_stats(&self, replies: &[StatsReply]) {
        self.stats_script.lock().unwrap().extend(replies);
    }

    pub fn set_stats_default(&self, reply: StatsReply) {
        *self.stats_default.lock().unwrap() = Some(reply);
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingBackend for ScriptedBackend {
    async fn create(&self, language: &str) -> Result<SessionHandle> {
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.create_failures.lock().unwrap().pop_front();
        if let Some(message) = failure {
            return Err(Error::Session(message));
        }

        let mut created = self.created.lock().unwrap();
        let session_id = format!("session-{}", created.len() + 1);
        created.push(session_id.clone());
        Ok(SessionHandle {
            session_id,
            language: Some(language.to_string()),
            websocket_url: None,
        })
    }

    async fn stats(&self, session_id: &str) -> Result<Option<SessionStats>> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.stats_script.lock().unwrap().pop_front();
        let reply = scripted
            .or(*self.stats_default.lock().unwrap())
            .unwrap_or(StatsReply::Active);

        let stats = |is_active| SessionStats {
            session_id: session_id.to_string(),
            is_active,
            created_at: 0.0,
            last_activity: 0.0,
            language: None,
            conversation_entries: 0,
            buffer_chunks: 0,
            buffer_size: 0,
            pending_transcriptions: 0,
            pending_responses: 0,
        };

        match reply {
            StatsReply::Active => Ok(Some(stats(true))),
            StatsReply::Inactive => Ok(Some(stats(false))),
            StatsReply::Missing => Ok(None),
            StatsReply::Fail => Err(Error::Session("stats unavailable".to_string())),
        }
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        self.destroyed.lock().unwrap().push(session_id.to_string());
        if self.destroy_fails.load(Ordering::SeqCst) {
            return Err(Error::Session("network down".to_string()));
        }
        Ok(())
    }
}

/// Transcriber that records chunk ids
#[derive(Default)]
pub struct RecordingTranscriber {
    pub fail: AtomicBool,
    pub chunks: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Transcriber for RecordingTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk, language: &str) -> Result<Transcription> {
        self.chunks
            .lock()
            .unwrap()
            .push((chunk.chunk_id.clone(), language.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transcription("model offline".to_string()));
        }
        Ok(Transcription {
            text: format!("heard {} bytes", chunk.data.len()),
            language: Some(language.to_string()),
            confidence: Some(0.9),
        })
    }
}

/// Synthesizer that records requested text
#[derive(Default)]
pub struct RecordingSynthesizer {
    pub fail: AtomicBool,
    pub texts: Mutex<Vec<String>>,
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<AudioClip> {
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Synthesis("voice unavailable".to_string()));
        }
        Ok(AudioClip {
            data: text.as_bytes().to_vec(),
            mime_type: "audio/mpeg".to_string(),
        })
    }
}

/// Playback sink that records clips and stop calls
#[derive(Default)]
pub struct RecordingPlayback {
    pub played: Mutex<Vec<AudioClip>>,
    pub stops: AtomicUsize,
}

#[async_trait]
impl PlaybackSink for RecordingPlayback {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        self.played.lock().unwrap().push(clip);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reporter that records `(context, message)` pairs
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(String, String)>>,
}

impl RecordingReporter {
    pub fn contexts(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, context: &str, error: &Error) {
        self.reports
            .lock()
            .unwrap()
            .push((context.to_string(), error.to_string()));
    }
}

/// Every fake wired into one manager
pub struct Harness {
    pub platform: Arc<FakePlatform>,
    pub backend: Arc<ScriptedBackend>,
    pub transcriber: Arc<RecordingTranscriber>,
    pub synthesizer: Arc<RecordingSynthesizer>,
    pub playback: Arc<RecordingPlayback>,
    pub reporter: Arc<RecordingReporter>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            platform: Arc::new(FakePlatform::with_microphone()),
            backend: Arc::new(ScriptedBackend::new()),
            transcriber: Arc::new(RecordingTranscriber::default()),
            synthesizer: Arc::new(RecordingSynthesizer::default()),
            playback: Arc::new(RecordingPlayback::default()),
            reporter: Arc::new(RecordingReporter::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            platform: self.platform.clone(),
            backend: self.backend.clone(),
            transcriber: self.transcriber.clone(),
            synthesizer: self.synthesizer.clone(),
            playback: self.playback.clone(),
            reporter: self.reporter.clone(),
        }
    }

    pub fn manager(&self) -> SessionManager {
        self.manager_with(SessionConfig::default())
    }

    pub fn manager_with(&self, config: SessionConfig) -> SessionManager {
        SessionManager::new(self.collaborators(), config)
    }
}

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
