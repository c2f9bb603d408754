//! Audio capture from microphone
//!
//! [`CpalPlatform`] implements the platform capability set on top of cpal.
//! cpal streams are not `Send`, so every opened stream lives on its own
//! thread and hands samples back through a shared buffer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio::sync::oneshot;

use crate::platform::{
    AudioDevice, Constraints, MediaPlatform, MediaStream, PermissionState, PlatformError, Recorder,
};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Captures audio through the default cpal host
pub struct CpalPlatform {
    preferred_rate: u32,
}

impl Default for CpalPlatform {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}

impl CpalPlatform {
    /// Create a platform that prefers `preferred_rate` when opening streams
    #[must_use]
    pub fn new(preferred_rate: u32) -> Self {
        Self { preferred_rate }
    }

    fn stream_config(
        &self,
        device: &Device,
        constraints: &Constraints,
    ) -> std::result::Result<StreamConfig, PlatformError> {
        let rate = constraints.sample_rate.unwrap_or(self.preferred_rate);
        let channels = constraints.channel_count.unwrap_or(1);

        let supported = device
            .supported_input_configs()
            .map_err(map_configs_error)?
            .find(|c| {
                c.channels() == channels
                    && c.min_sample_rate() <= SampleRate(rate)
                    && c.max_sample_rate() >= SampleRate(rate)
            });

        if let Some(config) = supported {
            return Ok(config.with_sample_rate(SampleRate(rate)).config());
        }

        // An explicit sample rate is a hard requirement, anything else falls
        // back to the device default and is downmixed in the callback
        if constraints.sample_rate.is_some() {
            return Err(PlatformError::Overconstrained {
                constraint: "sampleRate".to_string(),
            });
        }

        device
            .default_input_config()
            .map(|c| c.config())
            .map_err(|e| match e {
                cpal::DefaultStreamConfigError::DeviceNotAvailable => {
                    PlatformError::NotFound(e.to_string())
                }
                cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                    PlatformError::NotSupported(e.to_string())
                }
                cpal::DefaultStreamConfigError::BackendSpecific { .. } => {
                    PlatformError::NotReadable(e.to_string())
                }
            })
    }
}

#[async_trait]
impl MediaPlatform for CpalPlatform {
    fn supports_capture(&self) -> bool {
        !cpal::available_hosts().is_empty()
    }

    fn supports_recording(&self) -> bool {
        // Recording is WAV packaging of captured samples, always present
        true
    }

    async fn permission_state(&self) -> Option<PermissionState> {
        // cpal exposes no permission registry
        None
    }

    fn supported_constraints(&self) -> BTreeMap<String, bool> {
        [
            ("deviceId", true),
            ("sampleRate", true),
            ("channelCount", true),
            ("echoCancellation", false),
            ("noiseSuppression", false),
            ("autoGainControl", false),
        ]
        .into_iter()
        .map(|(name, supported)| (name.to_string(), supported))
        .collect()
    }

    async fn enumerate(&self) -> std::result::Result<Vec<AudioDevice>, PlatformError> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|e| PlatformError::Other(e.to_string()))?;

        Ok(devices
            .filter_map(|d| d.name().ok())
            .map(|name| AudioDevice::input(name.clone(), name))
            .collect())
    }

    async fn acquire(
        &self,
        constraints: &Constraints,
    ) -> std::result::Result<Box<dyn MediaStream>, PlatformError> {
        let device = find_device(constraints.device_id.as_deref())?;
        let config = self.stream_config(&device, constraints)?;
        let device_name = device.name().ok();

        let stream = CpalStream::open(device, config, device_name).await?;
        Ok(Box::new(stream))
    }
}

fn find_device(device_id: Option<&str>) -> std::result::Result<Device, PlatformError> {
    let host = cpal::default_host();
    match device_id {
        None => host
            .default_input_device()
            .ok_or_else(|| PlatformError::NotFound("no input device available".to_string())),
        Some(id) => host
            .input_devices()
            .map_err(|e| PlatformError::NotReadable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|name| name == id))
            .ok_or_else(|| PlatformError::NotFound(format!("input device {id}"))),
    }
}

fn map_configs_error(e: cpal::SupportedStreamConfigsError) -> PlatformError {
    match e {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            PlatformError::NotFound(e.to_string())
        }
        cpal::SupportedStreamConfigsError::InvalidArgument => {
            PlatformError::Other(e.to_string())
        }
        cpal::SupportedStreamConfigsError::BackendSpecific { .. } => {
            PlatformError::NotReadable(e.to_string())
        }
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> PlatformError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => PlatformError::NotFound(e.to_string()),
        cpal::BuildStreamError::StreamConfigNotSupported => PlatformError::Overconstrained {
            constraint: "streamConfig".to_string(),
        },
        cpal::BuildStreamError::BackendSpecific { .. } => PlatformError::NotReadable(e.to_string()),
        cpal::BuildStreamError::InvalidArgument | cpal::BuildStreamError::StreamIdOverflow => {
            PlatformError::Other(e.to_string())
        }
    }
}

/// An input stream running on a dedicated thread
struct CpalStream {
    id: String,
    device_id: Option<String>,
    sample_rate: u32,
    buffer: Arc<Mutex<Vec<f32>>>,
    live: Arc<AtomicBool>,
    /// Driver failure that ended the stream
    fault: Arc<Mutex<Option<PlatformError>>>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalStream {
    async fn open(
        device: Device,
        config: StreamConfig,
        device_id: Option<String>,
    ) -> std::result::Result<Self, PlatformError> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let live = Arc::new(AtomicBool::new(false));
        let fault = Arc::new(Mutex::new(None));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_buffer = Arc::clone(&buffer);
        let thread_live = Arc::clone(&live);
        let thread_fault = Arc::clone(&fault);
        let channels = usize::from(config.channels);
        let sample_rate = config.sample_rate.0;

        std::thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let callback_buffer = Arc::clone(&thread_buffer);
                let error_live = Arc::clone(&thread_live);
                let built = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buf) = callback_buffer.lock() {
                            // Downmix interleaved frames to mono
                            buf.extend(data.chunks(channels).map(mono_sample));
                        }
                    },
                    move |err| {
                        tracing::error!(error = %err, "audio capture error");
                        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                            if let Ok(mut fault) = thread_fault.lock() {
                                if fault.is_none() {
                                    *fault = Some(PlatformError::Aborted(err.to_string()));
                                }
                            }
                            error_live.store(false, Ordering::SeqCst);
                        }
                    },
                    None,
                );

                let stream = match built {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_build_error(e)));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PlatformError::Aborted(e.to_string())));
                    return;
                }

                thread_live.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                // Park until stopped or the owning handle is dropped
                let _ = stop_rx.recv();
                thread_live.store(false, Ordering::SeqCst);
                drop(stream);
                tracing::debug!("audio capture stopped");
            })
            .map_err(|e| PlatformError::Other(e.to_string()))?;

        ready_rx
            .await
            .map_err(|_| PlatformError::Aborted("capture thread exited".to_string()))??;

        let id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(
            stream = %id,
            device = device_id.as_deref().unwrap_or("default"),
            sample_rate,
            channels,
            "audio capture started"
        );

        Ok(Self {
            id,
            device_id,
            sample_rate,
            buffer,
            live,
            fault,
            stop_tx: Mutex::new(Some(stop_tx)),
        })
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn mono_sample(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().sum::<f32>() / frame.len() as f32
}

impl MediaStream for CpalStream {
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
        let sender = self.stop_tx.lock().ok().and_then(|mut tx| tx.take());
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
        self.live.store(false, Ordering::SeqCst);
    }

    fn record(&self, timeslice: Duration) -> std::result::Result<Box<dyn Recorder>, PlatformError> {
        if !self.is_live() {
            return Err(PlatformError::Aborted("stream is not live".to_string()));
        }

        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }

        Ok(Box::new(WavRecorder::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.live),
            Arc::clone(&self.fault),
            self.sample_rate,
            timeslice,
        )))
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Packages captured samples into one WAV chunk per timeslice
struct WavRecorder {
    buffer: Arc<Mutex<Vec<f32>>>,
    live: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<PlatformError>>>,
    sample_rate: u32,
    interval: tokio::time::Interval,
    stopped: bool,
}

impl WavRecorder {
    fn new(
        buffer: Arc<Mutex<Vec<f32>>>,
        live: Arc<AtomicBool>,
        fault: Arc<Mutex<Option<PlatformError>>>,
        sample_rate: u32,
        timeslice: Duration,
    ) -> Self {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + timeslice, timeslice);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self {
            buffer,
            live,
            fault,
            sample_rate,
            interval,
            stopped: false,
        }
    }
}

#[async_trait]
impl Recorder for WavRecorder {
    async fn next_chunk(&mut self) -> Option<std::result::Result<Vec<u8>, PlatformError>> {
        if self.stopped {
            return None;
        }

        self.interval.tick().await;

        if self.stopped {
            return None;
        }

        if !self.live.load(Ordering::SeqCst) {
            self.stopped = true;
            // Device loss is reported once; a plain stop ends quietly
            let fault = self.fault.lock().ok().and_then(|mut f| f.take());
            return fault.map(Err);
        }

        let samples = self
            .buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        if samples.is_empty() {
            return Some(Ok(Vec::new()));
        }

        Some(
            samples_to_wav(&samples, self.sample_rate)
                .map_err(|e| PlatformError::Aborted(e.to_string())),
        )
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Codec(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Codec(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| Error::Codec(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        assert!((mono_sample(&[0.5, -0.5]) - 0.0).abs() < f32::EPSILON);
        assert!((mono_sample(&[0.4]) - 0.4).abs() < f32::EPSILON);
        assert!(mono_sample(&[]).abs() < f32::EPSILON);
    }

    fn recorder(live: bool, fault: Option<PlatformError>) -> WavRecorder {
        WavRecorder::new(
            Arc::new(Mutex::new(vec![0.25; 160])),
            Arc::new(AtomicBool::new(live)),
            Arc::new(Mutex::new(fault)),
            SAMPLE_RATE,
            Duration::from_millis(100),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn recorder_emits_wav_chunk_per_timeslice() {
        let mut recorder = recorder(true, None);
        let chunk = recorder.next_chunk().await.unwrap().unwrap();
        assert_eq!(&chunk[0..4], b"RIFF");

        // Buffer was drained by the first chunk
        assert!(recorder.next_chunk().await.unwrap().unwrap().is_empty());

        recorder.stop();
        assert!(recorder.next_chunk().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn device_loss_surfaces_once_then_ends() {
        let mut recorder = recorder(
            false,
            Some(PlatformError::Aborted("device not available".to_string())),
        );

        let first = recorder.next_chunk().await;
        assert!(matches!(first, Some(Err(PlatformError::Aborted(_)))));
        assert!(recorder.next_chunk().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_stream_ends_without_error() {
        let mut recorder = recorder(false, None);
        assert!(recorder.next_chunk().await.is_none());
    }

    #[test]
    fn cpal_constraints_advertise_device_selection() {
        let platform = CpalPlatform::default();
        let constraints = platform.supported_constraints();
        assert_eq!(constraints.get("deviceId"), Some(&true));
        assert_eq!(constraints.get("noiseSuppression"), Some(&false));
    }
}
