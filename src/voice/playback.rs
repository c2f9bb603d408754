//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::session::{AudioClip, PlaybackSink};
use crate::{Error, Result};

/// Decoded mono PCM
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    /// Samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Plays synthesized clips on the default output device
///
/// Only one clip plays at a time; starting a new clip or calling
/// [`PlaybackSink::stop`] halts the previous one.
#[derive(Default)]
pub struct CpalPlayback {
    current: Mutex<Option<Arc<AtomicBool>>>,
}

impl CpalPlayback {
    /// Create a playback sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn replace_current(&self, flag: Option<Arc<AtomicBool>>) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.take() {
                previous.store(true, Ordering::SeqCst);
            }
            *current = flag;
        }
    }
}

#[async_trait]
impl PlaybackSink for CpalPlayback {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        if clip.is_empty() {
            return Ok(());
        }

        let pcm = decode(&clip)?;
        let stop = Arc::new(AtomicBool::new(false));
        self.replace_current(Some(Arc::clone(&stop)));

        tokio::task::spawn_blocking(move || play_blocking(&pcm, &stop))
            .await
            .map_err(|e| Error::Playback(e.to_string()))?
    }

    fn stop(&self) {
        self.replace_current(None);
    }
}

/// Decode a clip by MIME type
///
/// # Errors
///
/// Returns error for unsupported types or malformed audio
pub fn decode(clip: &AudioClip) -> Result<Pcm> {
    match clip.mime_type.as_str() {
        "audio/mpeg" | "audio/mp3" => decode_mp3(&clip.data),
        "audio/wav" | "audio/x-wav" | "audio/wave" => decode_wav(&clip.data),
        other => Err(Error::Codec(format!("unsupported audio type: {other}"))),
    }
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Pcm> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    let scaled: Vec<f32> = chunk.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    super::capture::mono_sample(&scaled)
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Codec(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Codec("MP3 stream contains no frames".to_string()));
    }

    Ok(Pcm {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to mono f32 samples
#[allow(clippy::cast_precision_loss)]
fn decode_wav(wav_data: &[u8]) -> Result<Pcm> {
    let mut reader =
        hound::WavReader::new(Cursor::new(wav_data)).map_err(|e| Error::Codec(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Codec(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Codec(e.to_string()))?
        }
    };

    Ok(Pcm {
        samples: interleaved
            .chunks(channels)
            .map(super::capture::mono_sample)
            .collect(),
        sample_rate: spec.sample_rate,
    })
}

fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .collect();

    // Prefer mono, fall back to stereo
    configs
        .iter()
        .find(|c| c.channels() == 1)
        .or_else(|| configs.iter().find(|c| c.channels() == 2))
        .map(|c| c.clone().with_sample_rate(rate).config())
        .ok_or_else(|| Error::Playback(format!("no output config for {sample_rate} Hz")))
}

fn play_blocking(pcm: &Pcm, stop: &Arc<AtomicBool>) -> Result<()> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;
    let config = output_config(&device, pcm.sample_rate)?;
    let channels = usize::from(config.channels);

    let samples = Arc::new(pcm.samples.clone());
    let position = Arc::new(AtomicUsize::new(0));

    let callback_samples = Arc::clone(&samples);
    let callback_position = Arc::clone(&position);
    let callback_stop = Arc::clone(stop);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let halted = callback_stop.load(Ordering::SeqCst);
                for frame in data.chunks_mut(channels) {
                    let pos = callback_position.load(Ordering::Relaxed);
                    let sample = if halted {
                        0.0
                    } else {
                        callback_samples.get(pos).copied().unwrap_or(0.0)
                    };
                    frame.fill(sample);
                    if pos < callback_samples.len() {
                        callback_position.store(pos + 1, Ordering::Relaxed);
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Playback(e.to_string()))?;

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(pcm.sample_rate.max(1));
    let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

    while position.load(Ordering::Relaxed) < samples.len() && !stop.load(Ordering::SeqCst) {
        if Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    tracing::debug!(
        samples = samples.len(),
        halted = stop.load(Ordering::SeqCst),
        "playback complete"
    );

    Ok(())
}
