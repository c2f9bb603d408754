use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use voice_session::platform::MediaPlatform;
use voice_session::session::{
    AudioClip, HttpBackend, PlaybackSink, SessionEvent, Synthesizer, TracingReporter,
};
use voice_session::voice::{CpalPlatform, CpalPlayback, DeviceEnumerator};
use voice_session::{
    AudioAccess, Collaborators, Config, Constraints, SessionManager, error_message,
    troubleshooting_steps,
};

/// Voice Session - microphone checks and streaming voice sessions
#[derive(Parser)]
#[command(name = "voice-session", version, about)]
struct Cli {
    /// Streaming backend URL
    #[arg(long, env = "VOICE_SESSION_BACKEND_URL")]
    backend_url: Option<String>,

    /// Language hint (auto, en, zh, ...)
    #[arg(short, long, env = "VOICE_SESSION_LANGUAGE")]
    language: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio input devices
    Devices,
    /// Show a capability snapshot
    Capabilities,
    /// Request microphone access
    Permission,
    /// Check that a microphone produces audio
    TestMic {
        /// Input device name (default input if omitted)
        #[arg(short, long, env = "VOICE_SESSION_DEVICE")]
        device: Option<String>,
        /// Test duration in milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Run a streaming session and print transcripts
    Session {
        /// Stop after this many seconds (runs until Ctrl-C if omitted)
        #[arg(short, long)]
        seconds: Option<u64>,
        /// Input device name (default input if omitted)
        #[arg(short, long, env = "VOICE_SESSION_DEVICE")]
        device: Option<String>,
    },
    /// Synthesize text and play it
    Speak {
        /// Text to speak
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_session=info",
        1 => "info,voice_session=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(err) = e.downcast_ref::<voice_session::Error>() {
                print_failure(err);
            }
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.backend_url {
        config.backend.base_url = url;
    }
    if let Some(language) = cli.language {
        config.session.language = language;
    }
    tracing::debug!(?config, "loaded configuration");

    let platform: Arc<dyn MediaPlatform> = Arc::new(CpalPlatform::new(config.capture.sample_rate));

    match cli.command {
        Command::Devices => list_devices(platform).await,
        Command::Capabilities => show_capabilities(platform).await,
        Command::Permission => request_permission(platform).await,
        Command::TestMic {
            device,
            duration_ms,
        } => {
            let duration = duration_ms.map_or(config.capture.test_duration, Duration::from_millis);
            test_mic(platform, device.or(config.capture.device_id), duration).await
        }
        Command::Session { seconds, device } => {
            let device = device.or_else(|| config.capture.device_id.clone());
            run_session(platform, &config, device, seconds).await
        }
        Command::Speak { text } => speak(&config, &text).await,
    }
}

fn print_failure(err: &voice_session::Error) {
    eprintln!("{}", error_message(err));
    for (i, step) in troubleshooting_steps(err).iter().enumerate() {
        eprintln!("  {}. {step}", i + 1);
    }
}

async fn list_devices(platform: Arc<dyn MediaPlatform>) -> anyhow::Result<()> {
    let devices = DeviceEnumerator::new(platform)
        .list_audio_input_devices()
        .await
        .map_err(voice_session::Error::from)?;

    if devices.is_empty() {
        println!("No audio input devices found");
    }
    for device in devices {
        let label = if device.label.is_empty() {
            "(unnamed)"
        } else {
            &device.label
        };
        println!("{label}  [{}]", device.device_id);
    }
    Ok(())
}

async fn show_capabilities(platform: Arc<dyn MediaPlatform>) -> anyhow::Result<()> {
    let access = AudioAccess::new(platform);
    let caps = access
        .refresh_capabilities()
        .await
        .map_err(voice_session::Error::from)?;
    println!("{}", serde_json::to_string_pretty(&caps)?);
    Ok(())
}

async fn request_permission(platform: Arc<dyn MediaPlatform>) -> anyhow::Result<()> {
    let access = AudioAccess::new(platform);
    access
        .request_permission()
        .await
        .map_err(voice_session::Error::from)?;
    println!("Microphone access granted");
    Ok(())
}

async fn test_mic(
    platform: Arc<dyn MediaPlatform>,
    device: Option<String>,
    duration: Duration,
) -> anyhow::Result<()> {
    println!(
        "Testing {} for {} ms...",
        device.as_deref().unwrap_or("default microphone"),
        duration.as_millis()
    );

    let access = AudioAccess::new(platform);
    let heard = access
        .test_audio(device.as_deref(), duration)
        .await
        .map_err(voice_session::Error::from)?;

    if heard {
        println!("Microphone is working");
    } else {
        println!("No audio was captured. Check that the microphone is not muted.");
    }
    Ok(())
}

async fn run_session(
    platform: Arc<dyn MediaPlatform>,
    config: &Config,
    device: Option<String>,
    seconds: Option<u64>,
) -> anyhow::Result<()> {
    let http = Arc::new(HttpBackend::new(&config.backend)?);
    let collaborators = Collaborators {
        platform,
        backend: http.clone(),
        transcriber: http.clone(),
        synthesizer: http,
        playback: Arc::new(CpalPlayback::new()),
        reporter: Arc::new(TracingReporter),
    };

    let manager = SessionManager::new(collaborators, config.session.clone());
    let mut events = manager.subscribe();

    manager.start_session().await?;
    if let Err(e) = manager
        .start_capture(&Constraints::speech().with_device(device))
        .await
    {
        manager.dispose().await;
        return Err(e.into());
    }

    println!("Listening... press Ctrl-C to stop");

    let deadline = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = &mut deadline => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Transcript(t)) if !t.text.trim().is_empty() => {
                    println!("> {}", t.text);
                }
                Ok(SessionEvent::StatusChanged(status)) => {
                    tracing::debug!(%status, "status");
                    if status == voice_session::SessionStatus::Error {
                        eprintln!("Session lost");
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.dispose().await;
    Ok(())
}

async fn speak(config: &Config, text: &str) -> anyhow::Result<()> {
    let http = HttpBackend::new(&config.backend)?;
    let clip: AudioClip = http.synthesize(text, &config.session.language).await?;

    let playback = CpalPlayback::new();
    playback.play(clip).await?;
    Ok(())
}
