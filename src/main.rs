//! Application entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (defaults on first run).
//! 3. Open storage, the microphone and the speaker (falling back to an
//!    unavailable device so the console still works without audio hardware).
//! 4. Build the TLS connector, speech clients and the optional AI generator.
//! 5. Spawn the stdin reader thread.
//! 6. Run the command loop until stdin closes.

use std::io::Read;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use talkbox::{
    ai::{BlockingGenerator, GenerativeApiClient},
    audio::{AudioSink, AudioSource, CpalMicrophone, CpalSpeaker, UnavailableDevice},
    clock::SystemClock,
    config::AppConfig,
    net::{Connector, SynthesisClient, TlsConnector, TranscriptionClient},
    router::{DigitalOutput, FileLine, LogLine},
    session::{Command, Controller, Peripherals, Services, SessionState, SessionTracker, StopOutcome},
    storage::Storage,
};

/// How long the loop waits for a key when nothing is recording.
const IDLE_POLL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Input thread
// ---------------------------------------------------------------------------

/// Forward stdin bytes to the command loop.
///
/// `q` during playback and `x` during a recording only raise the session's
/// stop flag; playback notices it inside the blocking call and the recording
/// on the loop's next tick.
fn spawn_input_reader(tracker: SessionTracker) -> anyhow::Result<mpsc::Receiver<u8>> {
    let (tx, rx) = mpsc::channel::<u8>();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for byte in stdin.lock().bytes() {
                let byte = match byte {
                    Ok(b) => b,
                    Err(e) => {
                        log::error!("stdin read failed: {e}");
                        break;
                    }
                };
                let stop = match byte.to_ascii_lowercase() {
                    b'q' => Some(SessionState::Playing),
                    b'x' => Some(SessionState::Recording),
                    _ => None,
                };
                if let Some(state) = stop {
                    if tracker.request_stop(state) == StopOutcome::Signalled {
                        log::debug!("stop requested for {state}");
                        if state == SessionState::Playing {
                            println!("Stopping playback...");
                        }
                        continue;
                    }
                }
                if tx.send(byte).is_err() {
                    break;
                }
            }
            log::debug!("stdin closed");
        })
        .context("failed to spawn stdin thread")?;
    Ok(rx)
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("talkbox starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Storage and audio devices
    let storage = Storage::open(config.storage.resolved_root())?;
    log::info!("storage root: {}", storage.root().display());

    let format = config.audio.format();
    let microphone: Box<dyn AudioSource> = match CpalMicrophone::open(format) {
        Ok(mic) => {
            log::info!(
                "microphone open ({} Hz, {} ch native)",
                mic.device_rate(),
                mic.device_channels()
            );
            Box::new(mic)
        }
        Err(e) => {
            log::warn!("Microphone unavailable: {e}");
            Box::new(UnavailableDevice::new(e.to_string()))
        }
    };
    let speaker: Box<dyn AudioSink> = match CpalSpeaker::open(format) {
        Ok(speaker) => Box::new(speaker),
        Err(e) => {
            log::warn!("Speaker unavailable: {e}");
            Box::new(UnavailableDevice::new(e.to_string()))
        }
    };
    let line: Box<dyn DigitalOutput> = match &config.router.output_path {
        Some(path) => Box::new(FileLine::new(config.router.line_name.clone(), path.clone())),
        None => Box::new(LogLine::new(config.router.line_name.clone())),
    };

    // 4. Services
    let connector: Arc<dyn Connector> = Arc::new(TlsConnector::new()?);
    let generator = if config.ai.enabled {
        match BlockingGenerator::new(Arc::new(GenerativeApiClient::from_config(&config.ai))) {
            Ok(generator) => Some(generator),
            Err(e) => {
                log::warn!("AI replies disabled: {e}");
                None
            }
        }
    } else {
        None
    };
    if config.transcription.api_key.is_empty() {
        log::warn!("no transcription api_key configured; requests will be rejected");
    }

    let tracker = SessionTracker::new();
    let mut controller = Controller::new(
        &config,
        storage,
        Arc::new(SystemClock::new()),
        tracker.clone(),
        Peripherals {
            microphone,
            speaker,
            line,
        },
        Services {
            transcriber: TranscriptionClient::new(config.transcription.clone(), Arc::clone(&connector)),
            synthesizer: SynthesisClient::new(config.synthesis.clone(), connector),
            generator,
        },
        Box::new(std::io::stdout()),
    )?;

    // 5. Input
    let input = spawn_input_reader(tracker)?;

    // 6. Command loop
    println!("talkbox ready");
    print!("{}", Command::help_text());
    loop {
        let wait = if controller.is_recording() {
            Duration::ZERO
        } else {
            IDLE_POLL
        };
        match input.recv_timeout(wait) {
            Ok(byte) => controller.handle_input(byte),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        controller.tick();
    }

    if controller.is_recording() {
        if let Err(e) = controller.stop_recording() {
            log::error!("failed to finish recording on exit: {e}");
        }
    }
    log::info!("talkbox shutting down");
    Ok(())
}
