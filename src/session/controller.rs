//! Session controller: turns operator commands into audio, storage and
//! network work.
//!
//! # Command flow
//!
//! ```text
//! s ─▶ begin(Recording) ─▶ tick() … step block … ─▶ x / limit ─▶ patch header
//! p ─▶ begin(Playing)   ─▶ latest audio_<ms>.wav ─▶ speaker until end / q
//! r ─▶ begin(Transcribing)
//!        └─▶ upload latest recording ─▶ transcript
//!              ├─ empty          → stop
//!              ├─ keyword match  → drive output line, stop
//!              └─ otherwise      → AI reply
//!                    └─▶ Synthesizing ─▶ tts_<ms>.wav ─▶ Playing (autoplay)
//! ```
//!
//! Every activity holds an [`ActivityGuard`] for exactly as long as it runs,
//! so an error anywhere drops the guard and the session is back at `Idle`
//! when the call returns.
//!
//! Operator-facing text goes to the `console` writer; diagnostics go through
//! `log`.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::BlockingGenerator;
use crate::audio::{
    play_from_storage, play_tone, AudioFormat, AudioSink, AudioSource, Capture, CaptureConfig,
    LevelMeter, ToneConfig, HEADER_LEN,
};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::net::{SynthesisClient, TranscriptionClient};
use crate::router::{CommandRouter, DigitalOutput, Level, Routed};
use crate::storage::{Storage, StorageError, RECORDING_PREFIX};

use super::command::Command;
use super::state::{ActivityGuard, SessionError, SessionState, SessionTracker, StopOutcome};
use super::ApplianceError;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Local hardware the controller drives.
pub struct Peripherals {
    pub microphone: Box<dyn AudioSource>,
    pub speaker: Box<dyn AudioSink>,
    pub line: Box<dyn DigitalOutput>,
}

/// Remote services.  `generator` is `None` when AI replies are disabled.
pub struct Services {
    pub transcriber: TranscriptionClient,
    pub synthesizer: SynthesisClient,
    pub generator: Option<BlockingGenerator>,
}

/// A recording in progress.  The guard keeps the session in `Recording`.
struct Recorder {
    capture: Capture<File>,
    name: String,
    guard: ActivityGuard,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    format: AudioFormat,
    capture: CaptureConfig,
    tone: ToneConfig,
    delete_confirm: Duration,

    storage: Storage,
    clock: Arc<dyn Clock>,
    tracker: SessionTracker,

    microphone: Box<dyn AudioSource>,
    speaker: Box<dyn AudioSink>,
    line: Box<dyn DigitalOutput>,
    meter: LevelMeter,
    idle_buf: Vec<i16>,
    recorder: Option<Recorder>,

    transcriber: TranscriptionClient,
    synthesizer: SynthesisClient,
    generator: Option<BlockingGenerator>,
    router: CommandRouter,

    /// Most recent synthesized reply, replayed by `v`.
    last_reply: Option<String>,
    /// Deadline for the `y` that confirms a pending delete-all.
    pending_delete: Option<Duration>,
    console: Box<dyn Write>,
}

impl Controller {
    /// Wire up a controller.  Fails only if the trigger rules are invalid.
    pub fn new(
        config: &AppConfig,
        storage: Storage,
        clock: Arc<dyn Clock>,
        tracker: SessionTracker,
        peripherals: Peripherals,
        services: Services,
        console: Box<dyn Write>,
    ) -> Result<Self, ApplianceError> {
        let audio = &config.audio;
        let format = audio.format();
        let router = CommandRouter::new(config.router.rules.clone())?;

        Ok(Self {
            format,
            capture: CaptureConfig {
                block_samples: audio.block_samples,
                duration_limit: audio.record_limit(),
                read_timeout: audio.read_timeout(),
            },
            tone: ToneConfig {
                frequency_hz: audio.tone_frequency_hz,
                amplitude: audio.tone_amplitude,
                duration: audio.tone_duration(),
                block_samples: audio.block_samples,
                sample_rate_hz: format.sample_rate_hz,
            },
            delete_confirm: Duration::from_secs(config.storage.delete_confirm_secs),
            storage,
            clock,
            tracker,
            microphone: peripherals.microphone,
            speaker: peripherals.speaker,
            line: peripherals.line,
            meter: LevelMeter::new(audio.meter_interval()),
            idle_buf: vec![0; audio.block_samples.max(1)],
            recorder: None,
            transcriber: services.transcriber,
            synthesizer: services.synthesizer,
            generator: services.generator,
            router,
            last_reply: None,
            pending_delete: None,
            console,
        })
    }

    pub fn state(&self) -> SessionState {
        self.tracker.current()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.last_reply.as_deref()
    }

    pub fn line_level(&self) -> Option<Level> {
        self.line.level()
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.console, "{line}") {
            log::warn!("console write failed: {e}");
        }
    }

    fn report(&mut self, what: &str, result: Result<(), ApplianceError>) {
        if let Err(e) = result {
            log::error!("{what} failed: {e}");
            self.say(&format!("ERROR: {e}"));
        }
    }

    // -----------------------------------------------------------------------
    // Input dispatch
    // -----------------------------------------------------------------------

    /// Feed one byte from the operator stream.
    ///
    /// While a delete-all is waiting for confirmation the next non-blank
    /// byte answers it instead of being parsed as a command.
    pub fn handle_input(&mut self, byte: u8) {
        if byte.is_ascii_whitespace() {
            return;
        }
        if let Some(deadline) = self.pending_delete.take() {
            if self.clock.now() <= deadline {
                if byte.eq_ignore_ascii_case(&b'y') {
                    let result = self.delete_all();
                    self.report("delete-all", result);
                } else {
                    self.say("Operation cancelled");
                }
                return;
            }
            self.say("Timeout - operation cancelled");
        }
        match Command::from_byte(byte) {
            Some(command) => self.handle(command),
            None => self.say(&format!("Unknown command '{}' (h for help)", byte as char)),
        }
    }

    /// Run one command, reporting any failure as a single status line.
    pub fn handle(&mut self, command: Command) {
        log::debug!("command {command:?} in state {}", self.state());
        let result = match command {
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => self.stop_recording().map(|_| ()),
            Command::List => self.list_files(),
            Command::PlayLatest => self.play_latest(),
            Command::StopPlayback => {
                self.stop_playback();
                Ok(())
            }
            Command::Tone => self.play_test_tone(),
            Command::DeleteAll => self.request_delete_all(),
            Command::Respond => self.respond(),
            Command::ReplayReply => self.replay_reply(),
            Command::Help => {
                let help = Command::help_text();
                self.say(help.trim_end());
                Ok(())
            }
        };
        self.report(command.description(), result);
    }

    /// One pass of the main loop: advance a recording by one block, or meter
    /// the microphone while idle.
    pub fn tick(&mut self) {
        let result = self.advance();
        self.report("tick", result);
    }

    fn advance(&mut self) -> Result<(), ApplianceError> {
        if self
            .pending_delete
            .is_some_and(|deadline| self.clock.now() > deadline)
        {
            self.pending_delete = None;
            self.say("Timeout - operation cancelled");
        }

        let Some(recorder) = self.recorder.as_mut() else {
            self.meter_idle();
            return Ok(());
        };

        if recorder.guard.is_cancelled() {
            if let Some(recorder) = self.recorder.take() {
                self.finish_recording(recorder)?;
            }
            return Ok(());
        }

        let step = recorder
            .capture
            .step(self.microphone.as_mut(), self.clock.as_ref(), &mut self.meter);
        let report = match step {
            Ok(report) => report,
            Err(e) => {
                if let Some(recorder) = self.recorder.take() {
                    log::warn!("abandoning {} after capture failure", recorder.name);
                }
                return Err(e.into());
            }
        };

        if let Some(reading) = report.level {
            self.say(&reading.render());
        }
        if report.limit_reached {
            if let Some(recorder) = self.recorder.take() {
                self.say("Recording time limit reached");
                self.finish_recording(recorder)?;
            }
        }
        Ok(())
    }

    fn meter_idle(&mut self) {
        if self.tracker.current().is_busy() {
            return;
        }
        match self
            .microphone
            .read_block(&mut self.idle_buf, self.capture.read_timeout)
        {
            Ok(0) => {}
            Ok(n) => {
                let now = self.clock.now();
                if let Some(reading) = self.meter.observe(&self.idle_buf[..n], now, false) {
                    self.say(&reading.render());
                }
            }
            Err(e) => log::debug!("idle metering skipped: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    pub fn start_recording(&mut self) -> Result<(), ApplianceError> {
        let guard = self.tracker.begin(SessionState::Recording)?;
        let (name, file) = self
            .storage
            .create_stamped(RECORDING_PREFIX, self.clock.millis())?;
        // Audio queued before the command belongs to the idle meter.
        self.microphone.discard_pending();
        let capture = match Capture::start(file, self.format, self.capture, self.clock.now()) {
            Ok(capture) => capture,
            Err(e) => {
                if let Err(cleanup) = self.storage.remove(&name) {
                    log::warn!("could not remove {name}: {cleanup}");
                }
                return Err(e.into());
            }
        };

        log::info!("recording to {name}");
        self.say(&format!("Recording started: {name}"));
        self.say(&format!(
            "Recording for {} seconds... (x to stop)",
            self.capture.duration_limit.as_secs()
        ));
        self.recorder = Some(Recorder {
            capture,
            name,
            guard,
        });
        Ok(())
    }

    /// Stop the current recording.  Reports `NotActive` if there is none.
    pub fn stop_recording(&mut self) -> Result<StopOutcome, ApplianceError> {
        match self.recorder.take() {
            Some(recorder) => {
                self.finish_recording(recorder)?;
                Ok(StopOutcome::Signalled)
            }
            None => {
                self.say("Not recording!");
                Ok(StopOutcome::NotActive)
            }
        }
    }

    fn finish_recording(&mut self, recorder: Recorder) -> Result<(), ApplianceError> {
        let Recorder {
            capture,
            name,
            guard,
        } = recorder;
        let summary = capture.finish(self.clock.as_ref());
        drop(guard);
        let summary = summary?;

        log::info!("{name}: {} bytes in {} blocks", summary.bytes, summary.blocks);
        self.say(&format!(
            "Recording stopped. Duration: {} seconds",
            summary.elapsed.as_secs()
        ));
        self.say(&format!("Saved {name} ({} bytes of audio)", summary.bytes));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    pub fn play_latest(&mut self) -> Result<(), ApplianceError> {
        let guard = self.tracker.begin(SessionState::Playing)?;
        let name = match self.storage.latest_recording() {
            Ok(name) => name,
            Err(StorageError::NoRecordings) => {
                self.say("No audio files found!");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.play_file(&name, &guard)
    }

    pub fn replay_reply(&mut self) -> Result<(), ApplianceError> {
        let guard = self.tracker.begin(SessionState::Playing)?;
        let Some(name) = self.last_reply.clone() else {
            self.say("No synthesized reply yet");
            return Ok(());
        };
        if !self.storage.exists(&name) {
            self.last_reply = None;
            self.say(&format!("{name} no longer exists"));
            return Ok(());
        }
        self.play_file(&name, &guard)
    }

    fn play_file(&mut self, name: &str, guard: &ActivityGuard) -> Result<(), ApplianceError> {
        let size = self.storage.size_of(name)?;
        let mut file = self.storage.open_read(name)?;
        self.say(&format!("Playing: {name}"));
        self.say(&format!("File size: {size} bytes"));

        let summary = play_from_storage(
            &mut file,
            self.speaker.as_mut(),
            HEADER_LEN as u64,
            self.capture.block_samples,
            self.clock.as_ref(),
            &|| guard.is_cancelled(),
        )?;
        log::debug!("{name}: played {} bytes", summary.bytes);
        if summary.stopped_early {
            self.say("Playback stopped!");
        } else {
            self.say("Playback finished!");
        }
        Ok(())
    }

    /// Ask a running playback or tone to stop at its next block.
    pub fn stop_playback(&mut self) -> StopOutcome {
        let outcome = self.tracker.request_stop(SessionState::Playing);
        match outcome {
            StopOutcome::Signalled => self.say("Stopping playback..."),
            StopOutcome::NotActive => self.say("Not playing!"),
        }
        outcome
    }

    pub fn play_test_tone(&mut self) -> Result<(), ApplianceError> {
        let guard = self.tracker.begin(SessionState::Playing)?;
        self.say(&format!(
            "Playing {:.0} Hz test tone for {} seconds...",
            self.tone.frequency_hz,
            self.tone.duration.as_secs()
        ));
        let summary = play_tone(
            self.speaker.as_mut(),
            &self.tone,
            self.clock.as_ref(),
            &|| guard.is_cancelled(),
        )?;
        if summary.stopped_early {
            self.say("Test tone stopped!");
        } else {
            self.say("Test tone finished!");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Storage maintenance
    // -----------------------------------------------------------------------

    pub fn list_files(&mut self) -> Result<(), ApplianceError> {
        let files = self.storage.list()?;
        self.say("Files on storage:");
        if files.is_empty() {
            self.say("  (none)");
            return Ok(());
        }
        let mut total = 0u64;
        for file in &files {
            self.say(&format!("  {} ({} bytes)", file.name, file.size));
            total += file.size;
        }
        self.say(&format!("{} file(s), {total} bytes", files.len()));
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), ApplianceError> {
        let active = self.tracker.current();
        if active.is_busy() {
            return Err(SessionError::Busy { active }.into());
        }
        Ok(())
    }

    /// Arm delete-all; the next input byte confirms (`y`) or cancels it.
    pub fn request_delete_all(&mut self) -> Result<(), ApplianceError> {
        self.ensure_idle()?;
        self.say("WARNING: This will delete ALL audio files!");
        self.say(&format!(
            "Press 'y' within {} seconds to confirm, any other key to cancel",
            self.delete_confirm.as_secs()
        ));
        self.pending_delete = Some(self.clock.now() + self.delete_confirm);
        Ok(())
    }

    fn delete_all(&mut self) -> Result<(), ApplianceError> {
        self.ensure_idle()?;
        let report = self.storage.delete_all_audio()?;

        for name in &report.removed {
            self.say(&format!("Deleted: {name}"));
        }
        for name in &report.failed {
            self.say(&format!("Failed to delete: {name}"));
        }
        if report.count() == 0 && report.failed.is_empty() {
            self.say("No audio files found to delete");
            return Ok(());
        }
        self.say(&format!("Files deleted: {}", report.count()));
        self.say(&format!(
            "Space freed: {} bytes ({:.1} KB)",
            report.bytes_freed,
            report.bytes_freed as f64 / 1024.0
        ));

        if self
            .last_reply
            .as_ref()
            .is_some_and(|name| report.removed.contains(name))
        {
            self.last_reply = None;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transcribe → route → reply
    // -----------------------------------------------------------------------

    /// Transcribe the newest recording and act on it.
    pub fn respond(&mut self) -> Result<(), ApplianceError> {
        let mut guard = self.tracker.begin(SessionState::Transcribing)?;
        let name = match self.storage.latest_recording() {
            Ok(name) => name,
            Err(StorageError::NoRecordings) => {
                self.say("No recordings to transcribe");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.say(&format!("Transcribing {name}..."));
        let transcript = self
            .transcriber
            .transcribe(&self.storage, &name, self.clock.as_ref())?;
        self.say(&format!("Transcript: \"{transcript}\""));

        let text = match self.router.dispatch(&transcript, self.line.as_mut())? {
            Routed::Empty => {
                self.say("Nothing was recognised");
                return Ok(());
            }
            Routed::Switched { keyword, level } => {
                let line = self.line.name().to_string();
                self.say(&format!("\"{keyword}\": {line} set {level}"));
                return Ok(());
            }
            Routed::Forward(text) => text,
        };

        let Some(reply) = self
            .generator
            .as_ref()
            .map(|generator| generator.generate(&text))
            .transpose()?
        else {
            self.say("AI replies are disabled");
            return Ok(());
        };
        self.say(&format!("Reply: {reply}"));

        guard.handoff(SessionState::Synthesizing)?;
        let speech = self
            .synthesizer
            .synthesize(&reply, &self.storage, self.format, self.clock.as_ref())?;
        self.say(&format!(
            "Stored reply {} ({} ms of audio)",
            speech.name,
            self.format.duration_ms(speech.payload_bytes)
        ));
        self.last_reply = Some(speech.name.clone());

        if !self.synthesizer.autoplay() {
            return Ok(());
        }
        guard.handoff(SessionState::Playing)?;
        self.play_file(&speech.name, &guard)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{MockGenerator, TextGenerator};
    use crate::audio::device::{CollectingSink, ScriptedSource};
    use crate::audio::tone::blocks_for_duration;
    use crate::audio::{DeviceError, WavHeader};
    use crate::clock::ManualClock;
    use crate::net::connection::{ScriptedConnection, ScriptedConnector, Wire};
    use crate::net::NetError;
    use crate::router::LogLine;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const STT_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n";
    const TTS_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: audio/l16\r\n\r\n";

    #[derive(Clone, Default)]
    struct Console(Arc<Mutex<Vec<u8>>>);

    impl Console {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Console {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Speaker shared with the test; optionally requests a stop after N blocks.
    struct SharedSink {
        inner: Arc<Mutex<CollectingSink>>,
        stop_after: Option<(usize, SessionTracker)>,
    }

    impl AudioSink for SharedSink {
        fn write_block(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
            let mut inner = self.inner.lock().unwrap();
            inner.write_block(samples)?;
            if let Some((n, tracker)) = &self.stop_after {
                if inner.blocks >= *n {
                    tracker.request_stop(SessionState::Playing);
                }
            }
            Ok(())
        }
    }

    struct Rig {
        controller: Controller,
        clock: ManualClock,
        tracker: SessionTracker,
        storage: Storage,
        sink: Arc<Mutex<CollectingSink>>,
        console: Console,
        _dir: TempDir,
    }

    struct Setup {
        source: ScriptedSource,
        stt: Arc<ScriptedConnector>,
        tts: Arc<ScriptedConnector>,
        generator: Option<Arc<dyn TextGenerator>>,
        stop_playback_after: Option<usize>,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                source: ScriptedSource::new(vec![]),
                stt: offline(),
                tts: offline(),
                generator: None,
                stop_playback_after: None,
            }
        }
    }

    fn offline() -> Arc<ScriptedConnector> {
        Arc::new(ScriptedConnector::new(Arc::new(Mutex::new(Wire::default())), vec![]))
    }

    fn rig(clock: &ManualClock, setup: Setup) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.root = Some(dir.path().to_path_buf());
        let storage = Storage::open(dir.path()).unwrap();
        let tracker = SessionTracker::new();
        let sink = Arc::new(Mutex::new(CollectingSink::default()));
        let console = Console::default();

        let peripherals = Peripherals {
            microphone: Box::new(setup.source),
            speaker: Box::new(SharedSink {
                inner: Arc::clone(&sink),
                stop_after: setup.stop_playback_after.map(|n| (n, tracker.clone())),
            }),
            line: Box::new(LogLine::new("light")),
        };
        let services = Services {
            transcriber: TranscriptionClient::new(config.transcription.clone(), setup.stt),
            synthesizer: SynthesisClient::new(config.synthesis.clone(), setup.tts),
            generator: setup
                .generator
                .map(|g| BlockingGenerator::new(g).unwrap()),
        };
        let controller = Controller::new(
            &config,
            storage.clone(),
            Arc::new(clock.clone()),
            tracker.clone(),
            peripherals,
            services,
            Box::new(console.clone()),
        )
        .unwrap();

        Rig {
            controller,
            clock: clock.clone(),
            tracker,
            storage,
            sink,
            console,
            _dir: dir,
        }
    }

    fn write_recording(storage: &Storage, name: &str, samples: &[i16]) {
        let file = storage.create(name).unwrap();
        let mut writer = crate::audio::WavWriter::new(file, AudioFormat::SPEECH).unwrap();
        writer.write_samples(samples).unwrap();
        writer.finalize().unwrap();
    }

    fn stt_reply(clock: &ManualClock, transcript: &str) -> ScriptedConnection {
        let mut body = STT_HEAD.to_vec();
        body.extend_from_slice(
            format!(r#"{{"results":{{"channels":[{{"alternatives":[{{"transcript":"{transcript}"}}]}}]}}}}"#)
                .as_bytes(),
        );
        ScriptedConnection::new(clock.clone(), Arc::new(Mutex::new(Wire::default())))
            .fragment(Duration::ZERO, &body)
    }

    fn tts_reply(clock: &ManualClock, wire: &Arc<Mutex<Wire>>, samples: usize) -> ScriptedConnection {
        let mut body = TTS_HEAD.to_vec();
        body.extend((0..samples as i16).flat_map(|s| s.to_le_bytes()));
        ScriptedConnection::new(clock.clone(), Arc::clone(wire))
            .fragment(Duration::ZERO, &body)
            .close_when_drained()
    }

    // -- recording ----------------------------------------------------------

    #[test]
    fn records_three_blocks_into_framed_file() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(1234));
        let mut rig = rig(
            &clock,
            Setup {
                source: ScriptedSource::counting(3, 512),
                ..Setup::default()
            },
        );

        rig.controller.start_recording().unwrap();
        assert_eq!(rig.tracker.current(), SessionState::Recording);
        for _ in 0..3 {
            rig.clock.advance(Duration::from_millis(32));
            rig.controller.tick();
        }
        assert_eq!(rig.controller.stop_recording().unwrap(), StopOutcome::Signalled);
        assert_eq!(rig.tracker.current(), SessionState::Idle);

        let bytes = std::fs::read(rig.storage.path_of("/audio_1234.wav")).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 3 * 512 * 2);
        let header = WavHeader::parse(&bytes).unwrap();
        assert_eq!(header.data_len, 3 * 512 * 2);
        assert_eq!(header.riff_len, 36 + 3 * 512 * 2);

        let out = rig.console.text();
        assert!(out.contains("Recording started: /audio_1234.wav"));
        assert!(out.contains("Recording stopped. Duration: 0 seconds"));
    }

    #[test]
    fn stopping_when_not_recording_reports_not_active() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        assert_eq!(rig.controller.stop_recording().unwrap(), StopOutcome::NotActive);
        assert_eq!(rig.tracker.current(), SessionState::Idle);
        assert!(rig.console.text().contains("Not recording!"));
    }

    #[test]
    fn recording_is_rejected_while_playing() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        let _playing = rig.tracker.begin(SessionState::Playing).unwrap();

        let err = rig.controller.start_recording().unwrap_err();
        assert!(matches!(
            err,
            ApplianceError::Session(SessionError::Busy {
                active: SessionState::Playing
            })
        ));
        assert_eq!(rig.tracker.current(), SessionState::Playing);
        assert!(rig.storage.list().unwrap().is_empty());
    }

    #[test]
    fn recording_stops_itself_at_the_limit() {
        let clock = ManualClock::new();
        let mut rig = rig(
            &clock,
            Setup {
                source: ScriptedSource::counting(5, 512),
                ..Setup::default()
            },
        );

        rig.controller.start_recording().unwrap();
        rig.controller.tick();
        assert!(rig.controller.is_recording());
        rig.clock.advance(Duration::from_millis(10_001));
        rig.controller.tick();

        assert!(!rig.controller.is_recording());
        assert_eq!(rig.tracker.current(), SessionState::Idle);
        let out = rig.console.text();
        assert!(out.contains("Recording time limit reached"));
        assert!(out.contains("Recording stopped. Duration: 10 seconds"));
        assert_eq!(
            rig.storage.size_of("/audio_0.wav").unwrap(),
            (HEADER_LEN + 2 * 512 * 2) as u64
        );
    }

    #[test]
    fn new_recording_sorts_after_files_from_earlier_runs() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(100));
        let mut rig = rig(
            &clock,
            Setup {
                source: ScriptedSource::counting(1, 512),
                ..Setup::default()
            },
        );
        write_recording(&rig.storage, "/audio_5000.wav", &[5; 64]);

        rig.controller.start_recording().unwrap();
        rig.controller.tick();
        rig.controller.stop_recording().unwrap();

        assert_eq!(rig.storage.latest_recording().unwrap(), "/audio_5001.wav");
        assert_eq!(
            rig.storage.size_of("/audio_5000.wav").unwrap(),
            (HEADER_LEN + 64 * 2) as u64
        );
        assert_eq!(
            rig.storage.size_of("/audio_5001.wav").unwrap(),
            (HEADER_LEN + 512 * 2) as u64
        );
    }

    #[test]
    fn audio_queued_before_start_is_not_recorded() {
        let clock = ManualClock::new();
        let mut rig = rig(
            &clock,
            Setup {
                source: ScriptedSource::new(vec![vec![1; 512]]).with_stale(vec![vec![7; 512]; 4]),
                ..Setup::default()
            },
        );

        rig.controller.start_recording().unwrap();
        rig.controller.tick();
        rig.controller.stop_recording().unwrap();

        let bytes = std::fs::read(rig.storage.path_of("/audio_0.wav")).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 512 * 2);
        let samples: Vec<i16> = bytes[HEADER_LEN..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert!(samples.iter().all(|&s| s == 1));
    }

    #[test]
    fn stop_flag_ends_recording_on_next_tick() {
        let clock = ManualClock::new();
        let mut rig = rig(
            &clock,
            Setup {
                source: ScriptedSource::counting(5, 512),
                ..Setup::default()
            },
        );

        rig.controller.start_recording().unwrap();
        rig.controller.tick();
        assert_eq!(
            rig.tracker.request_stop(SessionState::Recording),
            StopOutcome::Signalled
        );
        rig.controller.tick();

        assert!(!rig.controller.is_recording());
        assert_eq!(rig.tracker.current(), SessionState::Idle);
        assert!(rig.console.text().contains("Recording stopped."));
        assert_eq!(
            rig.storage.size_of("/audio_0.wav").unwrap(),
            (HEADER_LEN + 512 * 2) as u64
        );
    }

    #[test]
    fn idle_tick_shows_meter_without_rec_prefix() {
        let clock = ManualClock::new();
        let mut rig = rig(
            &clock,
            Setup {
                source: ScriptedSource::new(vec![vec![4000; 512]]),
                ..Setup::default()
            },
        );
        rig.controller.tick();
        let out = rig.console.text();
        assert!(out.starts_with("    Audio: "), "got {out:?}");
        assert!(!out.contains("REC"));
    }

    // -- playback -----------------------------------------------------------

    #[test]
    fn plays_the_newest_recording() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        write_recording(&rig.storage, "/audio_9.wav", &[9; 100]);
        write_recording(&rig.storage, "/audio_10.wav", &[10; 700]);

        rig.controller.play_latest().unwrap();

        let sink = rig.sink.lock().unwrap();
        assert_eq!(sink.samples, vec![10; 700]);
        assert_eq!(sink.blocks, 2);
        assert_eq!(rig.tracker.current(), SessionState::Idle);
        assert!(rig.console.text().contains("Playing: /audio_10.wav"));
        assert!(rig.console.text().contains("Playback finished!"));
    }

    #[test]
    fn play_with_no_recordings_says_so() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        rig.controller.play_latest().unwrap();
        assert!(rig.console.text().contains("No audio files found!"));
        assert_eq!(rig.tracker.current(), SessionState::Idle);
    }

    #[test]
    fn stop_playback_when_idle_is_not_active() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        rig.controller.handle_input(b'q');
        assert!(rig.console.text().contains("Not playing!"));
    }

    #[test]
    fn tone_plays_every_block() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        rig.controller.handle(Command::Tone);

        let expected = blocks_for_duration(3000, 16_000, 512) as usize;
        assert_eq!(rig.sink.lock().unwrap().blocks, expected);
        assert!(rig.console.text().contains("Test tone finished!"));
        assert_eq!(rig.tracker.current(), SessionState::Idle);
    }

    #[test]
    fn tone_stops_when_cancelled() {
        let clock = ManualClock::new();
        let mut rig = rig(
            &clock,
            Setup {
                stop_playback_after: Some(2),
                ..Setup::default()
            },
        );
        rig.controller.play_test_tone().unwrap();

        assert_eq!(rig.sink.lock().unwrap().blocks, 2);
        assert!(rig.console.text().contains("Test tone stopped!"));
        assert_eq!(rig.tracker.current(), SessionState::Idle);
    }

    // -- delete-all ---------------------------------------------------------

    #[test]
    fn delete_all_requires_confirmation() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        write_recording(&rig.storage, "/audio_1.wav", &[1; 10]);
        write_recording(&rig.storage, "/tts_2.wav", &[1; 100]);
        std::fs::write(rig.storage.path_of("/notes.txt"), b"keep").unwrap();

        for byte in b"d\ny\n" {
            rig.controller.handle_input(*byte);
        }

        let names: Vec<String> = rig.storage.list().unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["/notes.txt".to_string()]);
        let out = rig.console.text();
        assert!(out.contains("Files deleted: 2"));
        assert!(out.contains("Space freed: 308 bytes (0.3 KB)"));
    }

    #[test]
    fn delete_all_cancelled_by_other_key() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        write_recording(&rig.storage, "/audio_1.wav", &[1; 10]);

        rig.controller.handle_input(b'd');
        rig.controller.handle_input(b'n');

        assert!(rig.storage.exists("/audio_1.wav"));
        assert!(rig.console.text().contains("Operation cancelled"));
    }

    #[test]
    fn delete_all_times_out() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        write_recording(&rig.storage, "/audio_1.wav", &[1; 10]);

        rig.controller.handle_input(b'd');
        rig.clock.advance(Duration::from_secs(11));
        rig.controller.tick();
        rig.controller.handle_input(b'y');

        assert!(rig.storage.exists("/audio_1.wav"));
        let out = rig.console.text();
        assert!(out.contains("Timeout - operation cancelled"));
        assert!(out.contains("Unknown command 'y'"));
    }

    #[test]
    fn delete_all_with_nothing_to_delete() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        rig.controller.handle_input(b'd');
        rig.controller.handle_input(b'Y');
        assert!(rig.console.text().contains("No audio files found to delete"));
    }

    // -- respond ------------------------------------------------------------

    #[test]
    fn unmatched_transcript_is_answered_and_played() {
        let clock = ManualClock::new();
        let tts_wire = Arc::new(Mutex::new(Wire::default()));
        let mock = Arc::new(MockGenerator::replying("Sunny and warm."));
        let mut rig = rig(
            &clock,
            Setup {
                stt: Arc::new(ScriptedConnector::new(
                    Arc::new(Mutex::new(Wire::default())),
                    vec![stt_reply(&clock, "What's the weather?")],
                )),
                tts: Arc::new(ScriptedConnector::new(
                    Arc::clone(&tts_wire),
                    vec![tts_reply(&clock, &tts_wire, 100)],
                )),
                generator: Some(mock.clone()),
                ..Setup::default()
            },
        );
        write_recording(&rig.storage, "/audio_5.wav", &[0; 64]);

        rig.controller.respond().unwrap();

        assert_eq!(*mock.prompts.lock().unwrap(), vec!["What's the weather?".to_string()]);
        let reply = rig.controller.last_reply().unwrap().to_string();
        assert!(reply.starts_with("/tts_"));
        assert!(rig.storage.exists(&reply));
        assert_eq!(rig.sink.lock().unwrap().samples.len(), 100);
        assert_eq!(rig.tracker.current(), SessionState::Idle);
        assert!(String::from_utf8_lossy(&tts_wire.lock().unwrap().written)
            .ends_with(r#"{"text":"Sunny and warm."}"#));
    }

    #[test]
    fn keyword_drives_line_without_ai() {
        let clock = ManualClock::new();
        let tts_wire = Arc::new(Mutex::new(Wire::default()));
        let mock = Arc::new(MockGenerator::replying("unused"));
        let mut rig = rig(
            &clock,
            Setup {
                stt: Arc::new(ScriptedConnector::new(
                    Arc::new(Mutex::new(Wire::default())),
                    vec![stt_reply(&clock, "Turn the LIGHT ON please")],
                )),
                tts: Arc::new(ScriptedConnector::new(Arc::clone(&tts_wire), vec![])),
                generator: Some(mock.clone()),
                ..Setup::default()
            },
        );
        write_recording(&rig.storage, "/audio_5.wav", &[0; 64]);

        rig.controller.respond().unwrap();

        assert_eq!(rig.controller.line_level(), Some(Level::High));
        assert!(mock.prompts.lock().unwrap().is_empty());
        assert_eq!(tts_wire.lock().unwrap().connects, 0);
        assert!(rig.console.text().contains("\"light on\": light set HIGH"));
    }

    #[test]
    fn empty_transcript_stops_before_ai() {
        let clock = ManualClock::new();
        let mock = Arc::new(MockGenerator::replying("unused"));
        let mut rig = rig(
            &clock,
            Setup {
                stt: Arc::new(ScriptedConnector::new(
                    Arc::new(Mutex::new(Wire::default())),
                    vec![stt_reply(&clock, "")],
                )),
                generator: Some(mock.clone()),
                ..Setup::default()
            },
        );
        write_recording(&rig.storage, "/audio_5.wav", &[0; 64]);

        rig.controller.respond().unwrap();
        assert!(mock.prompts.lock().unwrap().is_empty());
        assert!(rig.console.text().contains("Nothing was recognised"));
    }

    #[test]
    fn empty_synthesis_keeps_previous_reply() {
        let clock = ManualClock::new();
        let stt_wire = Arc::new(Mutex::new(Wire::default()));
        let tts_wire = Arc::new(Mutex::new(Wire::default()));
        let empty = ScriptedConnection::new(clock.clone(), Arc::clone(&tts_wire))
            .fragment(Duration::ZERO, TTS_HEAD)
            .close_when_drained();
        let mut rig = rig(
            &clock,
            Setup {
                stt: Arc::new(ScriptedConnector::new(
                    stt_wire,
                    vec![stt_reply(&clock, "hello"), stt_reply(&clock, "hello again")],
                )),
                tts: Arc::new(ScriptedConnector::new(
                    Arc::clone(&tts_wire),
                    vec![tts_reply(&clock, &tts_wire, 10), empty],
                )),
                generator: Some(Arc::new(MockGenerator::replying("Hi."))),
                ..Setup::default()
            },
        );
        write_recording(&rig.storage, "/audio_5.wav", &[0; 64]);

        rig.controller.respond().unwrap();
        let first = rig.controller.last_reply().unwrap().to_string();
        rig.clock.advance(Duration::from_secs(1));

        let err = rig.controller.respond().unwrap_err();
        assert!(matches!(err, ApplianceError::Net(NetError::EmptyResult)));
        assert_eq!(rig.controller.last_reply(), Some(first.as_str()));
        assert_eq!(rig.tracker.current(), SessionState::Idle);
        let replies = rig
            .storage
            .list()
            .unwrap()
            .into_iter()
            .filter(|f| f.name.starts_with("/tts_"))
            .count();
        assert_eq!(replies, 1);
    }

    #[test]
    fn transcription_failure_returns_to_idle() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        write_recording(&rig.storage, "/audio_5.wav", &[0; 64]);

        rig.controller.handle(Command::Respond);
        assert_eq!(rig.tracker.current(), SessionState::Idle);
        assert!(rig.console.text().contains("ERROR: cannot connect to"));
    }

    #[test]
    fn replay_without_reply_says_so() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        rig.controller.handle_input(b'v');
        assert!(rig.console.text().contains("No synthesized reply yet"));
        assert_eq!(rig.tracker.current(), SessionState::Idle);
    }

    #[test]
    fn unknown_key_is_reported() {
        let clock = ManualClock::new();
        let mut rig = rig(&clock, Setup::default());
        rig.controller.handle_input(b'z');
        assert!(rig.console.text().contains("Unknown command 'z' (h for help)"));
    }
}
