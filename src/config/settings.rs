//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files.  Every struct is
//! `#[serde(default)]`, so a partial `settings.toml` only overrides the keys
//! it names.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::AudioFormat;
use crate::router::{Level, TriggerRule};

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture, metering and test-tone settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz of everything written to storage.
    pub sample_rate: u32,
    /// Samples per block moved by the pump.
    pub block_samples: usize,
    /// Recording stops automatically after this many seconds.
    pub record_limit_secs: u64,
    /// Minimum gap between level-meter lines.
    pub meter_interval_ms: u64,
    /// Longest a single microphone read may block.
    pub read_timeout_ms: u64,
    pub tone_frequency_hz: f64,
    pub tone_amplitude: f64,
    pub tone_duration_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_samples: 512,
            record_limit_secs: 10,
            meter_interval_ms: 200,
            read_timeout_ms: 100,
            tone_frequency_hz: 1000.0,
            tone_amplitude: 8000.0,
            tone_duration_ms: 3000,
        }
    }
}

impl AudioConfig {
    /// 16-bit mono at the configured rate.
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate_hz: self.sample_rate,
            ..AudioFormat::SPEECH
        }
    }

    pub fn record_limit(&self) -> Duration {
        Duration::from_secs(self.record_limit_secs)
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn tone_duration(&self) -> Duration {
        Duration::from_millis(self.tone_duration_ms)
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding waveform files.  `None` uses [`AppPaths::audio_dir`].
    pub root: Option<PathBuf>,
    /// Seconds to wait for the `y` confirmation before delete-all gives up.
    pub delete_confirm_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            delete_confirm_secs: 10,
        }
    }
}

impl StorageConfig {
    pub fn resolved_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| AppPaths::new().audio_dir)
    }
}

// ---------------------------------------------------------------------------
// TranscriptionConfig
// ---------------------------------------------------------------------------

/// Speech-to-text service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Query string appended after `?` (model, language, formatting flags).
    pub query: String,
    /// Sent as `Authorization: Token <api_key>`.
    pub api_key: String,
    /// Body chunk size when streaming the recording.
    pub chunk_bytes: usize,
    /// Wall-clock bound on the response poll loop.
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            host: "api.deepgram.com".into(),
            port: 443,
            path: "/v1/listen".into(),
            query: "model=nova-2&language=en&smart_format=true&numerals=true".into(),
            api_key: String::new(),
            chunk_bytes: 1024,
            timeout_ms: 12_000,
            poll_interval_ms: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// SynthesisConfig
// ---------------------------------------------------------------------------

/// Text-to-speech service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Query string selecting voice and encoding.  `sample_rate` is always
    /// set from `audio.sample_rate`.
    pub query: String,
    pub api_key: String,
    /// Payload chunk size when downloading the reply.
    pub chunk_bytes: usize,
    /// Overall bound from the start of the header wait.
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Play the synthesized reply as soon as it is stored.
    pub autoplay: bool,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            host: "api.deepgram.com".into(),
            port: 443,
            path: "/v1/speak".into(),
            query: "model=aura-asteria-en&encoding=linear16&container=none".into(),
            api_key: String::new(),
            chunk_bytes: 1024,
            timeout_ms: 15_000,
            poll_interval_ms: 10,
            autoplay: true,
        }
    }
}

// ---------------------------------------------------------------------------
// AiConfig
// ---------------------------------------------------------------------------

/// Remote text-generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// When `false`, transcripts that match no trigger are only printed.
    pub enabled: bool,
    /// Base URL, e.g. `https://generativelanguage.googleapis.com`.
    pub base_url: String,
    pub model: String,
    /// Passed as the `key` query parameter.
    pub api_key: String,
    pub timeout_secs: u64,
    /// Prepended to every transcript before it is sent.
    pub prompt_prefix: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-1.5-flash".into(),
            api_key: String::new(),
            timeout_secs: 20,
            prompt_prefix: None,
        }
    }
}

// ---------------------------------------------------------------------------
// RouterConfig
// ---------------------------------------------------------------------------

/// Keyword triggers and the digital output line they drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Name used in status lines and logs.
    pub line_name: String,
    /// File the line level is written to (e.g. a sysfs GPIO `value` file).
    /// `None` logs level changes only.
    pub output_path: Option<PathBuf>,
    /// Checked in order; first match wins.
    pub rules: Vec<TriggerRule>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            line_name: "light".into(),
            output_path: None,
            rules: vec![
                TriggerRule::new("light on", Level::High),
                TriggerRule::new("light off", Level::Low),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use talkbox::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub storage: StorageConfig,
    pub transcription: TranscriptionConfig,
    pub synthesis: SynthesisConfig,
    pub ai: AiConfig,
    pub router: RouterConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
