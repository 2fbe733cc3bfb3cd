use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Application configuration loaded from `~/.voicenote.toml`
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Audio capture settings
    #[serde(default)]
    pub audio: AudioConfig,
    /// Speech engine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Article generation settings
    #[serde(default)]
    pub article: ArticleConfig,
    /// Logging settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Audio capture settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AudioConfig {
    /// Preferred capture sample rate in Hz (the device may impose its own)
    pub sample_rate: u32,
    /// Ring buffer size in seconds of audio at the device rate
    pub buffer_secs: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            buffer_secs: 30,
        }
    }
}

/// Which speech engine backend to construct
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Pick a backend from the other engine settings
    Auto,
    /// Streaming recognizer with live hypothesis refresh and silence auto-stop
    Continuous,
    /// Utterance recognizer that produces its hypothesis at stop time
    Discrete,
}

/// Speech engine settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend selection
    pub kind: EngineKind,
    /// Path to the whisper model file (`~` is expanded)
    pub model_path: String,
    /// Language code, or None for auto-detect
    pub language: Option<String>,
    /// CPU threads for inference
    pub threads: usize,
    /// Whether live interim hypotheses are wanted
    pub partial_results: bool,
    /// Hypothesis refresh cadence in milliseconds
    pub partial_interval_ms: u64,
    /// Sustained silence after which the continuous backend halts itself
    pub silence_timeout_ms: u64,
    /// Hard cap on a single utterance, in seconds
    pub max_utterance_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Auto,
            model_path: "~/.voicenote/models/ggml-base.en.bin".to_owned(),
            language: Some("en".to_owned()),
            threads: 4,
            partial_results: true,
            partial_interval_ms: 750,
            silence_timeout_ms: 3000,
            max_utterance_secs: 30,
        }
    }
}

/// Article generation settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ArticleConfig {
    /// API key; falls back to the `GEMINI_API_KEY` environment variable
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// Article style (e.g. "professional", "conversational")
    pub style: String,
    /// Article tone
    pub tone: String,
    /// Target length: "short", "medium" or "long"
    pub length: String,
    /// Target audience description
    pub audience: Option<String>,
}

impl Default for ArticleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.0-flash".to_owned(),
            style: "professional".to_owned(),
            tone: "informative".to_owned(),
            length: "medium".to_owned(),
            audience: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file location (`~` is expanded)
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "~/.voicenote/voicenote.log".to_owned(),
        }
    }
}

impl Config {
    /// Load config from `~/.voicenote.toml`, writing a default file on first run
    ///
    /// # Errors
    /// Returns error if the file cannot be read, written or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;

        let config: Self = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".voicenote.toml"))
    }

    fn create_default(path: &PathBuf) -> Result<()> {
        let default_config = r#"[audio]
sample_rate = 16000
buffer_secs = 30

[engine]
# "auto" picks continuous when partial_results is on, discrete otherwise
kind = "auto"
model_path = "~/.voicenote/models/ggml-base.en.bin"
language = "en"
threads = 4
partial_results = true
partial_interval_ms = 750
silence_timeout_ms = 3000
max_utterance_secs = 30

[article]
# api_key = "..."   # or set GEMINI_API_KEY
model = "gemini-2.0-flash"
style = "professional"
tone = "informative"
length = "medium"

[telemetry]
enabled = false
log_path = "~/.voicenote/voicenote.log"
"#;
        fs::write(path, default_config).context("failed to write default config")?;
        Ok(())
    }
}

/// Expand a leading `~/` to the home directory
///
/// # Errors
/// Returns error if `HOME` is not set
pub fn expand_path(path: &str) -> Result<PathBuf> {
    if let Some(stripped) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(stripped))
    } else {
        Ok(PathBuf::from(path))
    }
}
