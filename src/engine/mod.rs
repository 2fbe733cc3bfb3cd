//! Speech engine seam
//!
//! The session drives a [`SpeechEngine`] and never sees which backend is
//! behind it. Backends deliver [`EngineEvent`]s over a channel; the event
//! sequence for one run is any number of `Partial` hypotheses, at most one
//! `Error`, and exactly one terminating `Stopped`.

/// Streaming recognizer with silence auto-stop
pub mod continuous;
/// One-shot utterance recognizer
pub mod discrete;
/// Shared whisper model wrapper
pub mod whisper;

pub use continuous::ContinuousEngine;
pub use discrete::DiscreteEngine;
pub use whisper::Recognizer;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::config::{EngineConfig, EngineKind};
use crate::media::AudioStream;

/// RMS level below which a sample block counts as silence
pub(crate) const SILENCE_RMS: f32 = 0.01;

/// Minimum recognizer input before a hypothesis is attempted (1 s at 16 kHz)
pub(crate) const MIN_TRANSCRIBE_SAMPLES: usize = 16_000;

/// Event emitted by a running engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Latest unconfirmed hypothesis for the current utterance; each one
    /// replaces the previous
    Partial(String),
    /// Recognition failed; a `Stopped` follows
    Error(String),
    /// The engine halted, on its own or because `stop()` was called
    Stopped,
}

/// Timing knobs shared by both backends
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Hypothesis refresh cadence
    pub partial_interval: Duration,
    /// Sustained silence after which the continuous backend halts
    pub silence_timeout: Duration,
    /// Hard cap on a single utterance
    pub max_utterance: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            partial_interval: Duration::from_millis(750),
            silence_timeout: Duration::from_millis(3000),
            max_utterance: Duration::from_secs(30),
        }
    }
}

impl EngineOptions {
    /// Map configuration values onto engine timings
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self {
            partial_interval: Duration::from_millis(config.partial_interval_ms),
            silence_timeout: Duration::from_millis(config.silence_timeout_ms),
            max_utterance: Duration::from_secs(config.max_utterance_secs),
        }
    }
}

/// Errors from engine construction or inference
#[derive(Debug, Error)]
pub enum EngineError {
    /// The speech model could not be loaded
    #[error("speech engine unavailable ({path}): {reason}")]
    Unavailable {
        /// Configured model path
        path: String,
        /// What went wrong
        reason: String,
    },
    /// Inference failed mid-run
    #[error("recognition failed: {0}")]
    Inference(String),
    /// `start()` was called while a run is active
    #[error("engine already running")]
    AlreadyRunning,
}

/// Transcribes one block of 16 kHz mono samples
///
/// Seam between the backends and the whisper model so backend behavior is
/// testable with scripted transcribers.
pub trait Transcriber: Send + Sync {
    /// Transcribe the given samples to text
    ///
    /// # Errors
    /// Returns error if inference fails
    fn transcribe(&self, samples: &[f32]) -> Result<String, EngineError>;
}

/// A speech recognition backend the session can drive
pub trait SpeechEngine: Send {
    /// Begin recognizing from `stream`, delivering events on `events`
    ///
    /// Contract: after a successful start the engine queues zero or more
    /// `Partial` events, at most one `Error`, then exactly one `Stopped`.
    /// [`SpeechEngine::stop`] returns only after that final event is queued.
    ///
    /// # Errors
    /// Returns error if a run is already active
    fn start(
        &mut self,
        stream: Arc<AudioStream>,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<(), EngineError>;

    /// Halt the current run and flush its final events
    fn stop(&mut self);

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Resolve the configured backend kind
#[must_use]
pub const fn resolved_kind(config: &EngineConfig) -> EngineKind {
    match config.kind {
        EngineKind::Auto => {
            if config.partial_results {
                EngineKind::Continuous
            } else {
                EngineKind::Discrete
            }
        }
        kind => kind,
    }
}

/// Construct the configured backend over a freshly loaded model
///
/// Selection happens once, here, at session construction time; the
/// reconciliation logic upstream is backend-agnostic.
///
/// # Errors
/// Returns [`EngineError::Unavailable`] if the model cannot be loaded
pub fn select(config: &EngineConfig) -> Result<Box<dyn SpeechEngine>, EngineError> {
    let model_path =
        crate::config::expand_path(&config.model_path).map_err(|e| EngineError::Unavailable {
            path: config.model_path.clone(),
            reason: e.to_string(),
        })?;

    let recognizer: Arc<dyn Transcriber> = Arc::new(Recognizer::new(
        &model_path,
        config.threads,
        config.language.clone(),
    )?);
    let options = EngineOptions::from_config(config);

    let engine: Box<dyn SpeechEngine> = match resolved_kind(config) {
        EngineKind::Continuous | EngineKind::Auto => {
            Box::new(ContinuousEngine::new(recognizer, options))
        }
        EngineKind::Discrete => Box::new(DiscreteEngine::new(recognizer, options)),
    };
    info!(backend = engine.name(), "selected speech engine backend");
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_auto_resolves_from_partial_results() {
        let live = EngineConfig {
            kind: EngineKind::Auto,
            partial_results: true,
            ..EngineConfig::default()
        };
        assert_eq!(resolved_kind(&live), EngineKind::Continuous);

        let batch = EngineConfig {
            kind: EngineKind::Auto,
            partial_results: false,
            ..EngineConfig::default()
        };
        assert_eq!(resolved_kind(&batch), EngineKind::Discrete);
    }

    #[test]
    fn test_explicit_kind_wins_over_partial_results() {
        let config = EngineConfig {
            kind: EngineKind::Discrete,
            partial_results: true,
            ..EngineConfig::default()
        };
        assert_eq!(resolved_kind(&config), EngineKind::Discrete);
    }

    #[test]
    fn test_options_from_config() {
        let config = EngineConfig {
            partial_interval_ms: 500,
            silence_timeout_ms: 1500,
            max_utterance_secs: 10,
            ..EngineConfig::default()
        };

        let options = EngineOptions::from_config(&config);
        assert_eq!(options.partial_interval, Duration::from_millis(500));
        assert_eq!(options.silence_timeout, Duration::from_millis(1500));
        assert_eq!(options.max_utterance, Duration::from_secs(10));
    }

    #[test]
    fn test_select_without_model_is_unavailable() {
        let config = EngineConfig {
            model_path: "/tmp/definitely-missing-model.bin".to_owned(),
            ..EngineConfig::default()
        };

        let result = select(&config);
        assert!(matches!(result, Err(EngineError::Unavailable { .. })));
    }
}
