use std::path::Path;
use std::sync::Mutex;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{EngineError, Transcriber};

/// Whisper model wrapper shared by both engine backends
///
/// Holds one loaded context; each transcription gets its own inference
/// state under the context lock.
pub struct Recognizer {
    ctx: Mutex<WhisperContext>,
    threads: i32,
    language: Option<String>,
}

impl Recognizer {
    /// Load a whisper model from disk
    ///
    /// # Errors
    /// Returns [`EngineError::Unavailable`] if the model file is missing or
    /// invalid, or the parameters are out of range
    pub fn new(
        model_path: &Path,
        threads: usize,
        language: Option<String>,
    ) -> Result<Self, EngineError> {
        let unavailable = |reason: String| EngineError::Unavailable {
            path: model_path.display().to_string(),
            reason,
        };

        if threads == 0 {
            return Err(unavailable("threads must be > 0".to_owned()));
        }
        let threads = i32::try_from(threads)
            .map_err(|_| unavailable(format!("threads value too large (max: {})", i32::MAX)))?;

        let path_str = model_path
            .to_str()
            .ok_or_else(|| unavailable("model path contains invalid UTF-8".to_owned()))?;

        tracing::info!(
            path = %model_path.display(),
            threads,
            language = ?language,
            "loading speech model"
        );

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| unavailable(format!("{e:?}")))?;

        tracing::info!("speech model loaded");

        Ok(Self {
            ctx: Mutex::new(ctx),
            threads,
            language,
        })
    }
}

impl Transcriber for Recognizer {
    fn transcribe(&self, samples: &[f32]) -> Result<String, EngineError> {
        let ctx = self
            .ctx
            .lock()
            .map_err(|_| EngineError::Inference("recognizer mutex poisoned".to_owned()))?;

        let mut state = ctx
            .create_state()
            .map_err(|e| EngineError::Inference(format!("failed to create state: {e:?}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(self.language.as_deref());
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, samples)
            .map_err(|e| EngineError::Inference(format!("{e:?}")))?;

        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
        }
        let text = text.trim().to_owned();

        tracing::debug!(
            samples = samples.len(),
            text_len = text.len(),
            inference_ms = start.elapsed().as_millis(),
            "transcription pass complete"
        );

        Ok(text)
    }
}

// SAFETY: the WhisperContext is only ever touched under the mutex, and
// whisper-rs documents the context as safe to use across threads when
// access is serialized.
#[allow(unsafe_code)]
unsafe impl Send for Recognizer {}
#[allow(unsafe_code)]
unsafe impl Sync for Recognizer {}
