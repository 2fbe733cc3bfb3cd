use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::{
    EngineError, EngineEvent, EngineOptions, SpeechEngine, Transcriber, MIN_TRANSCRIBE_SAMPLES,
};
use crate::media::{self, AudioStream};

/// Utterance recognizer backend
///
/// Buffers the whole utterance and produces its definitive hypothesis when
/// told to stop, the way native platform recognizers deliver results on an
/// explicit stop call. Interim hypotheses are still refreshed on a cadence
/// so callers get live feedback; there is no silence detection — the run
/// ends on `stop()`, a dead stream, or the utterance cap.
pub struct DiscreteEngine {
    recognizer: Arc<dyn Transcriber>,
    options: EngineOptions,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DiscreteEngine {
    /// Build the backend over a transcriber
    #[must_use]
    pub fn new(recognizer: Arc<dyn Transcriber>, options: EngineOptions) -> Self {
        Self {
            recognizer,
            options,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl SpeechEngine for DiscreteEngine {
    fn start(
        &mut self,
        stream: Arc<AudioStream>,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        if let Some(stale) = self.worker.take() {
            let _ = stale.join();
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let recognizer = Arc::clone(&self.recognizer);
        let options = self.options.clone();

        self.worker = Some(thread::spawn(move || {
            run_worker(&recognizer, &options, &stream, &events, &running);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn name(&self) -> &'static str {
        "discrete"
    }
}

impl Drop for DiscreteEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    recognizer: &Arc<dyn Transcriber>,
    options: &EngineOptions,
    stream: &AudioStream,
    events: &UnboundedSender<EngineEvent>,
    running: &AtomicBool,
) {
    let channels = stream.channels();
    let rate = stream.sample_rate();
    let max_raw = (rate as usize)
        .saturating_mul(usize::from(channels))
        .saturating_mul(usize::try_from(options.max_utterance.as_secs()).unwrap_or(usize::MAX));

    let mut raw: Vec<f32> = Vec::new();
    let mut hypothesis = String::new();
    debug!("discrete recognizer started");

    loop {
        thread::sleep(options.partial_interval);
        raw.extend_from_slice(&stream.drain());

        if !running.load(Ordering::SeqCst) {
            break;
        }
        if !stream.is_active() {
            debug!("audio stream closed under recognizer");
            break;
        }
        if max_raw > 0 && raw.len() >= max_raw {
            debug!("utterance cap reached");
            break;
        }

        let input = media::to_recognizer_input(&raw, channels, rate);
        if input.len() < MIN_TRANSCRIBE_SAMPLES {
            continue;
        }
        match recognizer.transcribe(&input) {
            Ok(text) => {
                if !text.is_empty() && text != hypothesis {
                    hypothesis = text.clone();
                    if events.send(EngineEvent::Partial(text)).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("recognition failed: {e}");
                let _ = events.send(EngineEvent::Error(e.to_string()));
                running.store(false, Ordering::SeqCst);
                let _ = events.send(EngineEvent::Stopped);
                return;
            }
        }
    }

    // Definitive pass over the full utterance, including the tail captured
    // since the last refresh. Short utterances are padded up to the
    // recognizer's minimum context window.
    raw.extend_from_slice(&stream.drain());
    let mut input = media::to_recognizer_input(&raw, channels, rate);
    if !input.is_empty() {
        if input.len() < MIN_TRANSCRIBE_SAMPLES {
            input.resize(MIN_TRANSCRIBE_SAMPLES, 0.0);
        }
        match recognizer.transcribe(&input) {
            Ok(text) => {
                if !text.is_empty() && text != hypothesis {
                    let _ = events.send(EngineEvent::Partial(text));
                }
            }
            Err(e) => {
                warn!("final recognition pass failed: {e}");
                let _ = events.send(EngineEvent::Error(e.to_string()));
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    let _ = events.send(EngineEvent::Stopped);
    debug!("discrete recognizer stopped");
}
