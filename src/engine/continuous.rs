use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::{
    EngineError, EngineEvent, EngineOptions, SpeechEngine, Transcriber, MIN_TRANSCRIBE_SAMPLES,
    SILENCE_RMS,
};
use crate::media::{self, AudioStream};

/// Streaming recognizer backend
///
/// A worker thread drains the stream on a fixed cadence, re-transcribes the
/// accumulated utterance, and re-emits the refined hypothesis. It halts
/// itself after sustained silence or when the utterance cap is reached —
/// the engine-originated stop the session's reconciliation absorbs.
pub struct ContinuousEngine {
    recognizer: Arc<dyn Transcriber>,
    options: EngineOptions,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ContinuousEngine {
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

impl SpeechEngine for ContinuousEngine {
    fn start(
        &mut self,
        stream: Arc<AudioStream>,
        events: UnboundedSender<EngineEvent>,
    ) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        // A worker from a previous run may have halted itself; reap it
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
        "continuous"
    }
}

impl Drop for ContinuousEngine {
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
    let mut silent = Duration::ZERO;
    let mut hypothesis = String::new();
    debug!("continuous recognizer started");

    loop {
        thread::sleep(options.partial_interval);
        if !running.load(Ordering::SeqCst) {
            break;
        }
        if !stream.is_active() {
            debug!("audio stream closed under recognizer");
            break;
        }

        let chunk = stream.drain();
        if chunk.is_empty() || media::rms(&chunk) < SILENCE_RMS {
            silent = silent.saturating_add(options.partial_interval);
        } else {
            silent = Duration::ZERO;
        }
        raw.extend_from_slice(&chunk);

        // Only stop on silence once something was heard; an idle mic is
        // handled by the utterance cap instead.
        if !hypothesis.is_empty() && silent >= options.silence_timeout {
            debug!("silence timeout reached");
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
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    let _ = events.send(EngineEvent::Stopped);
    debug!("continuous recognizer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    /// Transcriber that replays a script, repeating the last entry
    struct ScriptedTranscriber {
        script: Mutex<Vec<String>>,
    }

    impl ScriptedTranscriber {
        fn new(script: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().rev().map(|s| (*s).to_owned()).collect()),
            })
        }
    }

    impl Transcriber for ScriptedTranscriber {
        fn transcribe(&self, _samples: &[f32]) -> Result<String, EngineError> {
            let mut script = self.script.lock().unwrap();
            match script.len() {
                0 => Ok(String::new()),
                1 => Ok(script[0].clone()),
                _ => Ok(script.pop().unwrap()),
            }
        }
    }

    struct FailingTranscriber;

    impl Transcriber for FailingTranscriber {
        fn transcribe(&self, _samples: &[f32]) -> Result<String, EngineError> {
            Err(EngineError::Inference("model exploded".to_owned()))
        }
    }

    fn fast_options() -> EngineOptions {
        EngineOptions {
            partial_interval: Duration::from_millis(10),
            silence_timeout: Duration::from_millis(40),
            max_utterance: Duration::from_secs(30),
        }
    }

    fn collect_events(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn loud_samples(n: usize) -> Vec<f32> {
        vec![0.5; n]
    }

    #[test]
    fn test_emits_refined_hypotheses_then_stops_on_silence() {
        let (mut producer, stream) = AudioStream::channel(200_000, 16_000, 1);
        let stream = Arc::new(stream);
        let (tx, mut rx) = unbounded_channel();

        let mut engine = ContinuousEngine::new(
            ScriptedTranscriber::new(&["hello wor", "hello world"]),
            fast_options(),
        );
        engine.start(Arc::clone(&stream), tx).unwrap();

        // Speech, enough to clear the 1 s minimum input
        producer.push(&loud_samples(20_000));
        thread::sleep(Duration::from_millis(60));
        // Then nothing: silence timeout fires, worker halts on its own
        thread::sleep(Duration::from_millis(150));

        let events = collect_events(&mut rx);
        assert_eq!(events.last(), Some(&EngineEvent::Stopped));
        let partials: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Partial(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(partials.contains(&"hello wor"));
        assert_eq!(partials.last(), Some(&"hello world"));

        // Worker already exited; stop is a no-op
        engine.stop();
    }

    #[test]
    fn test_does_not_reemit_unchanged_hypothesis() {
        let (mut producer, stream) = AudioStream::channel(200_000, 16_000, 1);
        let stream = Arc::new(stream);
        let (tx, mut rx) = unbounded_channel();

        let mut engine =
            ContinuousEngine::new(ScriptedTranscriber::new(&["same text"]), fast_options());
        engine.start(Arc::clone(&stream), tx).unwrap();

        producer.push(&loud_samples(20_000));
        thread::sleep(Duration::from_millis(80));
        engine.stop();

        let events = collect_events(&mut rx);
        let partial_count = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Partial(_)))
            .count();
        assert_eq!(partial_count, 1);
    }

    #[test]
    fn test_stop_queues_terminal_stopped() {
        let (_producer, stream) = AudioStream::channel(1024, 16_000, 1);
        let (tx, mut rx) = unbounded_channel();

        let mut engine = ContinuousEngine::new(ScriptedTranscriber::new(&[]), fast_options());
        engine.start(Arc::new(stream), tx).unwrap();
        engine.stop();

        let events = collect_events(&mut rx);
        assert_eq!(events, vec![EngineEvent::Stopped]);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (_producer, stream) = AudioStream::channel(1024, 16_000, 1);
        let stream = Arc::new(stream);
        let (tx, _rx) = unbounded_channel();

        let mut engine = ContinuousEngine::new(ScriptedTranscriber::new(&[]), fast_options());
        engine.start(Arc::clone(&stream), tx.clone()).unwrap();
        assert!(matches!(
            engine.start(stream, tx),
            Err(EngineError::AlreadyRunning)
        ));
        engine.stop();
    }

    #[test]
    fn test_restart_after_self_stop() {
        let (mut producer, stream) = AudioStream::channel(200_000, 16_000, 1);
        let stream = Arc::new(stream);
        let (tx, mut rx) = unbounded_channel();

        let mut engine =
            ContinuousEngine::new(ScriptedTranscriber::new(&["first pass"]), fast_options());
        engine.start(Arc::clone(&stream), tx.clone()).unwrap();

        producer.push(&loud_samples(20_000));
        // Wait for the silence timeout to halt the worker
        thread::sleep(Duration::from_millis(200));
        assert_eq!(collect_events(&mut rx).last(), Some(&EngineEvent::Stopped));

        // Session-style transparent restart on the same channel
        engine.start(Arc::clone(&stream), tx).unwrap();
        engine.stop();
        assert_eq!(collect_events(&mut rx).last(), Some(&EngineEvent::Stopped));
    }

    #[test]
    fn test_closed_stream_triggers_engine_stop() {
        let (_producer, stream) = AudioStream::channel(1024, 16_000, 1);
        let stream = Arc::new(stream);
        let (tx, mut rx) = unbounded_channel();

        let mut engine = ContinuousEngine::new(ScriptedTranscriber::new(&[]), fast_options());
        engine.start(Arc::clone(&stream), tx).unwrap();

        stream.close();
        thread::sleep(Duration::from_millis(50));

        let events = collect_events(&mut rx);
        assert_eq!(events.last(), Some(&EngineEvent::Stopped));
        engine.stop();
    }

    #[test]
    fn test_inference_error_emits_error_then_stopped() {
        let (mut producer, stream) = AudioStream::channel(200_000, 16_000, 1);
        let stream = Arc::new(stream);
        let (tx, mut rx) = unbounded_channel();

        let mut engine = ContinuousEngine::new(Arc::new(FailingTranscriber), fast_options());
        engine.start(Arc::clone(&stream), tx).unwrap();

        producer.push(&loud_samples(20_000));
        thread::sleep(Duration::from_millis(80));
        engine.stop();

        let events = collect_events(&mut rx);
        assert!(matches!(events.first(), Some(EngineEvent::Error(msg)) if msg.contains("model exploded")));
        assert_eq!(events.last(), Some(&EngineEvent::Stopped));
    }
}
