//! Live transcription session
//!
//! Owns the single authoritative transcript across an unreliable recognition
//! engine. Interim hypotheses replace each other wholesale; finalization
//! commits the pending hypothesis into the transcript exactly once, guarded
//! by the last-finalized text so an engine stop arriving twice (or a
//! hypothesis re-heard after a restart) cannot duplicate it. When the engine
//! halts on its own while the session still intends to listen, it is
//! restarted transparently, up to a bounded number of consecutive attempts.

use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::acquire::Negotiator;
use crate::engine::{EngineEvent, SpeechEngine};
use crate::media::{lock_or_recover, AudioStream};

/// Consecutive engine-originated stops (with no intervening hypothesis)
/// tolerated before the session gives up instead of restarting forever.
pub const MAX_AUTO_RESTARTS: u32 = 5;

/// Errors surfaced to the session's caller
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` while already listening
    #[error("session is already listening")]
    AlreadyListening,
    /// Every acquisition strategy failed; the user must act externally
    #[error("microphone access denied — check system sound settings and allow input")]
    PermissionDenied,
    /// The recognition engine could not be started
    #[error("speech engine unavailable: {0}")]
    EngineUnavailable(String),
    /// `stop()` arrived while this `start()` was suspended; no transition
    /// took place
    #[error("start cancelled by stop")]
    Cancelled,
    /// `reset()` while not idle
    #[error("session is not idle")]
    NotIdle,
}

struct Inner {
    engine: Box<dyn SpeechEngine>,
    /// Authoritative history; only ever appended to (or cleared by reset)
    final_transcript: String,
    /// Latest unconfirmed hypothesis, replaced wholesale on every update
    interim: String,
    /// Dedup guard: the hypothesis most recently committed to the transcript
    last_finalized: String,
    /// Intended state, distinct from whether the engine is actually running
    listening: bool,
    /// Bumped by stop() so a suspended start() cannot resurrect the session
    epoch: u64,
    /// Consecutive engine stops without a new hypothesis
    restarts: u32,
    error: Option<String>,
    stream: Option<Arc<AudioStream>>,
    events: Option<UnboundedSender<EngineEvent>>,
}

/// A single live transcription session over one engine backend
///
/// Engine callbacks are serialized through one event pump task; every
/// handler takes the state lock, so no two callbacks interleave on
/// transcript state.
pub struct TranscriptionSession {
    inner: Arc<Mutex<Inner>>,
    negotiator: Arc<tokio::sync::Mutex<Negotiator>>,
    pump: Option<JoinHandle<()>>,
}

impl TranscriptionSession {
    /// Create an idle session over a negotiator and a selected engine backend
    #[must_use]
    pub fn new(
        negotiator: Arc<tokio::sync::Mutex<Negotiator>>,
        engine: Box<dyn SpeechEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                engine,
                final_transcript: String::new(),
                interim: String::new(),
                last_finalized: String::new(),
                listening: false,
                epoch: 0,
                restarts: 0,
                error: None,
                stream: None,
                events: None,
            })),
            negotiator,
            pump: None,
        }
    }

    /// Acquire the microphone, start the engine, and enter listening
    ///
    /// Suspends for as long as permission prompts take; a `stop()` arriving
    /// meanwhile cancels the start without a state transition.
    ///
    /// # Errors
    /// [`SessionError::PermissionDenied`] when every acquisition strategy
    /// fails, [`SessionError::EngineUnavailable`] when the engine cannot
    /// start, [`SessionError::AlreadyListening`] / [`SessionError::Cancelled`]
    /// on the respective races
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let epoch = {
            let state = lock_or_recover(&self.inner);
            if state.listening {
                return Err(SessionError::AlreadyListening);
            }
            state.epoch
        };

        // Reap a pump left over from an engine-side shutdown; it has
        // already exited (or is draining its last event).
        if let Some(stale) = self.pump.take() {
            let _ = stale.await;
        }

        // Suspension point: permission prompts are user-paced, no timeout.
        let acquired = {
            let mut negotiator = self.negotiator.lock().await;
            negotiator.acquire().await
        };
        let Some(stream) = acquired else {
            let mut state = lock_or_recover(&self.inner);
            state.error = Some(SessionError::PermissionDenied.to_string());
            return Err(SessionError::PermissionDenied);
        };

        let (tx, rx) = unbounded_channel();
        {
            let mut state = lock_or_recover(&self.inner);
            if state.epoch != epoch || state.listening {
                // stop() won the race; dropping our borrow releases the
                // stream unless the negotiator holds it.
                debug!("start resolved after stop, discarding");
                return Err(SessionError::Cancelled);
            }

            if let Err(e) = state.engine.start(Arc::clone(&stream), tx.clone()) {
                state.error = Some(e.to_string());
                return Err(SessionError::EngineUnavailable(e.to_string()));
            }

            state.stream = Some(stream);
            state.events = Some(tx);
            state.listening = true;
            state.restarts = 0;
            state.error = None;
            info!(backend = state.engine.name(), "session listening");
        }

        let inner = Arc::clone(&self.inner);
        self.pump = Some(tokio::spawn(pump(inner, rx)));
        Ok(())
    }

    /// Leave listening: stop the engine, flush pending interim text into the
    /// transcript, and drop the borrowed stream
    ///
    /// Idempotent; safe to call while a `start()` is suspended (that start
    /// then resolves as cancelled).
    pub async fn stop(&mut self) {
        {
            let mut state = lock_or_recover(&self.inner);
            state.listening = false;
            state.epoch += 1;
            state.engine.stop();
        }

        // The engine has queued its terminal events; let the pump drain
        // them so the definitive hypothesis lands before the final flush.
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }

        let mut state = lock_or_recover(&self.inner);
        finalize_pending(&mut state);
        state.stream = None;
        state.events = None;
        info!(chars = state.final_transcript.len(), "session stopped");
    }

    /// Clear the transcript state; only valid while idle
    ///
    /// # Errors
    /// Returns [`SessionError::NotIdle`] while listening
    pub fn reset(&mut self) -> Result<(), SessionError> {
        let mut state = lock_or_recover(&self.inner);
        if state.listening {
            return Err(SessionError::NotIdle);
        }
        state.final_transcript.clear();
        state.interim.clear();
        state.last_finalized.clear();
        state.error = None;
        state.restarts = 0;
        debug!("session reset");
        Ok(())
    }

    /// Replace the interim hypothesis; never touches the transcript
    pub fn on_partial(&self, text: &str) {
        handle_partial(&self.inner, text);
    }

    /// Engine-originated stop: finalize pending text, then restart if still
    /// intending to listen
    pub fn on_engine_stopped(&self) {
        handle_stopped(&self.inner);
    }

    /// Engine error: recorded and terminal for the current run
    pub fn on_engine_error(&self, message: &str) {
        handle_error(&self.inner, message);
    }

    /// The authoritative transcript so far
    #[must_use]
    pub fn transcript(&self) -> String {
        lock_or_recover(&self.inner).final_transcript.clone()
    }

    /// The current unconfirmed hypothesis
    #[must_use]
    pub fn interim_text(&self) -> String {
        lock_or_recover(&self.inner).interim.clone()
    }

    /// Whether the session intends to be listening
    #[must_use]
    pub fn is_listening(&self) -> bool {
        lock_or_recover(&self.inner).listening
    }

    /// Last user-visible error, if any
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        lock_or_recover(&self.inner).error.clone()
    }
}

/// Serializes engine callbacks onto the session state
async fn pump(inner: Arc<Mutex<Inner>>, mut events: UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Partial(text) => handle_partial(&inner, &text),
            EngineEvent::Error(message) => handle_error(&inner, &message),
            EngineEvent::Stopped => {
                handle_stopped(&inner);
                if !lock_or_recover(&inner).listening {
                    break;
                }
            }
        }
    }
    debug!("event pump finished");
}

fn handle_partial(inner: &Arc<Mutex<Inner>>, text: &str) {
    let mut state = lock_or_recover(inner);
    if text != state.interim {
        debug!(chars = text.len(), "interim hypothesis updated");
        state.interim = text.to_owned();
    }
    if state.listening {
        // The engine is making progress; a later stop starts a fresh
        // restart budget.
        state.restarts = 0;
    }
}

fn handle_stopped(inner: &Arc<Mutex<Inner>>) {
    let mut state = lock_or_recover(inner);
    let progressed = finalize_pending(&mut state);

    if !state.listening {
        debug!("engine stopped while idle");
        return;
    }

    if !progressed && state.restarts >= MAX_AUTO_RESTARTS {
        warn!(
            attempts = state.restarts,
            "engine keeps stopping without progress, giving up"
        );
        state.listening = false;
        state.error = Some(
            "recognizer stopped repeatedly without hearing anything — check the microphone in system settings".to_owned(),
        );
        state.stream = None;
        state.events = None;
        return;
    }

    state.restarts += 1;
    let stream = state.stream.clone();
    let tx = state.events.clone();
    match (stream, tx) {
        (Some(stream), Some(tx)) => {
            info!(attempt = state.restarts, "restarting speech engine");
            if let Err(e) = state.engine.start(stream, tx) {
                warn!("engine restart failed: {e}");
                state.listening = false;
                state.error = Some(format!("engine restart failed: {e}"));
                state.stream = None;
                state.events = None;
            }
        }
        _ => {
            // No resources to restart with; treat as a clean stop
            state.listening = false;
        }
    }
}

fn handle_error(inner: &Arc<Mutex<Inner>>, message: &str) {
    let mut state = lock_or_recover(inner);
    warn!("engine error: {message}");
    state.error = Some(message.to_owned());
    state.listening = false;
}

/// Commit the pending interim hypothesis into the transcript exactly once
///
/// Appends with a single-space separator when the transcript is non-empty,
/// skips text already finalized, and always leaves interim empty. Returns
/// whether anything was committed.
fn finalize_pending(state: &mut Inner) -> bool {
    if state.interim.is_empty() || state.interim == state.last_finalized {
        state.interim.clear();
        return false;
    }
    if !state.final_transcript.is_empty() {
        state.final_transcript.push(' ');
    }
    let committed = std::mem::take(&mut state.interim);
    state.final_transcript.push_str(&committed);
    debug!(chars = committed.len(), "hypothesis finalized");
    state.last_finalized = committed;
    true
}
