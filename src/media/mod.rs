//! Platform audio layer: the [`MediaBackend`] seam the acquisition
//! negotiator probes against, plus the [`AudioStream`] resource it hands out.

/// CPAL-backed implementation of [`MediaBackend`]
pub mod capture;

pub use capture::CpalBackend;

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Sample rate the recognizer consumes
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16_000;

/// Errors from the platform audio layer
#[derive(Debug, Error)]
pub enum MediaError {
    /// No usable audio input device on the host
    #[error("no audio input device available")]
    NoDevice,
    /// The host refused access to audio devices
    #[error("audio device access denied: {0}")]
    AccessDenied(String),
    /// Stream construction or startup failed
    #[error("failed to open audio stream: {0}")]
    StreamOpen(String),
}

/// Current microphone permission grant, as far as the platform can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    /// Access has been granted; a request will not prompt
    Granted,
    /// Access has been refused; a request will fail
    Denied,
    /// Undetermined; a request may prompt the user
    Prompt,
}

/// One discovered audio input device
#[derive(Debug, Clone)]
pub struct InputDevice {
    /// Human-readable device name
    pub name: String,
}

/// Quality constraints for a stream request
///
/// The DSP flags are advisory on desktop hosts; the sample rate is honored
/// when the device supports it.
#[derive(Debug, Clone, Default)]
pub struct StreamConstraints {
    /// Request echo cancellation
    pub echo_cancellation: bool,
    /// Request noise suppression
    pub noise_suppression: bool,
    /// Request automatic gain control
    pub auto_gain: bool,
    /// Preferred sample rate in Hz
    pub sample_rate: Option<u32>,
}

impl StreamConstraints {
    /// Constraints tuned for speech capture
    #[must_use]
    pub const fn voice() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain: true,
            sample_rate: Some(RECOGNIZER_SAMPLE_RATE),
        }
    }
}

/// Platform operations the acquisition strategies are built on
///
/// Implementations must be cheap to share; probes call these from blocking
/// tasks. [`CpalBackend`] is the production implementation.
#[cfg_attr(test, mockall::automock)]
pub trait MediaBackend: Send + Sync {
    /// Query the current microphone permission state without prompting
    ///
    /// # Errors
    /// Returns error if the platform cannot be queried at all
    fn query_permission(&self) -> Result<PermissionState, MediaError>;

    /// Enumerate available audio input devices
    ///
    /// # Errors
    /// Returns error if device discovery fails
    fn enumerate_inputs(&self) -> Result<Vec<InputDevice>, MediaError>;

    /// Open a live capture stream
    ///
    /// # Errors
    /// Returns error if no device is available or the stream cannot start
    fn open_stream(&self, constraints: &StreamConstraints) -> Result<AudioStream, MediaError>;
}

/// Producer half of an [`AudioStream`], held by the capture callback
pub struct StreamProducer {
    queue: HeapProd<f32>,
    active: Arc<AtomicBool>,
}

impl StreamProducer {
    /// Push captured samples; returns how many were accepted
    pub fn push(&mut self, samples: &[f32]) -> usize {
        self.queue.push_slice(samples)
    }

    /// Whether the consumer side still wants samples
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// A live microphone stream
///
/// Samples flow from the capture callback through a lock-free queue; engines
/// drain them with [`AudioStream::drain`]. Closing (or dropping the last
/// reference) deactivates the stream and runs the backend's close handler,
/// which releases the underlying device.
pub struct AudioStream {
    samples: Mutex<HeapCons<f32>>,
    active: Arc<AtomicBool>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    sample_rate: u32,
    channels: u16,
}

impl AudioStream {
    /// Create a stream handle plus the producer half that feeds it
    ///
    /// Used by backends wiring a capture callback, and by tests scripting
    /// audio input.
    #[must_use]
    pub fn channel(capacity: usize, sample_rate: u32, channels: u16) -> (StreamProducer, Self) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        let active = Arc::new(AtomicBool::new(true));
        let stream = Self {
            samples: Mutex::new(consumer),
            active: Arc::clone(&active),
            on_close: Mutex::new(None),
            sample_rate,
            channels,
        };
        let producer = StreamProducer {
            queue: producer,
            active,
        };
        (producer, stream)
    }

    /// Register the teardown hook run once on close
    pub fn set_close_handler(&self, handler: impl FnOnce() + Send + 'static) {
        *lock_or_recover(&self.on_close) = Some(Box::new(handler));
    }

    /// Whether the stream is still delivering samples
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Device sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Take every sample captured since the last drain
    pub fn drain(&self) -> Vec<f32> {
        let mut consumer = lock_or_recover(&self.samples);
        let mut out = Vec::new();
        while let Some(sample) = consumer.try_pop() {
            out.push(sample);
        }
        out
    }

    /// Stop the stream and release the device
    pub fn close(&self) {
        self.active.store(false, Ordering::Relaxed);
        if let Some(handler) = lock_or_recover(&self.on_close).take() {
            handler();
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("active", &self.is_active())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Lock a mutex, recovering the data from a poisoned guard
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Average interleaved frames down to a single channel
#[must_use]
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resample from `from_rate` to `to_rate`
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = (i as f64) * ratio;
        let idx = pos as usize;
        let frac = (pos - pos.floor()) as f32;
        let a = samples[idx];
        let b = samples[(idx + 1).min(samples.len() - 1)];
        out.push(a + (b - a) * frac);
    }
    out
}

/// Convert raw interleaved device samples into recognizer input (16 kHz mono)
#[must_use]
pub fn to_recognizer_input(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<f32> {
    let mono = downmix_to_mono(samples, channels);
    resample_linear(&mono, sample_rate, RECOGNIZER_SAMPLE_RATE)
}

/// Root-mean-square amplitude of a sample block
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
