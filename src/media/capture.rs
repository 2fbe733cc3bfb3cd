use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info, warn};

use super::{
    AudioStream, InputDevice, MediaBackend, MediaError, PermissionState, StreamConstraints,
};
use crate::config::AudioConfig;

/// Microphone access through the host's default CPAL backend
///
/// Each opened stream lives on a dedicated thread (CPAL streams are not
/// `Send`); the returned [`AudioStream`] handle signals that thread to drop
/// the stream when closed.
pub struct CpalBackend {
    buffer_secs: usize,
}

impl CpalBackend {
    /// Create a backend using the configured ring buffer sizing
    #[must_use]
    pub const fn new(config: &AudioConfig) -> Self {
        Self {
            buffer_secs: config.buffer_secs,
        }
    }

    /// Pick a stream config, honoring a requested sample rate when supported
    fn pick_config(
        device: &cpal::Device,
        desired_rate: Option<u32>,
    ) -> Result<cpal::SupportedStreamConfig, MediaError> {
        if let Some(rate) = desired_rate {
            if let Ok(ranges) = device.supported_input_configs() {
                for range in ranges {
                    if let Some(config) = range.try_with_sample_rate(rate) {
                        debug!(rate, "device accepted requested sample rate");
                        return Ok(config);
                    }
                }
            }
            debug!(rate, "requested sample rate unsupported, using device default");
        }

        device
            .default_input_config()
            .map_err(|e| MediaError::AccessDenied(e.to_string()))
    }
}

impl MediaBackend for CpalBackend {
    fn query_permission(&self) -> Result<PermissionState, MediaError> {
        // Desktop hosts have no explicit permission query; probing the
        // default device's config is the closest observable signal.
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            return Ok(PermissionState::Prompt);
        };

        match device.default_input_config() {
            Ok(_) => Ok(PermissionState::Granted),
            Err(cpal::DefaultStreamConfigError::DeviceNotAvailable) => {
                Ok(PermissionState::Denied)
            }
            Err(e) => {
                debug!("permission query inconclusive: {e}");
                Ok(PermissionState::Prompt)
            }
        }
    }

    fn enumerate_inputs(&self) -> Result<Vec<InputDevice>, MediaError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| MediaError::AccessDenied(e.to_string()))?;

        let inputs: Vec<InputDevice> = devices
            .map(|device| InputDevice {
                name: device.name().unwrap_or_else(|_| "unknown".to_owned()),
            })
            .collect();

        debug!(count = inputs.len(), "enumerated audio inputs");
        Ok(inputs)
    }

    fn open_stream(&self, constraints: &StreamConstraints) -> Result<AudioStream, MediaError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(MediaError::NoDevice)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_owned());

        let supported = Self::pick_config(&device, constraints.sample_rate)?;
        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        if constraints.echo_cancellation || constraints.noise_suppression || constraints.auto_gain {
            // CPAL exposes no DSP knobs; the host applies its own processing.
            debug!("quality constraints requested (advisory on this host)");
        }

        info!(
            device = %device_name,
            sample_rate,
            channels,
            "opening input stream"
        );

        let capacity = sample_rate as usize * usize::from(channels) * self.buffer_secs;
        let (mut producer, handle) = AudioStream::channel(capacity, sample_rate, channels);

        let stream_config: cpal::StreamConfig = supported.into();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), MediaError>>();
        let (close_tx, close_rx) = mpsc::channel::<()>();

        thread::spawn(move || {
            let built = device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if producer.is_active() {
                        let pushed = producer.push(data);
                        if pushed < data.len() {
                            warn!("capture queue full, dropped {} samples", data.len() - pushed);
                        }
                    }
                },
                move |err| {
                    warn!("audio stream error: {err}");
                },
                None,
            );

            let stream = match built {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(MediaError::StreamOpen(e.to_string())));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(MediaError::StreamOpen(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Park until the handle is closed, then drop the stream with
            // this thread to release the device.
            let _ = close_rx.recv();
            drop(stream);
            debug!("input stream released");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(MediaError::StreamOpen("audio thread exited".to_owned()));
            }
        }

        handle.set_close_handler(move || {
            let _ = close_tx.send(());
        });

        Ok(handle)
    }
}
