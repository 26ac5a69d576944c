//! Live capture through cpal

use super::{AudioError, AudioSource, SampleStream};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info, warn};

/// Chunks buffered between the device callback and the analysis thread.
/// Older audio is dropped when the analyzer falls behind.
const CHANNEL_CAPACITY: usize = 64;

/// Capture from a system input device
#[derive(Debug, Clone, Default)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    /// The host's default input device
    pub fn default_device() -> Self {
        Self { device_name: None }
    }

    /// The input device called `name`
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    /// Names of all input devices of the default host
    pub fn list_devices() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| device_name(&d)).collect(),
            Err(e) => {
                warn!("Failed to enumerate input devices: {}", e);
                Vec::new()
            }
        }
    }

    fn find_device(&self) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host.default_input_device().ok_or_else(|| {
                AudioError::SourceUnavailable("no default input device".to_string())
            }),
            Some(wanted) => host
                .input_devices()
                .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?
                .find(|d| device_name(d).as_deref() == Some(wanted.as_str()))
                .ok_or_else(|| {
                    AudioError::SourceUnavailable(format!("input device '{}' not found", wanted))
                }),
        }
    }
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

struct CpalStream {
    // Keeps the device running; dropping it stops capture
    _stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
}

impl AudioSource for CpalInput {
    fn name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| "default input".to_string())
    }

    fn open(self: Box<Self>) -> Result<Box<dyn SampleStream>, AudioError> {
        let device = self.find_device()?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?;

        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels.max(1) as usize;
        let sample_rate = config.sample_rate;

        let (sender, receiver) = bounded(CHANNEL_CAPACITY);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, sender),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, sender),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, sender),
            other => {
                return Err(AudioError::SourceUnavailable(format!(
                    "unsupported sample format: {}",
                    other
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?;

        info!(
            "Capturing from {} ({} Hz, {} channels, {:?})",
            device_name(&device).unwrap_or_else(|| self.name()),
            sample_rate,
            channels,
            sample_format
        );

        Ok(Box::new(CpalStream {
            _stream: stream,
            receiver,
            sample_rate,
        }))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sender: Sender<Vec<f32>>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| error!("Input stream error: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| {
                        frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
                    })
                    .collect();
                // Full channel means the analyzer is behind; drop this chunk
                let _ = sender.try_send(mono);
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::SourceUnavailable(e.to_string()))
}

impl SampleStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut Vec<f32>) {
        while let Ok(chunk) = self.receiver.try_recv() {
            out.extend_from_slice(&chunk);
        }
    }
}
