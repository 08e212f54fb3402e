//! Audio Capture
//!
//! The capture side of the audio loop. A [`CaptureBackend`] opens a
//! [`CaptureStream`] that yields mono analysis frames:
//!
//! ```text
//! cpal callback (any format, N channels)
//!   -> downmix to mono f32
//!   -> rtrb ring buffer (overflow drops samples)
//!   -> CaptureStream::read_frame on the audio thread
//! ```
//!
//! Stream errors raised on the callback thread travel over a bounded
//! channel and surface from the next `read_frame` call.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig as CpalStreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::device::AudioDevice;
use crate::error::{EngineError, EngineResult};
use lumen_dsp::{AnalyzerSettings, AudioSettingsPatch};

/// Analyzer settings shared between the control surface and the audio thread
///
/// All four fields change together under one lock, so a reader never sees a
/// half-applied patch.
#[derive(Debug)]
pub struct SharedAudioSettings {
    inner: Mutex<AnalyzerSettings>,
}

impl SharedAudioSettings {
    pub fn new(settings: AnalyzerSettings) -> Self {
        Self {
            inner: Mutex::new(settings.sanitized()),
        }
    }

    /// Publish new settings; they are sanitized first
    pub fn store(&self, settings: AnalyzerSettings) {
        *self.inner.lock() = settings.sanitized();
    }

    /// Merge `patch` into the current settings and return the result
    pub fn update(&self, patch: &AudioSettingsPatch) -> AnalyzerSettings {
        self.inner.lock().apply(patch)
    }

    pub fn load(&self) -> AnalyzerSettings {
        *self.inner.lock()
    }
}

impl Default for SharedAudioSettings {
    fn default() -> Self {
        Self::new(AnalyzerSettings::default())
    }
}

/// A capture failure reported while reading
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureFault {
    /// Skip this frame and keep going
    Transient(String),
    /// The device is gone; capture cannot continue
    DeviceLost(String),
}

/// Opens capture streams
pub trait CaptureBackend: Send + Sync {
    /// Open the configured input. Called on the audio thread.
    fn open(&self, config: &CaptureConfig) -> EngineResult<Box<dyn CaptureStream>>;
}

/// An open mono input stream
pub trait CaptureStream {
    fn device_name(&self) -> &str;

    /// Actual sample rate, which may differ from the requested one
    fn sample_rate(&self) -> u32;

    /// Fill `frame` with the next samples. `Ok(false)` means not enough data
    /// has arrived yet.
    fn read_frame(&mut self, frame: &mut [f32]) -> Result<bool, CaptureFault>;
}

/// Microphone capture through cpal
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CaptureBackend for CpalBackend {
    fn open(&self, config: &CaptureConfig) -> EngineResult<Box<dyn CaptureStream>> {
        let device = AudioDevice::find_cpal_input(config.device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let default_config = device
            .default_input_config()
            .map_err(|e| EngineError::StreamBuildError(e.to_string()))?;
        let channels = default_config.channels();
        let sample_format = default_config.sample_format();
        let sample_rate = supported_rate(&device, config.sample_rate, channels, sample_format)
            .unwrap_or_else(|| {
                let fallback = default_config.sample_rate().0;
                info!(
                    requested = config.sample_rate,
                    fallback, "Sample rate not supported by device, using its default"
                );
                fallback
            });

        let stream_config = CpalStreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (producer, consumer) = RingBuffer::<f32>::new(config.ring_capacity());
        let (fault_tx, faults) = bounded(16);

        let stream = match sample_format {
            SampleFormat::F32 => build_input::<f32>(&device, &stream_config, producer, fault_tx),
            SampleFormat::I16 => build_input::<i16>(&device, &stream_config, producer, fault_tx),
            SampleFormat::U16 => build_input::<u16>(&device, &stream_config, producer, fault_tx),
            SampleFormat::I32 => build_input::<i32>(&device, &stream_config, producer, fault_tx),
            other => {
                return Err(EngineError::StreamBuildError(format!(
                    "Unsupported sample format: {other}"
                )))
            }
        }?;
        stream
            .play()
            .map_err(|e| EngineError::StreamPlayError(e.to_string()))?;

        info!(
            device = %device_name,
            sample_rate,
            channels,
            format = %sample_format,
            "Audio capture opened"
        );

        Ok(Box::new(CpalStream {
            _stream: stream,
            consumer,
            faults,
            device_name,
            sample_rate,
        }))
    }
}

/// Whether the device accepts `rate` for this channel count and format
fn supported_rate(device: &Device, rate: u32, channels: u16, format: SampleFormat) -> Option<u32> {
    let mut ranges = device.supported_input_configs().ok()?;
    ranges
        .any(|range| {
            range.channels() == channels
                && range.sample_format() == format
                && range.min_sample_rate().0 <= rate
                && rate <= range.max_sample_rate().0
        })
        .then_some(rate)
}

fn build_input<T>(
    device: &Device,
    config: &CpalStreamConfig,
    mut producer: Producer<f32>,
    faults: Sender<CaptureFault>,
) -> EngineResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Real-time callback: no allocation, no locking
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
                    // A full ring drops the sample
                    let _ = producer.push(sum / frame.len() as f32);
                }
            },
            move |err| {
                let fault = if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                    CaptureFault::DeviceLost(err.to_string())
                } else {
                    CaptureFault::Transient(err.to_string())
                };
                let _ = faults.try_send(fault);
            },
            None,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}

struct CpalStream {
    // Held to keep the callback running
    _stream: Stream,
    consumer: Consumer<f32>,
    faults: Receiver<CaptureFault>,
    device_name: String,
    sample_rate: u32,
}

impl CaptureStream for CpalStream {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frame(&mut self, frame: &mut [f32]) -> Result<bool, CaptureFault> {
        if let Ok(fault) = self.faults.try_recv() {
            return Err(fault);
        }
        read_ring(&mut self.consumer, frame)
    }
}

/// Copy one frame out of the ring, skipping stale frames so at most one
/// frame of backlog remains
fn read_ring(consumer: &mut Consumer<f32>, frame: &mut [f32]) -> Result<bool, CaptureFault> {
    let len = frame.len();
    if consumer.slots() < len {
        return Ok(false);
    }

    let mut skipped = 0;
    while consumer.slots() >= 3 * len {
        if let Ok(stale) = consumer.read_chunk(len) {
            stale.commit_all();
            skipped += 1;
        }
    }
    if skipped > 0 {
        debug!(frames = skipped, "Analysis behind capture, skipped stale frames");
    }

    let chunk = consumer
        .read_chunk(len)
        .map_err(|e| CaptureFault::Transient(e.to_string()))?;
    let (head, tail) = chunk.as_slices();
    frame[..head.len()].copy_from_slice(head);
    frame[head.len()..].copy_from_slice(tail);
    chunk.commit_all();
    Ok(true)
}
