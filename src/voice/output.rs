//! Audio playback to speakers

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, SupportedStreamConfigRange};

use super::codec::{DecodedAudio, resample};
use crate::{Error, Result};

/// Called once when a playback runs to its natural end
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// An audio output graph able to play one-shot clips
pub trait AudioOutput {
    /// Start playing `audio` from offset zero on a fresh output node
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot play the clip
    fn start(&mut self, audio: DecodedAudio, on_ended: EndedCallback)
    -> Result<Box<dyn OutputNode>>;
}

/// A single in-flight playback; dropping it releases the node
pub trait OutputNode {
    /// Halt output immediately. `on_ended` is not called.
    fn stop(&mut self);
}

/// Default output device and its channel layout, created on first use
struct OutputContext {
    device: Device,
    ranges: Vec<SupportedStreamConfigRange>,
}

impl OutputContext {
    fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .collect();

        if ranges.is_empty() {
            return Err(Error::Audio("no suitable output config found".to_string()));
        }

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            configs = ranges.len(),
            "audio output initialized"
        );

        Ok(Self { device, ranges })
    }

    /// Pick a config at `rate`, preferring mono, falling back to the
    /// device's own rate
    fn config_for(&self, rate: u32) -> Result<cpal::StreamConfig> {
        let wanted = SampleRate(rate);
        let fits = |c: &&SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= wanted
                && c.max_sample_rate() >= wanted
        };

        if let Some(range) = self
            .ranges
            .iter()
            .find(|c| fits(c, 1))
            .or_else(|| self.ranges.iter().find(|c| fits(c, 2)))
        {
            return Ok(range.clone().with_sample_rate(wanted).config());
        }

        self.device
            .default_output_config()
            .map(|c| c.config())
            .map_err(|e| Error::Audio(e.to_string()))
    }
}

/// Plays to the default output device via cpal
#[derive(Default)]
pub struct CpalSpeaker {
    context: Option<OutputContext>,
}

impl CpalSpeaker {
    /// Create a speaker; the device is opened on first playback
    #[must_use]
    pub const fn new() -> Self {
        Self { context: None }
    }

    fn context(&mut self) -> Result<&OutputContext> {
        if self.context.is_none() {
            self.context = Some(OutputContext::open()?);
        }
        self.context
            .as_ref()
            .ok_or_else(|| Error::Audio("output context unavailable".to_string()))
    }
}

impl AudioOutput for CpalSpeaker {
    fn start(
        &mut self,
        audio: DecodedAudio,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn OutputNode>> {
        let context = self.context()?;
        let config = context.config_for(audio.sample_rate)?;
        let channels = usize::from(config.channels);

        let samples = resample(&audio.samples, audio.sample_rate, config.sample_rate.0)?;
        let sample_count = samples.len();
        let mut position = 0usize;
        let mut on_ended = Some(on_ended);

        let stream = context
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(position).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        position = position.saturating_add(1);
                    }

                    if position >= samples.len()
                        && let Some(callback) = on_ended.take()
                    {
                        callback();
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!(
            samples = sample_count,
            sample_rate = config.sample_rate.0,
            "playback started"
        );

        Ok(Box::new(CpalOutputNode {
            stream: Some(stream),
        }))
    }
}

struct CpalOutputNode {
    stream: Option<Stream>,
}

impl OutputNode for CpalOutputNode {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "pause before release failed");
            }
            drop(stream);
            tracing::debug!("playback stopped");
        }
    }
}

impl Drop for CpalOutputNode {
    fn drop(&mut self) {
        self.stop();
    }
}
