//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::codec::AudioFragment;
use crate::{Error, Result};

/// What the recorder asks of the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// A source of capture devices
pub trait Microphone {
    /// Acquire exclusive access to the capture device
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or access is refused
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>>;
}

/// An acquired capture device; dropping it releases the device
pub trait CaptureStream {
    /// Begin delivering samples into `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to start
    fn begin(&mut self, sink: FragmentSink) -> Result<()>;
}

#[derive(Debug, Default)]
struct FragmentBuffer {
    pending: Vec<f32>,
    fragments: Vec<AudioFragment>,
}

/// Accumulates captured samples and cuts them into fixed time slices
///
/// Cloned into the device callback; the recorder keeps the other handle.
#[derive(Debug, Clone)]
pub struct FragmentSink {
    inner: Arc<Mutex<FragmentBuffer>>,
    slice_len: usize,
}

impl FragmentSink {
    /// Create a sink cutting a fragment every `time_slice` of audio
    #[must_use]
    pub fn new(constraints: &CaptureConstraints, time_slice: Duration) -> Self {
        let per_second = u128::from(constraints.sample_rate) * u128::from(constraints.channels);
        let slice_len = usize::try_from(per_second * time_slice.as_millis() / 1000)
            .unwrap_or(usize::MAX)
            .max(1);

        Self {
            inner: Arc::new(Mutex::new(FragmentBuffer::default())),
            slice_len,
        }
    }

    /// Number of samples per fragment
    #[must_use]
    pub const fn slice_len(&self) -> usize {
        self.slice_len
    }

    /// Append captured samples, cutting complete fragments as they fill
    pub fn push(&self, data: &[f32]) {
        let Ok(mut buf) = self.inner.lock() else {
            return;
        };

        buf.pending.extend_from_slice(data);
        while buf.pending.len() >= self.slice_len {
            let rest = buf.pending.split_off(self.slice_len);
            let fragment = std::mem::replace(&mut buf.pending, rest);
            buf.fragments.push(fragment);
        }
    }

    /// Emit whatever partial slice is pending as a final fragment
    pub fn flush(&self) {
        if let Ok(mut buf) = self.inner.lock()
            && !buf.pending.is_empty()
        {
            let fragment = std::mem::take(&mut buf.pending);
            buf.fragments.push(fragment);
        }
    }

    /// Take all completed fragments, oldest first
    #[must_use]
    pub fn drain(&self) -> Vec<AudioFragment> {
        self.inner
            .lock()
            .map(|mut buf| std::mem::take(&mut buf.fragments))
            .unwrap_or_default()
    }

    /// Number of completed fragments so far
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.inner.lock().map(|buf| buf.fragments.len()).unwrap_or(0)
    }
}

/// Captures from the default input device via cpal
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let rate = SampleRate(constraints.sample_rate);
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .find(|c| {
                c.channels() == constraints.channels
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
            .ok_or_else(|| {
                Error::DeviceUnavailable("no suitable audio config found".to_string())
            })?;

        let config = supported_config.with_sample_rate(rate).config();

        // cpal exposes no DSP controls; the platform's defaults apply
        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = constraints.sample_rate,
            channels = config.channels,
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            "audio capture acquired"
        );

        Ok(Box::new(CpalCaptureStream {
            device,
            config,
            stream: None,
        }))
    }
}

struct CpalCaptureStream {
    device: cpal::Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl CaptureStream for CpalCaptureStream {
    fn begin(&mut self, sink: FragmentSink) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| sink.push(data),
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(rate: u32, slice_ms: u64) -> FragmentSink {
        let constraints = CaptureConstraints {
            sample_rate: rate,
            ..CaptureConstraints::default()
        };
        FragmentSink::new(&constraints, Duration::from_millis(slice_ms))
    }

    #[test]
    fn slice_len_matches_time_slice() {
        assert_eq!(sink(16_000, 100).slice_len(), 1600);
        assert_eq!(sink(48_000, 20).slice_len(), 960);
    }

    #[test]
    fn push_cuts_complete_fragments() {
        let sink = sink(1_000, 100);
        sink.push(&[0.1; 250]);

        assert_eq!(sink.fragment_count(), 2);
        let fragments = sink.drain();
        assert_eq!(fragments.len(), 2);
        assert!(fragments.iter().all(|f| f.len() == 100));

        // The 50-sample remainder only appears on flush
        assert!(sink.drain().is_empty());
        sink.flush();
        let tail = sink.drain();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].len(), 50);
    }

    #[test]
    fn flush_without_pending_adds_nothing() {
        let sink = sink(1_000, 100);
        sink.flush();
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn fragments_keep_sample_order() {
        let sink = sink(1_000, 10);
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..30).map(|i| i as f32).collect();
        sink.push(&samples[..15]);
        sink.push(&samples[15..]);

        let joined: Vec<f32> = sink.drain().into_iter().flatten().collect();
        assert_eq!(joined, samples);
    }
}
