//! Microphone recording lifecycle
//!
//! `idle → recording → idle`. The device is held only while recording.

use std::time::{Duration, Instant};

use super::capture::{CaptureConstraints, CaptureStream, FragmentSink, Microphone};
use super::codec::{AudioBlob, finalize_recording};
use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Recorder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

struct ActiveRecording {
    stream: Box<dyn CaptureStream>,
    sink: FragmentSink,
    started_at: Instant,
}

/// Owns the capture device while a recording is in progress
pub struct RecordingController {
    microphone: Box<dyn Microphone>,
    constraints: CaptureConstraints,
    time_slice: Duration,
    active: Option<ActiveRecording>,
}

impl RecordingController {
    /// Recorder capturing mono audio with the configured rate and slicing
    #[must_use]
    pub fn new(microphone: Box<dyn Microphone>, config: &VoiceConfig) -> Self {
        Self {
            microphone,
            constraints: CaptureConstraints {
                sample_rate: config.sample_rate,
                channels: 1,
                echo_cancellation: config.echo_cancellation,
                noise_suppression: config.noise_suppression,
            },
            time_slice: config.time_slice,
            active: None,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> RecorderState {
        if self.active.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    /// Whether the device is held and capturing
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Acquire the microphone and start accumulating fragments
    ///
    /// `on_acquired` runs after the device is granted and before capture
    /// begins; the widget uses it to silence playback.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the device can't be acquired or
    /// started. The recorder stays idle.
    pub fn start(&mut self, on_acquired: impl FnOnce()) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }

        let mut stream = self
            .microphone
            .acquire(&self.constraints)
            .map_err(into_device_error)?;

        on_acquired();

        let sink = FragmentSink::new(&self.constraints, self.time_slice);
        stream.begin(sink.clone()).map_err(into_device_error)?;

        tracing::info!(
            sample_rate = self.constraints.sample_rate,
            slice_ms = self.time_slice.as_millis(),
            "recording started"
        );

        self.active = Some(ActiveRecording {
            stream,
            sink,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Release the microphone and finalize the recording
    ///
    /// Returns `None` if nothing was captured, in which case there is
    /// nothing to upload.
    ///
    /// # Errors
    ///
    /// Returns error if the captured audio can't be encoded. The device is
    /// released regardless.
    pub fn stop(&mut self) -> Result<Option<AudioBlob>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        let ActiveRecording {
            stream,
            sink,
            started_at,
        } = active;
        drop(stream);

        sink.flush();
        let fragments = sink.drain();

        tracing::info!(
            fragments = fragments.len(),
            elapsed_ms = started_at.elapsed().as_millis(),
            "recording stopped"
        );

        if fragments.is_empty() {
            return Ok(None);
        }

        finalize_recording(
            &fragments,
            self.constraints.sample_rate,
            self.constraints.channels,
        )
        .map(Some)
    }

    /// Release the microphone and throw the recording away
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            drop(active.stream);
            let discarded = active.sink.drain().len();
            tracing::debug!(fragments = discarded, "recording discarded");
        }
    }
}

fn into_device_error(err: Error) -> Error {
    match err {
        Error::DeviceUnavailable(_) => err,
        other => Error::DeviceUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct MicState {
        acquired: usize,
        released: usize,
        sink: Option<FragmentSink>,
        deny: bool,
    }

    #[derive(Clone, Default)]
    struct FakeMic(Arc<Mutex<MicState>>);

    struct FakeStream(Arc<Mutex<MicState>>);

    impl Microphone for FakeMic {
        fn acquire(
            &mut self,
            _constraints: &CaptureConstraints,
        ) -> Result<Box<dyn CaptureStream>> {
            let mut state = self.0.lock().unwrap();
            if state.deny {
                return Err(Error::Audio("permission denied".into()));
            }
            state.acquired += 1;
            Ok(Box::new(FakeStream(Arc::clone(&self.0))))
        }
    }

    impl CaptureStream for FakeStream {
        fn begin(&mut self, sink: FragmentSink) -> Result<()> {
            self.0.lock().unwrap().sink = Some(sink);
            Ok(())
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.0.lock().unwrap().released += 1;
        }
    }

    impl FakeMic {
        fn speak(&self, samples: usize) {
            let sink = self.0.lock().unwrap().sink.clone().unwrap();
            sink.push(&vec![0.2; samples]);
        }
    }

    fn controller(mic: &FakeMic) -> RecordingController {
        RecordingController::new(Box::new(mic.clone()), &VoiceConfig::default())
    }

    #[test]
    fn start_and_stop_round_trip() {
        let mic = FakeMic::default();
        let mut recorder = controller(&mic);
        let mut preempted = false;

        recorder.start(|| preempted = true).unwrap();
        assert!(preempted);
        assert_eq!(recorder.state(), RecorderState::Recording);

        mic.speak(4000);
        let blob = recorder.stop().unwrap().expect("audio captured");
        assert_eq!(blob.mime_type, "audio/wav");
        assert_eq!(recorder.state(), RecorderState::Idle);

        let state = mic.0.lock().unwrap();
        assert_eq!(state.acquired, 1);
        assert_eq!(state.released, 1);
    }

    #[test]
    fn denied_device_stays_idle() {
        let mic = FakeMic::default();
        mic.0.lock().unwrap().deny = true;
        let mut recorder = controller(&mic);
        let mut preempted = false;

        let err = recorder.start(|| preempted = true).unwrap_err();
        assert!(matches!(err, Error::DeviceUnavailable(_)));
        assert!(!preempted);
        assert_eq!(recorder.state(), RecorderState::Idle);
    }

    #[test]
    fn stop_without_audio_yields_nothing() {
        let mic = FakeMic::default();
        let mut recorder = controller(&mic);

        recorder.start(|| {}).unwrap();
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(mic.0.lock().unwrap().released, 1);
    }

    #[test]
    fn short_recording_still_finalizes() {
        let mic = FakeMic::default();
        let mut recorder = controller(&mic);

        recorder.start(|| {}).unwrap();
        mic.speak(10);
        assert!(recorder.stop().unwrap().is_some());
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let mic = FakeMic::default();
        let mut recorder = controller(&mic);
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(mic.0.lock().unwrap().released, 0);
    }

    #[test]
    fn cancel_releases_device_and_discards() {
        let mic = FakeMic::default();
        let mut recorder = controller(&mic);

        recorder.start(|| {}).unwrap();
        mic.speak(3200);
        recorder.cancel();

        assert!(!recorder.is_recording());
        assert_eq!(mic.0.lock().unwrap().released, 1);
        assert!(recorder.stop().unwrap().is_none());
    }
}
