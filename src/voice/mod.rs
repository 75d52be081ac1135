//! Voice processing module
//!
//! Handles microphone capture, upload of finished recordings, and playback
//! of spoken replies. Devices sit behind the `Microphone` and `AudioOutput`
//! traits; the cpal implementations are the defaults.

mod capture;
mod codec;
mod output;
mod pipeline;
mod playback;
mod recorder;

pub use capture::{CaptureConstraints, CaptureStream, CpalMicrophone, FragmentSink, Microphone};
pub use codec::{
    AudioBlob, AudioFragment, DecodedAudio, decode_audio, decode_base64_audio,
    finalize_recording, resample, samples_to_wav,
};
pub use output::{AudioOutput, CpalSpeaker, EndedCallback, OutputNode};
pub use pipeline::{InFlight, VoicePipeline, VoiceReplyHandler, dispatch_reply};
pub use playback::PlaybackEngine;
pub use recorder::{RecorderState, RecordingController};
