//! Voice upload and reply dispatch

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::codec::AudioBlob;
use crate::Result;
use crate::backend::{Backend, VoiceReply};

/// Receives the parts of a voice reply
pub trait VoiceReplyHandler {
    /// What the user said
    fn on_transcription(&mut self, text: String);
    /// What the assistant answered
    fn on_response(&mut self, text: String);
    /// Base64-encoded spoken answer
    fn on_audio(&mut self, encoded: String);
}

/// Uploads finished recordings to the voice endpoint
pub struct VoicePipeline {
    backend: Arc<dyn Backend>,
    in_flight: Arc<AtomicBool>,
}

/// Marks the pipeline busy until dropped
pub struct InFlight {
    backend: Arc<dyn Backend>,
    flag: Arc<AtomicBool>,
}

impl VoicePipeline {
    /// Pipeline uploading through `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an upload is awaiting its reply
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Enter the processing phase; it ends when the returned guard drops
    #[must_use]
    pub fn begin(&self) -> InFlight {
        self.in_flight.store(true, Ordering::SeqCst);
        InFlight {
            backend: Arc::clone(&self.backend),
            flag: Arc::clone(&self.in_flight),
        }
    }

    /// Upload a recording and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns `NetworkFailure` if the endpoint can't be reached or rejects
    /// the upload
    pub async fn process(&self, audio: &AudioBlob, session_id: Option<&str>) -> Result<VoiceReply> {
        self.begin().upload(audio, session_id).await
    }
}

impl InFlight {
    /// Upload a recording and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns `NetworkFailure` if the endpoint can't be reached or rejects
    /// the upload
    pub async fn upload(&self, audio: &AudioBlob, session_id: Option<&str>) -> Result<VoiceReply> {
        self.backend.process_voice(audio, session_id).await
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Hand each present, non-empty field of `reply` to `handler`
///
/// Order is transcription, response, audio, so the log reads user then
/// assistant before speech starts.
pub fn dispatch_reply(reply: VoiceReply, handler: &mut impl VoiceReplyHandler) {
    let present = |field: Option<String>| field.filter(|s| !s.trim().is_empty());

    if let Some(text) = present(reply.transcription) {
        handler.on_transcription(text);
    }
    if let Some(text) = present(reply.response) {
        handler.on_response(text);
    }
    if let Some(audio) = present(reply.audio) {
        handler.on_audio(audio);
    }
}
