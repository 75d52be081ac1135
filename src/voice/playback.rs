//! Playback of spoken replies

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

use super::codec::{decode_audio, decode_base64_audio};
use super::output::{AudioOutput, OutputNode};
use crate::Result;

/// Shared between the engine and the completion callback of its node
#[derive(Debug, Default)]
struct PlaybackFlag {
    /// Bumped on every play and stop so a stale callback can't clear a
    /// newer playback
    generation: AtomicU64,
    playing: AtomicBool,
    ended: Notify,
}

impl PlaybackFlag {
    fn finish(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.playing.store(false, Ordering::SeqCst);
            self.ended.notify_waiters();
        }
    }
}

/// Decodes encoded replies and plays them one at a time
pub struct PlaybackEngine {
    output: Box<dyn AudioOutput>,
    node: Option<Box<dyn OutputNode>>,
    flag: Arc<PlaybackFlag>,
}

impl PlaybackEngine {
    /// Engine playing through `output`
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            node: None,
            flag: Arc::new(PlaybackFlag::default()),
        }
    }

    /// Whether a reply is currently being spoken
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.flag.playing.load(Ordering::SeqCst)
    }

    /// Decode a base64 reply and start speaking it
    ///
    /// Any playback already in flight is halted first.
    ///
    /// # Errors
    ///
    /// Returns `DecodeFailure` if the payload can't be decoded, or an audio
    /// error if the output refuses it. Either way the engine is left
    /// not playing.
    pub fn play(&mut self, encoded: &str) -> Result<()> {
        self.release_node();

        let generation = self.flag.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.flag.playing.store(true, Ordering::SeqCst);

        match self.start(encoded, generation) {
            Ok(node) => {
                self.node = Some(node);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "reply playback failed");
                self.flag.finish(generation);
                Err(e)
            }
        }
    }

    fn start(&mut self, encoded: &str, generation: u64) -> Result<Box<dyn OutputNode>> {
        let bytes = decode_base64_audio(encoded)?;
        let audio = decode_audio(&bytes)?;

        tracing::debug!(
            bytes = bytes.len(),
            duration_ms = audio.duration().as_millis(),
            "playing reply"
        );

        let flag = Arc::clone(&self.flag);
        self.output
            .start(audio, Box::new(move || flag.finish(generation)))
    }

    /// Halt any playback immediately
    ///
    /// Safe to call when nothing is playing. The engine reports not playing
    /// as soon as this returns.
    pub fn stop(&mut self) {
        self.flag.generation.fetch_add(1, Ordering::SeqCst);
        let was_playing = self.flag.playing.swap(false, Ordering::SeqCst);
        self.release_node();
        self.flag.ended.notify_waiters();

        if was_playing {
            tracing::debug!("playback cancelled");
        }
    }

    /// Release the node of a playback that ended on its own
    pub fn reap(&mut self) {
        if !self.is_playing() && self.node.is_some() {
            self.release_node();
        }
    }

    /// Wait until the current playback has finished or been stopped
    pub async fn wait_until_finished(&self) {
        loop {
            let notified = self.flag.ended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_playing() {
                return;
            }
            notified.await;
        }
    }

    fn release_node(&mut self) {
        if let Some(mut node) = self.node.take() {
            node.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use base64::Engine as _;

    use super::*;
    use crate::Error;
    use crate::voice::codec::{DecodedAudio, samples_to_wav};
    use crate::voice::output::EndedCallback;

    #[derive(Default)]
    struct Calls {
        started: usize,
        stopped: usize,
        ended: Vec<EndedCallback>,
    }

    #[derive(Clone, Default)]
    struct FakeOutput(Arc<Mutex<Calls>>);

    struct FakeNode(Arc<Mutex<Calls>>);

    impl OutputNode for FakeNode {
        fn stop(&mut self) {
            self.0.lock().unwrap().stopped += 1;
        }
    }

    impl AudioOutput for FakeOutput {
        fn start(
            &mut self,
            _audio: DecodedAudio,
            on_ended: EndedCallback,
        ) -> Result<Box<dyn OutputNode>> {
            let mut calls = self.0.lock().unwrap();
            calls.started += 1;
            calls.ended.push(on_ended);
            Ok(Box::new(FakeNode(Arc::clone(&self.0))))
        }
    }

    impl FakeOutput {
        fn end(&self, index: usize) {
            let callback = {
                let mut calls = self.0.lock().unwrap();
                calls.ended.remove(index)
            };
            callback();
        }
    }

    fn encoded_clip() -> String {
        let wav = samples_to_wav(&[0.1; 800], 8_000, 1).unwrap();
        base64::engine::general_purpose::STANDARD.encode(wav)
    }

    #[test]
    fn play_then_natural_end() {
        let output = FakeOutput::default();
        let mut engine = PlaybackEngine::new(Box::new(output.clone()));

        engine.play(&encoded_clip()).unwrap();
        assert!(engine.is_playing());

        output.end(0);
        assert!(!engine.is_playing());

        engine.reap();
        assert_eq!(output.0.lock().unwrap().stopped, 1);
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let output = FakeOutput::default();
        let mut engine = PlaybackEngine::new(Box::new(output.clone()));

        engine.stop();
        engine.stop();
        assert!(!engine.is_playing());
        assert_eq!(output.0.lock().unwrap().stopped, 0);
    }

    #[test]
    fn stop_halts_playback_immediately() {
        let output = FakeOutput::default();
        let mut engine = PlaybackEngine::new(Box::new(output.clone()));

        engine.play(&encoded_clip()).unwrap();
        engine.stop();

        assert!(!engine.is_playing());
        assert_eq!(output.0.lock().unwrap().stopped, 1);
    }

    #[test]
    fn stale_completion_does_not_clear_newer_playback() {
        let output = FakeOutput::default();
        let mut engine = PlaybackEngine::new(Box::new(output.clone()));

        engine.play(&encoded_clip()).unwrap();
        engine.play(&encoded_clip()).unwrap();
        assert_eq!(output.0.lock().unwrap().started, 2);

        // First node's completion arrives late
        output.end(0);
        assert!(engine.is_playing());

        output.end(0);
        assert!(!engine.is_playing());
    }

    #[test]
    fn decode_failure_leaves_engine_idle() {
        let output = FakeOutput::default();
        let mut engine = PlaybackEngine::new(Box::new(output.clone()));

        let err = engine.play("%%% not audio %%%").unwrap_err();
        assert!(matches!(err, Error::DecodeFailure(_)));
        assert!(!engine.is_playing());
        assert_eq!(output.0.lock().unwrap().started, 0);
    }

    #[tokio::test]
    async fn wait_returns_once_stopped() {
        let output = FakeOutput::default();
        let mut engine = PlaybackEngine::new(Box::new(output.clone()));

        engine.play(&encoded_clip()).unwrap();
        output.end(0);
        engine.wait_until_finished().await;
        assert!(!engine.is_playing());
    }
}
