//! Chat widget state machine
//!
//! `ChatWidget` is a plain state container: current values, explicit
//! mutation methods, and a broadcast of [`WidgetEvent`]s for whatever
//! renders it. Every operation takes `&mut self`, so no conflicting command
//! can run while a send or upload is awaiting its reply; observers see the
//! in-flight phase through the events.
//!
//! Errors never escape the widget. They are logged, stored as a
//! dismissable message, and broadcast.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::backend::{Backend, ChatRequest, HttpBackend};
use crate::config::{Config, NEW_SESSION_SENTINEL, Suggestion, VoiceConfig, WidgetConfig};
use crate::messages::{Message, MessageLog, Role};
use crate::session::{FileSessionStore, SessionStore};
use crate::voice::{
    AudioBlob, AudioOutput, CpalMicrophone, CpalSpeaker, Microphone, PlaybackEngine,
    RecordingController, VoicePipeline, VoiceReplyHandler, dispatch_reply,
};
use crate::Result;

/// Broadcast channel capacity
const CHANNEL_CAPACITY: usize = 64;

/// Shown in the log when a text send fails
pub const SEND_FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Recorded as the error when a text send fails
pub const SEND_FAILED_ERROR: &str = "Failed to send message. Please try again.";

/// Whether the widget panel is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetState {
    Closed,
    Open,
    Minimized,
}

/// How the user is talking to the assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Text,
    Voice,
}

/// What the voice side of the widget is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl std::fmt::Display for VoiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

/// Derive the voice mode from the three phase flags
///
/// Recording wins over playing, which wins over processing.
#[must_use]
pub const fn derive_voice_mode(recording: bool, playing: bool, processing: bool) -> VoiceMode {
    if recording {
        VoiceMode::Listening
    } else if playing {
        VoiceMode::Speaking
    } else if processing {
        VoiceMode::Processing
    } else {
        VoiceMode::Idle
    }
}

/// Point-in-time view of everything a renderer needs besides the messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetSnapshot {
    pub state: WidgetState,
    pub input_mode: InputMode,
    pub voice_mode: VoiceMode,
    pub is_sending: bool,
    pub has_unread: bool,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub message_count: usize,
}

/// Change notification
#[derive(Debug, Clone)]
pub enum WidgetEvent {
    /// Any state besides the log changed
    StateChanged(WidgetSnapshot),
    /// A message was appended to the log
    MessageAppended(Message),
    /// A recoverable error was recorded
    Error(String),
}

/// Device and backend collaborators of a widget
pub struct WidgetParts {
    pub backend: Arc<dyn Backend>,
    pub session: Box<dyn SessionStore>,
    pub microphone: Box<dyn Microphone>,
    pub output: Box<dyn AudioOutput>,
}

/// Voice-enabled chat widget
pub struct ChatWidget {
    state: WidgetState,
    input_mode: InputMode,
    has_unread: bool,
    sending: bool,
    last_error: Option<String>,
    backend: Arc<dyn Backend>,
    session: Box<dyn SessionStore>,
    log: MessageLog,
    recorder: RecordingController,
    pipeline: VoicePipeline,
    playback: PlaybackEngine,
    voice_enabled: bool,
    presentation: WidgetConfig,
    events: broadcast::Sender<WidgetEvent>,
}

impl ChatWidget {
    /// Assemble a widget from its collaborators
    #[must_use]
    pub fn new(parts: WidgetParts, voice: &VoiceConfig, presentation: WidgetConfig) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let WidgetParts {
            backend,
            session,
            microphone,
            output,
        } = parts;

        Self {
            state: WidgetState::Closed,
            input_mode: InputMode::Text,
            has_unread: false,
            sending: false,
            last_error: None,
            pipeline: VoicePipeline::new(Arc::clone(&backend)),
            backend,
            session,
            log: MessageLog::new(),
            recorder: RecordingController::new(microphone, voice),
            playback: PlaybackEngine::new(output),
            voice_enabled: voice.enabled,
            presentation,
            events,
        }
    }

    /// Widget wired to the HTTP backend, the on-disk session file and the
    /// default audio devices
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = HttpBackend::new(config.backend.clone())?;
        let parts = WidgetParts {
            backend: Arc::new(backend),
            session: Box::new(FileSessionStore::open(config.session_file())),
            microphone: Box::new(CpalMicrophone::new()),
            output: Box::new(CpalSpeaker::new()),
        };
        Ok(Self::new(parts, &config.voice, config.widget.clone()))
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WidgetEvent> {
        self.events.subscribe()
    }

    // -- accessors ------------------------------------------------------------

    /// Whether the panel is closed, open or minimized
    #[must_use]
    pub const fn state(&self) -> WidgetState {
        self.state
    }

    /// Whether the user is typing or talking
    #[must_use]
    pub const fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    /// Whether an assistant message arrived while the panel was not open
    #[must_use]
    pub const fn has_unread(&self) -> bool {
        self.has_unread
    }

    /// Whether a text send is awaiting its reply
    #[must_use]
    pub const fn is_sending(&self) -> bool {
        self.sending
    }

    /// Whether the microphone is capturing
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Whether a recording upload is awaiting its reply
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.pipeline.is_processing()
    }

    /// Whether a spoken reply is playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    /// Most recent unacknowledged error
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// All messages, oldest first
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.log.all()
    }

    /// Backend-assigned conversation identity, if any
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session.get()
    }

    /// Display name of the assistant
    #[must_use]
    pub fn assistant_name(&self) -> &str {
        &self.presentation.assistant_name
    }

    /// Greeting shown on an empty conversation
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.presentation.greeting
    }

    /// Quick prompts offered on an empty conversation
    #[must_use]
    pub fn suggestions(&self) -> &[Suggestion] {
        &self.presentation.suggestions
    }

    /// Current voice mode, derived on every call
    #[must_use]
    pub fn voice_mode(&self) -> VoiceMode {
        derive_voice_mode(
            self.recorder.is_recording(),
            self.playback.is_playing(),
            self.pipeline.is_processing(),
        )
    }

    /// Everything a renderer needs besides the message list
    #[must_use]
    pub fn snapshot(&self) -> WidgetSnapshot {
        WidgetSnapshot {
            state: self.state,
            input_mode: self.input_mode,
            voice_mode: self.voice_mode(),
            is_sending: self.sending,
            has_unread: self.has_unread,
            session_id: self.session.get(),
            error: self.last_error.clone(),
            message_count: self.log.len(),
        }
    }

    // -- panel ----------------------------------------------------------------

    /// Show the panel and mark everything read
    pub fn open(&mut self) {
        self.playback.reap();
        self.state = WidgetState::Open;
        self.has_unread = false;
        self.notify();
    }

    /// Hide the panel
    pub fn close(&mut self) {
        self.playback.reap();
        self.state = WidgetState::Closed;
        self.notify();
    }

    /// Collapse the panel to its launcher
    pub fn minimize(&mut self) {
        self.playback.reap();
        self.state = WidgetState::Minimized;
        self.notify();
    }

    /// Switch between typing and talking
    ///
    /// Leaving voice mode mid-recording discards the recording.
    pub fn set_input_mode(&mut self, mode: InputMode) {
        self.playback.reap();
        if mode == self.input_mode {
            return;
        }
        if mode == InputMode::Voice && !self.voice_enabled {
            self.record_error("Voice input is disabled".to_string());
            return;
        }
        if mode == InputMode::Text {
            self.recorder.cancel();
        }
        self.input_mode = mode;
        self.notify();
    }

    /// Dismiss the current error
    pub fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            self.notify();
        }
    }

    /// Forget the session and start an empty conversation
    pub fn clear_session(&mut self) {
        self.recorder.cancel();
        self.playback.stop();
        if let Err(e) = self.session.clear() {
            tracing::warn!(error = %e, "failed to clear persisted session");
        }
        self.log = MessageLog::new();
        self.has_unread = false;
        self.last_error = None;
        tracing::info!("session cleared");
        self.notify();
    }

    /// Release playback nodes that finished on their own and publish the
    /// resulting state
    pub fn refresh(&mut self) {
        self.playback.reap();
        self.notify();
    }

    // -- text -----------------------------------------------------------------

    /// Send a typed message
    ///
    /// Blank text, or a send while another is in flight, is ignored. The
    /// user message is shown immediately and stays even if the send fails.
    #[allow(clippy::future_not_send)]
    pub async fn send(&mut self, text: &str) {
        self.playback.reap();
        let content = text.trim();
        if content.is_empty() || self.sending {
            return;
        }

        self.sending = true;
        self.last_error = None;
        self.append(Message::user(content));
        self.notify();

        let current = self.session.get();
        let request = ChatRequest {
            message: content.to_string(),
            session_id: current
                .clone()
                .unwrap_or_else(|| NEW_SESSION_SENTINEL.to_string()),
        };

        match self.backend.send_message(&request).await {
            Ok(reply) => {
                if let Some(id) = reply.session_id.filter(|id| !id.is_empty())
                    && current.as_deref() != Some(id.as_str())
                {
                    self.adopt_session(&id);
                }
                self.append(Message::assistant(reply.message));
            }
            Err(e) => {
                tracing::error!(error = %e, "chat send failed");
                self.append(Message::assistant(SEND_FALLBACK_REPLY));
                self.record_error(SEND_FAILED_ERROR.to_string());
            }
        }

        self.sending = false;
        self.notify();
    }

    /// Send one of the configured suggested prompts
    #[allow(clippy::future_not_send)]
    pub async fn send_suggestion(&mut self, index: usize) {
        let Some(prompt) = self.presentation.suggestions.get(index).map(|s| s.prompt.clone())
        else {
            tracing::debug!(index, "no such suggestion");
            return;
        };
        self.send(&prompt).await;
    }

    // -- voice ----------------------------------------------------------------

    /// Start recording, halting any reply being spoken
    ///
    /// A device failure is recorded as an error and leaves the widget idle.
    pub fn start_recording(&mut self) {
        self.playback.reap();
        if !self.voice_enabled {
            self.record_error("Voice input is disabled".to_string());
            return;
        }

        self.last_error = None;
        let playback = &mut self.playback;
        match self.recorder.start(|| playback.stop()) {
            Ok(()) => self.input_mode = InputMode::Voice,
            Err(e) => {
                tracing::warn!(error = %e, "could not start recording");
                self.record_error(e.user_message());
            }
        }
        self.notify();
    }

    /// Stop recording and upload what was captured
    ///
    /// Nothing is uploaded if nothing was captured.
    #[allow(clippy::future_not_send)]
    pub async fn stop_recording(&mut self) {
        self.playback.reap();
        if !self.recorder.is_recording() {
            return;
        }

        let finished = self.recorder.stop();
        self.notify();

        match finished {
            Ok(Some(blob)) => self.process_recording(&blob).await,
            Ok(None) => tracing::debug!("empty recording, nothing to upload"),
            Err(e) => {
                tracing::error!(error = %e, "failed to finalize recording");
                self.record_error(e.user_message());
            }
        }
    }

    /// Record/stop toggle
    ///
    /// Starting is refused while an upload is processing or a reply is
    /// playing.
    #[allow(clippy::future_not_send)]
    pub async fn toggle_recording(&mut self) {
        self.playback.reap();
        if self.recorder.is_recording() {
            self.stop_recording().await;
        } else if self.pipeline.is_processing() || self.playback.is_playing() {
            tracing::debug!(mode = %self.voice_mode(), "record toggle ignored");
        } else {
            self.start_recording();
        }
    }

    /// Silence the reply being spoken
    pub fn stop_playback(&mut self) {
        self.playback.stop();
        self.notify();
    }

    /// Wait for the reply being spoken to finish, then publish the new state
    #[allow(clippy::future_not_send)]
    pub async fn wait_for_playback(&mut self) {
        self.playback.wait_until_finished().await;
        self.refresh();
    }

    #[allow(clippy::future_not_send)]
    async fn process_recording(&mut self, blob: &AudioBlob) {
        let session_id = self.session.get();

        let result = {
            let flight = self.pipeline.begin();
            self.notify();
            flight.upload(blob, session_id.as_deref()).await
        };

        match result {
            Ok(reply) => dispatch_reply(reply, self),
            Err(e) => {
                tracing::error!(error = %e, "voice processing failed");
                self.record_error(e.user_message());
            }
        }
        self.notify();
    }

    // -- internals ------------------------------------------------------------

    fn append(&mut self, message: Message) {
        if message.role() == Role::Assistant && self.state != WidgetState::Open {
            self.has_unread = true;
        }
        self.log.append(message.clone());
        let _ = self.events.send(WidgetEvent::MessageAppended(message));
    }

    fn adopt_session(&mut self, id: &str) {
        tracing::info!(session = %id, "session assigned");
        if let Err(e) = self.session.set(id) {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }

    fn record_error(&mut self, message: String) {
        self.last_error = Some(message.clone());
        let _ = self.events.send(WidgetEvent::Error(message));
    }

    fn notify(&self) {
        let _ = self.events.send(WidgetEvent::StateChanged(self.snapshot()));
    }
}

impl VoiceReplyHandler for ChatWidget {
    fn on_transcription(&mut self, text: String) {
        self.append(Message::user(text));
    }

    fn on_response(&mut self, text: String) {
        self.append(Message::assistant(text));
    }

    fn on_audio(&mut self, encoded: String) {
        if let Err(e) = self.playback.play(&encoded) {
            self.record_error(e.user_message());
        }
    }
}

impl std::fmt::Debug for ChatWidget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatWidget")
            .field("state", &self.state)
            .field("input_mode", &self.input_mode)
            .field("voice_mode", &self.voice_mode())
            .field("messages", &self.log.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_mode_priority() {
        assert_eq!(derive_voice_mode(false, false, false), VoiceMode::Idle);
        assert_eq!(derive_voice_mode(true, false, false), VoiceMode::Listening);
        assert_eq!(derive_voice_mode(false, true, false), VoiceMode::Speaking);
        assert_eq!(derive_voice_mode(false, false, true), VoiceMode::Processing);
        assert_eq!(derive_voice_mode(true, true, true), VoiceMode::Listening);
        assert_eq!(derive_voice_mode(false, true, true), VoiceMode::Speaking);
    }

    #[test]
    fn snapshot_serializes_lowercase_modes() {
        let snapshot = WidgetSnapshot {
            state: WidgetState::Minimized,
            input_mode: InputMode::Voice,
            voice_mode: VoiceMode::Processing,
            is_sending: false,
            has_unread: true,
            session_id: None,
            error: None,
            message_count: 0,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "minimized");
        assert_eq!(json["voice_mode"], "processing");
    }
}
