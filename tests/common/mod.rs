//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use tokio::sync::broadcast;
use voice_widget::config::{VoiceConfig, WidgetConfig};
use voice_widget::voice::{
    AudioBlob, AudioOutput, CaptureConstraints, CaptureStream, DecodedAudio, EndedCallback,
    FragmentSink, Microphone, OutputNode, samples_to_wav,
};
use voice_widget::{
    Backend, ChatReply, ChatRequest, ChatWidget, Error, InquiryForm, InquiryReceipt,
    MemorySessionStore, Result, VoiceReply, WidgetEvent, WidgetParts,
};

// -- backend ------------------------------------------------------------------

/// Backend returning scripted replies and recording every call
#[derive(Default)]
pub struct FakeBackend {
    chat_replies: Mutex<VecDeque<Result<ChatReply>>>,
    voice_replies: Mutex<VecDeque<Result<VoiceReply>>>,
    pub chat_requests: Mutex<Vec<ChatRequest>>,
    pub voice_uploads: Mutex<Vec<(AudioBlob, Option<String>)>>,
    pub inquiries: Mutex<Vec<InquiryForm>>,
    observer: Mutex<Option<broadcast::Receiver<WidgetEvent>>>,
    /// Messages the widget had shown by the time each send reached the backend
    pub shown_at_send: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn push_chat(&self, reply: Result<ChatReply>) {
        self.chat_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_voice(&self, reply: Result<VoiceReply>) {
        self.voice_replies.lock().unwrap().push_back(reply);
    }

    /// Follow the widget's events so sends can record what was on screen
    pub fn watch(&self, events: broadcast::Receiver<WidgetEvent>) {
        *self.observer.lock().unwrap() = Some(events);
    }

    fn catch_up(&self) {
        let mut observer = self.observer.lock().unwrap();
        let Some(events) = observer.as_mut() else {
            return;
        };
        while let Ok(event) = events.try_recv() {
            if let WidgetEvent::MessageAppended(message) = event {
                self.shown_at_send
                    .lock()
                    .unwrap()
                    .push(message.content().to_string());
            }
        }
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_requests.lock().unwrap().len()
    }

    pub fn voice_calls(&self) -> usize {
        self.voice_uploads.lock().unwrap().len()
    }

    pub fn inquiry_calls(&self) -> usize {
        self.inquiries.lock().unwrap().len()
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.catch_up();
        self.chat_requests.lock().unwrap().push(request.clone());
        self.chat_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::NetworkFailure("no scripted reply".into())))
    }

    async fn process_voice(
        &self,
        audio: &AudioBlob,
        session_id: Option<&str>,
    ) -> Result<VoiceReply> {
        self.voice_uploads
            .lock()
            .unwrap()
            .push((audio.clone(), session_id.map(str::to_string)));
        self.voice_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::NetworkFailure("no scripted reply".into())))
    }

    async fn submit_inquiry(&self, form: &InquiryForm) -> Result<InquiryReceipt> {
        self.inquiries.lock().unwrap().push(form.clone());
        Ok(InquiryReceipt {
            success: true,
            ticket_id: Some("T-1".into()),
            fallback: false,
            message: None,
        })
    }
}

pub fn chat_reply(session_id: Option<&str>, message: &str) -> ChatReply {
    ChatReply {
        session_id: session_id.map(str::to_string),
        message: message.to_string(),
    }
}

// -- microphone ---------------------------------------------------------------

#[derive(Default)]
pub struct MicCalls {
    pub acquired: usize,
    pub released: usize,
}

/// Microphone that delivers a fixed batch of samples when capture begins
#[derive(Clone, Default)]
pub struct FakeMic {
    pub calls: Arc<Mutex<MicCalls>>,
    samples: Arc<Mutex<Vec<f32>>>,
    deny: Arc<Mutex<bool>>,
}

impl FakeMic {
    /// Samples "spoken" into the next recording
    pub fn speak(&self, samples: Vec<f32>) {
        *self.samples.lock().unwrap() = samples;
    }

    /// Refuse access, as when permission is denied
    pub fn deny(&self) {
        *self.deny.lock().unwrap() = true;
    }

    pub fn acquired(&self) -> usize {
        self.calls.lock().unwrap().acquired
    }

    pub fn released(&self) -> usize {
        self.calls.lock().unwrap().released
    }
}

impl Microphone for FakeMic {
    fn acquire(&mut self, _constraints: &CaptureConstraints) -> Result<Box<dyn CaptureStream>> {
        if *self.deny.lock().unwrap() {
            return Err(Error::DeviceUnavailable("permission denied".into()));
        }
        self.calls.lock().unwrap().acquired += 1;
        Ok(Box::new(FakeStream {
            calls: Arc::clone(&self.calls),
            samples: self.samples.lock().unwrap().clone(),
        }))
    }
}

struct FakeStream {
    calls: Arc<Mutex<MicCalls>>,
    samples: Vec<f32>,
}

impl CaptureStream for FakeStream {
    fn begin(&mut self, sink: FragmentSink) -> Result<()> {
        sink.push(&self.samples);
        Ok(())
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.calls.lock().unwrap().released += 1;
    }
}

// -- speaker ------------------------------------------------------------------

#[derive(Default)]
pub struct OutputCalls {
    pub started: usize,
    pub stopped: usize,
    ended: Vec<EndedCallback>,
}

/// Output that plays until the test ends it
#[derive(Clone, Default)]
pub struct FakeOutput {
    pub calls: Arc<Mutex<OutputCalls>>,
}

impl FakeOutput {
    pub fn started(&self) -> usize {
        self.calls.lock().unwrap().started
    }

    pub fn stopped(&self) -> usize {
        self.calls.lock().unwrap().stopped
    }

    /// Finish every playback still running
    pub fn finish_all(&self) {
        let callbacks = std::mem::take(&mut self.calls.lock().unwrap().ended);
        for callback in callbacks {
            callback();
        }
    }
}

impl AudioOutput for FakeOutput {
    fn start(
        &mut self,
        _audio: DecodedAudio,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn OutputNode>> {
        let mut calls = self.calls.lock().unwrap();
        calls.started += 1;
        calls.ended.push(on_ended);
        Ok(Box::new(FakeNode(Arc::clone(&self.calls))))
    }
}

struct FakeNode(Arc<Mutex<OutputCalls>>);

impl OutputNode for FakeNode {
    fn stop(&mut self) {
        self.0.lock().unwrap().stopped += 1;
    }
}

// -- audio --------------------------------------------------------------------

/// Half a second of a quiet tone at the capture rate
#[allow(clippy::cast_precision_loss)]
pub fn speech_samples() -> Vec<f32> {
    (0..8_000).map(|i| (i as f32 * 0.05).sin() * 0.2).collect()
}

/// Base64 WAV payload as the voice endpoint returns it
pub fn encoded_reply_audio() -> String {
    let wav = samples_to_wav(&[0.1; 2_400], 24_000, 1).expect("encode wav");
    base64::engine::general_purpose::STANDARD.encode(wav)
}

// -- widget -------------------------------------------------------------------

/// Widget wired to fakes, with handles on each fake
pub struct Harness {
    pub widget: ChatWidget,
    pub backend: Arc<FakeBackend>,
    pub mic: FakeMic,
    pub output: FakeOutput,
}

pub fn harness() -> Harness {
    harness_with(MemorySessionStore::new(), VoiceConfig::default())
}

pub fn harness_with(session: MemorySessionStore, voice: VoiceConfig) -> Harness {
    let backend = Arc::new(FakeBackend::default());
    let mic = FakeMic::default();
    let output = FakeOutput::default();

    let parts = WidgetParts {
        backend: Arc::clone(&backend) as Arc<dyn Backend>,
        session: Box::new(session),
        microphone: Box::new(mic.clone()),
        output: Box::new(output.clone()),
    };
    let widget = ChatWidget::new(parts, &voice, WidgetConfig::default());

    Harness {
        widget,
        backend,
        mic,
        output,
    }
}
