//! Voice Widget - voice-enabled chat assistant widget core
//!
//! This library provides the headless core of a chat widget that can also
//! talk:
//! - Text chat against a message endpoint, with a persisted session identity
//! - Push-to-talk recording, upload to a voice endpoint, spoken replies
//! - Open/closed/minimized panel state and a derived voice mode
//! - Client-side validated inquiry form submission
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Renderer                         │
//! │        CLI  │  GUI  │  TUI  (WidgetEvent stream)     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   ChatWidget                         │
//! │  Session │ Message Log │ Recorder │ Pipeline │ Playback│
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Backend                           │
//! │     /api/chat  │  /api/voice/stream  │  /api/inquiry │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod inquiry;
pub mod messages;
pub mod session;
pub mod voice;
pub mod widget;

pub use backend::{Backend, ChatReply, ChatRequest, HttpBackend, InquiryReceipt, VoiceReply};
pub use config::Config;
pub use error::{Error, Result};
pub use inquiry::{InquiryForm, submit_inquiry};
pub use messages::{Message, MessageLog, Role};
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use widget::{
    ChatWidget, InputMode, VoiceMode, WidgetEvent, WidgetParts, WidgetSnapshot, WidgetState,
    derive_voice_mode,
};
