//! Configuration management for the voice widget

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};
use file::WidgetConfigFile;

/// Default backend base URL
const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default per-request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Sentinel sent to the message endpoint when no session exists yet
pub const NEW_SESSION_SENTINEL: &str = "new";

/// Voice widget configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend endpoints
    pub backend: BackendConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Presentation configuration
    pub widget: WidgetConfig,

    /// Path to data directory (session file)
    pub data_dir: PathBuf,
}

/// Backend endpoint configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, without trailing slash
    pub base_url: String,

    /// Sent as `x-api-key` when present
    pub api_key: Option<String>,

    /// Sent as `x-source`
    pub source: String,

    /// Form endpoint; `None` means submissions are acknowledged locally
    pub inquiry_url: Option<String>,

    /// Applied to every request so a stalled call can't pin the widget in
    /// an in-flight phase
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Message-send endpoint
    #[must_use]
    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Voice-processing endpoint
    #[must_use]
    pub fn voice_url(&self) -> String {
        format!("{}/api/voice/stream", self.base_url)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            source: "voice-widget".to_string(),
            inquiry_url: Some(format!("{DEFAULT_BASE_URL}/api/inquiry")),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Voice capture configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input
    pub enabled: bool,

    /// Capture sample rate (16kHz for speech)
    pub sample_rate: u32,

    /// Interval at which captured audio is cut into fragments
    pub time_slice: Duration,

    /// Ask the capture device for echo cancellation
    pub echo_cancellation: bool,

    /// Ask the capture device for noise suppression
    pub noise_suppression: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 16_000,
            time_slice: Duration::from_millis(100),
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// A suggested prompt offered on an empty conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Button label
    pub label: String,
    /// Text sent when chosen
    pub prompt: String,
}

impl Suggestion {
    fn new(label: &str, prompt: &str) -> Self {
        Self {
            label: label.to_string(),
            prompt: prompt.to_string(),
        }
    }
}

/// Widget presentation configuration
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// Assistant display name
    pub assistant_name: String,

    /// Greeting shown on an empty conversation
    pub greeting: String,

    /// Suggested prompts
    pub suggestions: Vec<Suggestion>,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Mia".to_string(),
            greeting: "How can I help you today?".to_string(),
            suggestions: vec![
                Suggestion::new(
                    "Apply for merchant account",
                    "I'd like to apply for a merchant account",
                ),
                Suggestion::new("Learn about services", "What services do you offer?"),
                Suggestion::new("Coverage areas", "Which islands do you serve?"),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            voice: VoiceConfig::default(),
            widget: WidgetConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Default data directory: `~/.local/share/voice-widget` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/voice-widget"),
        |d| d.data_dir().join("voice-widget"),
    )
}

impl Config {
    /// Load configuration from env, the TOML file and defaults
    ///
    /// # Errors
    ///
    /// Returns error if the resulting backend URL is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(None, false)
    }

    /// Load configuration with CLI overrides applied last
    ///
    /// # Errors
    ///
    /// Returns error if the resulting backend URL is invalid
    pub fn load_with_options(base_url: Option<&str>, disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file();
        let mut config = Self::from_sources(fc, |key| std::env::var(key).ok())?;

        if let Some(url) = base_url {
            config.set_base_url(url)?;
        }

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
            config.voice.enabled = false;
        }

        Ok(config)
    }

    /// Build configuration from a parsed file and an env lookup (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting backend URL is invalid
    pub fn from_sources(
        fc: WidgetConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let base_url = normalize_base_url(
            &env("VOICE_WIDGET_API_URL")
                .or(fc.backend.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )?;

        // An explicit empty value disables forwarding
        let inquiry_url = match env("VOICE_WIDGET_INQUIRY_URL").or(fc.backend.inquiry_url) {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => Some(format!("{base_url}/api/inquiry")),
        };

        let timeout_secs = env("VOICE_WIDGET_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .or(fc.backend.request_timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let backend = BackendConfig {
            base_url,
            api_key: env("VOICE_WIDGET_API_KEY").or(fc.backend.api_key),
            source: env("VOICE_WIDGET_SOURCE")
                .or(fc.backend.source)
                .unwrap_or(defaults.backend.source),
            inquiry_url,
            request_timeout: Duration::from_secs(timeout_secs.max(1)),
        };

        let voice_enabled = env("VOICE_WIDGET_DISABLE_VOICE")
            .map(|v| !matches!(v.as_str(), "1" | "true"))
            .or(fc.voice.enabled)
            .unwrap_or(defaults.voice.enabled);
        let voice = VoiceConfig {
            enabled: voice_enabled,
            sample_rate: fc.voice.sample_rate.unwrap_or(defaults.voice.sample_rate),
            time_slice: fc
                .voice
                .time_slice_ms
                .map_or(defaults.voice.time_slice, Duration::from_millis),
            echo_cancellation: fc
                .voice
                .echo_cancellation
                .unwrap_or(defaults.voice.echo_cancellation),
            noise_suppression: fc
                .voice
                .noise_suppression
                .unwrap_or(defaults.voice.noise_suppression),
        };

        let widget = WidgetConfig {
            assistant_name: fc
                .widget
                .assistant_name
                .unwrap_or(defaults.widget.assistant_name),
            greeting: fc.widget.greeting.unwrap_or(defaults.widget.greeting),
            suggestions: fc.widget.suggestions.map_or(defaults.widget.suggestions, |s| {
                s.into_iter()
                    .map(|s| Suggestion {
                        label: s.label,
                        prompt: s.prompt,
                    })
                    .collect()
            }),
        };

        let data_dir = env("VOICE_WIDGET_DATA_DIR")
            .or(fc.data_dir)
            .map_or(defaults.data_dir, PathBuf::from);

        Ok(Self {
            backend,
            voice,
            widget,
            data_dir,
        })
    }

    /// Point the widget at a different backend, keeping a derived form endpoint in step
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn set_base_url(&mut self, url: &str) -> Result<()> {
        let old_inquiry = format!("{}/api/inquiry", self.backend.base_url);
        let base_url = normalize_base_url(url)?;
        if self.backend.inquiry_url.as_deref() == Some(old_inquiry.as_str()) {
            self.backend.inquiry_url = Some(format!("{base_url}/api/inquiry"));
        }
        self.backend.base_url = base_url;
        Ok(())
    }

    /// Path of the persisted session identity
    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session_id")
    }
}

/// Validate a base URL and strip any trailing slash
fn normalize_base_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| Error::Config(format!("invalid backend URL {raw:?}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "backend URL must be http or https: {raw}"
        )));
    }

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}
