//! TOML configuration file loading
//!
//! Supports `~/.config/voice-widget/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct WidgetConfigFile {
    /// Backend endpoints
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Presentation configuration
    #[serde(default)]
    pub widget: WidgetFileConfig,

    /// Override for the data directory holding the session file
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// Backend endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL the `/api/*` endpoints hang off (e.g. `https://example.com`)
    pub base_url: Option<String>,

    /// Value sent in the `x-api-key` header
    pub api_key: Option<String>,

    /// Value sent in the `x-source` header
    pub source: Option<String>,

    /// Full URL of the form endpoint; empty string disables forwarding
    pub inquiry_url: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Voice capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Fragment time slice in milliseconds
    pub time_slice_ms: Option<u64>,

    /// Request echo cancellation from the capture device
    pub echo_cancellation: Option<bool>,

    /// Request noise suppression from the capture device
    pub noise_suppression: Option<bool>,
}

/// Widget presentation configuration
#[derive(Debug, Default, Deserialize)]
pub struct WidgetFileConfig {
    /// Assistant display name
    pub assistant_name: Option<String>,

    /// Greeting shown on an empty conversation
    pub greeting: Option<String>,

    /// Suggested prompts shown on an empty conversation
    pub suggestions: Option<Vec<SuggestionFileConfig>>,
}

/// A suggested prompt
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestionFileConfig {
    pub label: String,
    pub prompt: String,
}

/// Load the TOML config file from the standard path
///
/// Returns `WidgetConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> WidgetConfigFile {
    config_file_path().map_or_else(WidgetConfigFile::default, |p| load_config_file_from(&p))
}

/// Load the TOML config file from an explicit path
pub fn load_config_file_from(path: &Path) -> WidgetConfigFile {
    if !path.exists() {
        return WidgetConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                WidgetConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            WidgetConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-widget/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-widget").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let parsed: WidgetConfigFile = toml::from_str(
            r#"
            [backend]
            base_url = "https://assistant.example.com"
            request_timeout_secs = 10

            [[widget.suggestions]]
            label = "Hours"
            prompt = "When are you open?"
            "#,
        )
        .unwrap();

        assert_eq!(
            parsed.backend.base_url.as_deref(),
            Some("https://assistant.example.com")
        );
        assert_eq!(parsed.backend.request_timeout_secs, Some(10));
        assert!(parsed.voice.enabled.is_none());
        let suggestions = parsed.widget.suggestions.unwrap();
        assert_eq!(suggestions[0].prompt, "When are you open?");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = load_config_file_from(&dir.path().join("absent.toml"));
        assert!(parsed.backend.base_url.is_none());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend = [not toml").unwrap();
        let parsed = load_config_file_from(&path);
        assert!(parsed.backend.base_url.is_none());
    }
}
