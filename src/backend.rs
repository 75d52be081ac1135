//! Backend endpoint client
//!
//! The widget talks to three plain request/response endpoints: message
//! send, voice processing and form submission. None of them retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::inquiry::InquiryForm;
use crate::voice::AudioBlob;
use crate::{Error, Result};

/// Body of a message-send call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

/// Reply from the message-send endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    /// Echoes the current identity or assigns a new one
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

/// Reply from the voice endpoint; every field is independent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceReply {
    /// What the user said
    #[serde(default)]
    pub transcription: Option<String>,
    /// What the assistant answered
    #[serde(default)]
    pub response: Option<String>,
    /// Base64-encoded spoken answer
    #[serde(default)]
    pub audio: Option<String>,
}

/// Acknowledgement of a form submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryReceipt {
    pub success: bool,
    #[serde(default)]
    pub ticket_id: Option<String>,
    /// Accepted without being forwarded anywhere
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Endpoints consumed by the widget
#[async_trait]
pub trait Backend: Send + Sync {
    /// Send a text message
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatReply>;

    /// Upload a finished recording
    async fn process_voice(&self, audio: &AudioBlob, session_id: Option<&str>)
    -> Result<VoiceReply>;

    /// Submit an already validated inquiry form
    async fn submit_inquiry(&self, form: &InquiryForm) -> Result<InquiryReceipt>;
}

/// [`Backend`] over HTTP
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Create a client for the configured endpoints
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("x-source", self.config.source.as_str());

        match &self.config.api_key {
            Some(key) => builder.header("x-api-key", key.as_str()),
            None => builder,
        }
    }

    async fn send(builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            tracing::error!(error = %e, endpoint = what, "request failed");
            Error::network(&e)
        })?;

        let status = response.status();
        tracing::debug!(status = %status, endpoint = what, "received response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = %status, body = %body, endpoint = what, "backend error");

        // Surface the server's own message for rejected form submissions
        if status == reqwest::StatusCode::BAD_REQUEST
            && let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body)
        {
            return Err(Error::ValidationFailure(parsed.error));
        }

        Err(Error::NetworkFailure(format!("{what} returned {status}")))
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        response.json().await.map_err(|e| {
            tracing::error!(error = %e, endpoint = what, "failed to parse response");
            Error::NetworkFailure(format!("malformed {what} response: {e}"))
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatReply> {
        tracing::debug!(
            chars = request.message.len(),
            session = %request.session_id,
            "sending message"
        );

        let response = Self::send(self.post(&self.config.chat_url()).json(request), "chat").await?;
        Self::parse(response, "chat").await
    }

    async fn process_voice(
        &self,
        audio: &AudioBlob,
        session_id: Option<&str>,
    ) -> Result<VoiceReply> {
        tracing::debug!(audio_bytes = audio.data.len(), "uploading recording");

        let part = reqwest::multipart::Part::bytes(audio.data.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)
            .map_err(|e| Error::NetworkFailure(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new().part("audio", part);
        if let Some(id) = session_id {
            form = form.text("sessionId", id.to_string());
        }

        let response = Self::send(
            self.post(&self.config.voice_url()).multipart(form),
            "voice",
        )
        .await?;
        let reply: VoiceReply = Self::parse(response, "voice").await?;

        tracing::info!(
            transcription = reply.transcription.is_some(),
            response = reply.response.is_some(),
            audio = reply.audio.is_some(),
            "voice reply received"
        );
        Ok(reply)
    }

    async fn submit_inquiry(&self, form: &InquiryForm) -> Result<InquiryReceipt> {
        let Some(url) = &self.config.inquiry_url else {
            tracing::warn!(
                business = %form.business_name,
                "form endpoint not configured, acknowledging submission locally"
            );
            return Ok(InquiryReceipt {
                success: true,
                ticket_id: None,
                fallback: true,
                message: Some("Application received".to_string()),
            });
        };

        let response = Self::send(self.post(url).json(form), "inquiry").await?;
        let receipt: InquiryReceipt = Self::parse(response, "inquiry").await?;

        tracing::info!(ticket = ?receipt.ticket_id, "inquiry submitted");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_uses_camel_case() {
        let body = serde_json::to_value(ChatRequest {
            message: "Hello".to_string(),
            session_id: "new".to_string(),
        })
        .unwrap();
        assert_eq!(body["sessionId"], "new");
        assert_eq!(body["message"], "Hello");
    }

    #[test]
    fn voice_reply_fields_are_optional() {
        let reply: VoiceReply = serde_json::from_str(r#"{"response":"Hi"}"#).unwrap();
        assert_eq!(reply.response.as_deref(), Some("Hi"));
        assert!(reply.transcription.is_none());
        assert!(reply.audio.is_none());
    }

    #[test]
    fn receipt_parses_ticket_id() {
        let receipt: InquiryReceipt =
            serde_json::from_str(r#"{"success":true,"ticketId":"T-42"}"#).unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.ticket_id.as_deref(), Some("T-42"));
        assert!(!receipt.fallback);
    }
}
