//! Merchant application form
//!
//! The form is validated before anything leaves the client; the backend
//! validates it again on its side.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, InquiryReceipt};
use crate::{Error, Result};

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

/// Contact/application fields; everything but `message` is required
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub business_name: String,
    pub business_type: String,
    pub island: String,
    /// Free-text notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InquiryForm {
    /// Required fields paired with their wire names, in form order
    fn required_fields(&self) -> [(&'static str, &str); 7] {
        [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("businessName", &self.business_name),
            ("businessType", &self.business_type),
            ("island", &self.island),
        ]
    }

    /// Check required fields and email format
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailure` naming the first missing field, or
    /// reporting a malformed email
    pub fn validate(&self) -> Result<()> {
        if let Some((name, _)) = self
            .required_fields()
            .into_iter()
            .find(|(_, value)| value.trim().is_empty())
        {
            return Err(Error::ValidationFailure(format!(
                "Missing required field: {name}"
            )));
        }

        if !EMAIL_REGEX.is_match(self.email.trim()) {
            return Err(Error::ValidationFailure("Invalid email format".to_string()));
        }

        Ok(())
    }
}

/// Validate and submit a form
///
/// # Errors
///
/// Returns `ValidationFailure` without any network call if the form is
/// incomplete, otherwise whatever the backend reports
pub async fn submit_inquiry(backend: &dyn Backend, form: &InquiryForm) -> Result<InquiryReceipt> {
    if let Err(e) = form.validate() {
        tracing::debug!(error = %e, "inquiry rejected before submission");
        return Err(e);
    }

    let receipt = backend.submit_inquiry(form).await?;
    if receipt.fallback {
        tracing::warn!("inquiry accepted without forwarding");
    }
    Ok(receipt)
}
