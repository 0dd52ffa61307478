//! Transport client: the two backend operations.
//!
//! [`ConversionBackend`] is the only integration point with the conversion
//! service. [`HttpTransport`] implements it over HTTP with reqwest; tests
//! and embedders can supply their own implementation.
//!
//! Every failure path resolves to a typed [`TransportError`]. Nothing here
//! panics or returns an untyped error, so the session can always show the
//! attempt as failed and offer a retry.

use crate::config::ClientConfig;
use crate::error::{ConverterError, FailureKind, TransportError};
use crate::model::{ConversionRequest, ConvertResponse, Suggestion};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Fallback when a failed conversion carries no server message.
pub const GENERIC_CONVERT_ERROR: &str = "An error occurred while converting the file";
/// Fallback when a failed approval carries no server message.
pub const GENERIC_APPROVE_ERROR: &str = "An error occurred while saving the approved categories";

/// The conversion backend as seen by the session.
///
/// Re-invoking either method after an `Err` must be safe: the backend is
/// expected to leave no partial state behind for a failed call.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Upload a statement and receive categorization suggestions.
    async fn convert(&self, request: &ConversionRequest) -> Result<ConvertResponse, TransportError>;

    /// Record the full suggestion list. All or nothing.
    async fn approve(&self, suggestions: &[Suggestion]) -> Result<(), TransportError>;
}

/// Body sent to the approval endpoint for each suggestion.
#[derive(Debug, Serialize)]
struct ApprovalItem<'a> {
    texto: &'a str,
    sugestao: &'a str,
}

/// Failure body returned by the backend.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    code: Option<String>,
}

/// reqwest implementation of [`ConversionBackend`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    convert_url: Url,
    approve_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ConverterError> {
        let mut builder =
            reqwest::Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ConverterError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            convert_url: config.endpoint(&config.convert_path)?,
            approve_url: config.endpoint(&config.approve_path)?,
        })
    }

    pub fn convert_url(&self) -> &Url {
        &self.convert_url
    }

    pub fn approve_url(&self) -> &Url {
        &self.approve_url
    }

    fn build_form(request: &ConversionRequest) -> Result<Form, TransportError> {
        let part = Part::bytes(request.file.bytes().to_vec())
            .file_name(request.file.file_name().to_string())
            .mime_str(request.file.mime_type())
            .map_err(|e| TransportError::network(format!("invalid multipart part: {e}")))?;

        let mut form = Form::new()
            .part("statement", part)
            .text("bank", request.bank.id.clone());
        if let Some(ref credential) = request.credential {
            form = form.text("password", credential.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl ConversionBackend for HttpTransport {
    async fn convert(&self, request: &ConversionRequest) -> Result<ConvertResponse, TransportError> {
        debug!(
            "POST {} ({} bytes, bank {})",
            self.convert_url,
            request.file.size(),
            request.bank.id
        );
        let form = Self::build_form(request)?;

        let response = self
            .client
            .post(self.convert_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(network_error)?;

        if status.is_success() {
            serde_json::from_slice::<ConvertResponse>(&body).map_err(|e| {
                warn!("Malformed conversion response: {}", e);
                TransportError::network(format!("malformed response from server: {e}"))
            })
        } else {
            Err(convert_failure(status, &body))
        }
    }

    async fn approve(&self, suggestions: &[Suggestion]) -> Result<(), TransportError> {
        debug!("POST {} ({} suggestions)", self.approve_url, suggestions.len());
        let items: Vec<ApprovalItem<'_>> = suggestions
            .iter()
            .map(|s| ApprovalItem {
                texto: &s.text,
                sugestao: &s.category,
            })
            .collect();

        let response = self
            .client
            .post(self.approve_url.clone())
            .json(&items)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await.map_err(network_error)?;
        let message = server_message(&body).0;
        Err(TransportError::new(
            FailureKind::ServerError,
            message.unwrap_or_else(|| format!("{GENERIC_APPROVE_ERROR} (HTTP {status})")),
        ))
    }
}

// ── Response mapping ─────────────────────────────────────────────────────

fn network_error(e: reqwest::Error) -> TransportError {
    let message = if e.is_timeout() {
        format!("request timed out: {e}")
    } else if e.is_connect() {
        format!("could not connect to the conversion server: {e}")
    } else {
        e.to_string()
    };
    TransportError::network(message)
}

/// Extract `(error, code)` from a failure body, tolerating non-JSON bodies.
fn server_message(body: &[u8]) -> (Option<String>, Option<String>) {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(b) => (
            b.error.filter(|m| !m.trim().is_empty()),
            b.code.map(|c| c.to_lowercase()),
        ),
        Err(_) => (None, None),
    }
}

/// Classify a failed conversion: explicit `code` first, then the status.
fn convert_failure(status: StatusCode, body: &[u8]) -> TransportError {
    let (message, code) = server_message(body);

    let kind = match code.as_deref() {
        Some("invalid_credential" | "invalid_password") => FailureKind::InvalidCredential,
        Some("unsupported_format") => FailureKind::UnsupportedFormat,
        Some("server_error") => FailureKind::ServerError,
        _ => classify_status(status, message.as_deref()),
    };

    TransportError::new(
        kind,
        message.unwrap_or_else(|| format!("{GENERIC_CONVERT_ERROR} (HTTP {status})")),
    )
}

fn classify_status(status: StatusCode, message: Option<&str>) -> FailureKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::InvalidCredential,
        StatusCode::BAD_REQUEST if message.is_some_and(mentions_credential) => {
            FailureKind::InvalidCredential
        }
        StatusCode::BAD_REQUEST
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => FailureKind::UnsupportedFormat,
        _ => FailureKind::ServerError,
    }
}

fn mentions_credential(message: &str) -> bool {
    let m = message.to_lowercase();
    ["password", "senha", "credential"]
        .iter()
        .any(|w| m.contains(w))
}
