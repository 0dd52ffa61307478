//! Error types for the statement-converter library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConverterError`]: returned from every public operation. Covers
//!   client-side validation (bad file type, missing bank or credential),
//!   state machine guards, download problems, and configuration mistakes.
//!
//! * [`TransportError`]: a typed failure reported by the conversion
//!   backend (or the network in between). It is stored inside the session
//!   while it sits in [`crate::session::Phase::Errored`] and is wrapped in
//!   [`ConverterError::Backend`] when handed back to the caller.
//!
//! Client-side validation errors are raised before any request is built, so
//! they never reach the transport layer.

use crate::session::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the statement-converter library.
#[derive(Debug, Error)]
pub enum ConverterError {
    // ── Selection errors ─────────────────────────────────────────────────
    /// The selected file's extension is not in the accepted-type set.
    #[error("Unsupported file type for '{file_name}'. Accepted extensions: {accepted}")]
    UnsupportedFileType { file_name: String, accepted: String },

    /// No file, or no bank, has been chosen yet.
    #[error("Nothing to submit: {0}")]
    MissingSelection(&'static str),

    /// The selected bank needs a credential and none was given.
    #[error("Bank '{bank}' requires a password before the statement can be submitted")]
    MissingCredential { bank: String },

    /// The bank id is not present in the registry.
    #[error("Unknown bank '{id}'")]
    UnknownBank { id: String },

    // ── State machine guards ─────────────────────────────────────────────
    /// The action is not valid in the session's current phase.
    #[error("Cannot {action} while the session is {phase}")]
    ActionNotAllowed { action: &'static str, phase: Phase },

    /// A backend call is already in flight for this session.
    #[error("A request is already in flight for this session")]
    RequestInFlight,

    /// The session was reset while the call was in flight; its result was discarded.
    #[error("Result discarded: session moved from generation {issued} to {current} while the request was in flight")]
    Superseded { issued: u64, current: u64 },

    // ── Backend errors ───────────────────────────────────────────────────
    /// The backend (or the network) reported a failure.
    #[error(transparent)]
    Backend(#[from] TransportError),

    // ── Download errors ──────────────────────────────────────────────────
    /// No converted output exists yet (session not completed).
    #[error("No converted output is available yet. Approve the suggestions first.")]
    NoOutputAvailable,

    /// The backend handed back an output reference we refuse to follow.
    #[error("Invalid output reference '{0}'")]
    InvalidOutputReference(String),

    /// Fetching the converted artifact failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── I/O errors ───────────────────────────────────────────────────────
    /// Could not read the statement file from disk.
    #[error("Failed to read statement file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the downloaded output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder or registry validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConverterError {
    /// The backend failure kind, if this error came from the backend.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ConverterError::Backend(e) => Some(e.kind),
            _ => None,
        }
    }

    /// True for errors raised before any network call was made.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            ConverterError::UnsupportedFileType { .. }
                | ConverterError::MissingSelection(_)
                | ConverterError::MissingCredential { .. }
                | ConverterError::UnknownBank { .. }
        )
    }
}

/// Classification of a backend or network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The backend rejected the bank credential.
    InvalidCredential,
    /// The backend could not read the statement's content.
    UnsupportedFormat,
    /// The backend failed for any other reason.
    ServerError,
    /// Timeout, connection failure, or an unreadable response body.
    NetworkError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::InvalidCredential => "invalid credential",
            FailureKind::UnsupportedFormat => "unsupported format",
            FailureKind::ServerError => "server error",
            FailureKind::NetworkError => "network error",
        };
        f.write_str(s)
    }
}

/// A typed failure from one backend call.
///
/// `message` is the server-provided text when there was one, so the
/// presentation layer can show it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NetworkError, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_server_message_verbatim() {
        let e: ConverterError =
            TransportError::new(FailureKind::InvalidCredential, "invalid password").into();
        assert_eq!(e.to_string(), "invalid password");
        assert_eq!(e.failure_kind(), Some(FailureKind::InvalidCredential));
        assert!(!e.is_client_side());
    }

    #[test]
    fn unsupported_file_type_lists_accepted_extensions() {
        let e = ConverterError::UnsupportedFileType {
            file_name: "notes.txt".into(),
            accepted: ".xlsx, .csv".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("notes.txt"), "got: {msg}");
        assert!(msg.contains(".xlsx, .csv"), "got: {msg}");
        assert!(e.is_client_side());
    }

    #[test]
    fn action_not_allowed_names_phase() {
        let e = ConverterError::ActionNotAllowed {
            action: "approve",
            phase: Phase::Ready,
        };
        assert_eq!(e.to_string(), "Cannot approve while the session is ready");
    }

    #[test]
    fn superseded_display() {
        let e = ConverterError::Superseded {
            issued: 2,
            current: 3,
        };
        assert!(e.to_string().contains("generation 2 to 3"));
    }

    #[test]
    fn missing_credential_is_client_side() {
        let e = ConverterError::MissingCredential { bank: "C6".into() };
        assert!(e.is_client_side());
        assert!(e.to_string().contains("C6"));
        assert_eq!(e.failure_kind(), None);
    }
}
