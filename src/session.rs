//! The conversion session state machine.
//!
//! ## Lifecycle
//!
//! ```text
//!  Empty ──select_file──▶ FileSelected ◀──inputs──▶ Ready
//!                                                     │ begin_submit
//!                                                     ▼
//!            Errored ◀────────failure──────────── Submitting
//!               ▲                                     │ success
//!               │                                     ▼
//!               └───────failure──── ApprovalSubmitting ◀── SuggestionsPending
//!                                         │ success          (begin_approve)
//!                                         ▼
//!                                     Completed
//! ```
//!
//! [`ConversionSession`] does no I/O. Each backend call is split into a
//! `begin_*` step that validates and hands out a ticket, and a `complete_*`
//! step that applies the outcome. Tickets carry the session generation at
//! which they were issued; every reset bumps the generation so a completion
//! that arrives after the user picked a new file is discarded instead of
//! clobbering the fresh session. [`crate::controller::ConversionController`]
//! drives these steps around the real transport.

use crate::banks::{Bank, BankRegistry};
use crate::config::{normalise_extension, ClientConfig, DEFAULT_ACCEPTED_TYPES};
use crate::error::{ConverterError, FailureKind, TransportError};
use crate::model::{ConversionRequest, ConvertResponse, Suggestion, UploadedFile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Failure message recorded when a call is dropped before the backend replies.
pub const REQUEST_CANCELLED: &str = "The request was cancelled before the server replied";

/// Discrete lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Empty,
    FileSelected,
    Ready,
    Submitting,
    SuggestionsPending,
    ApprovalSubmitting,
    Completed,
    Errored,
}

impl Phase {
    /// A backend call is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self, Phase::Submitting | Phase::ApprovalSubmitting)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Empty => "empty",
            Phase::FileSelected => "waiting for bank details",
            Phase::Ready => "ready",
            Phase::Submitting => "submitting",
            Phase::SuggestionsPending => "waiting for approval",
            Phase::ApprovalSubmitting => "approving",
            Phase::Completed => "completed",
            Phase::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Which backend call a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Convert,
    Approve,
}

/// The failure that put the session into [`Phase::Errored`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub step: Step,
    pub kind: FailureKind,
    pub message: String,
}

/// Why submission is currently impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitBlocker {
    /// No file or no bank chosen.
    MissingSelection,
    /// The bank requires a credential and none is set.
    MissingCredential,
}

/// Read-only view of a session for the presentation layer.
///
/// Every business rule is already evaluated here (`can_*`, `submit_blocker`)
/// so renderers never re-derive them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub generation: u64,
    pub file_name: Option<String>,
    pub file_size: Option<usize>,
    pub bank: Option<String>,
    pub credential_present: bool,
    pub error: Option<SessionFailure>,
    pub submit_blocker: Option<SubmitBlocker>,
    pub suggestions: Vec<Suggestion>,
    pub output_reference: Option<String>,
    pub can_submit: bool,
    pub can_approve: bool,
    pub can_download: bool,
}

impl SessionSnapshot {
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// Outcome of applying a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The outcome updated the session.
    Applied,
    /// The session was reset after the call was issued; nothing changed.
    Discarded { issued: u64, current: u64 },
}

/// Permission to issue one `convert` call.
#[derive(Debug)]
pub struct SubmitTicket {
    generation: u64,
    pub request: ConversionRequest,
}

impl SubmitTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Permission to issue one `approve` call.
#[derive(Debug)]
pub struct ApprovalTicket {
    generation: u64,
    pub suggestions: Vec<Suggestion>,
}

impl ApprovalTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of [`ConversionSession::begin_approve`].
#[derive(Debug)]
pub enum ApprovalStart {
    /// Send the suggestions to the backend, then call `complete_approve`.
    Call(ApprovalTicket),
    /// There was nothing to approve; the session is already `Completed`.
    NothingToApprove,
}

/// One end-to-end attempt to convert a single statement file.
#[derive(Debug, Clone)]
pub struct ConversionSession {
    registry: Arc<BankRegistry>,
    accepted_types: Vec<String>,
    file: Option<UploadedFile>,
    bank: Option<Bank>,
    credential: String,
    phase: Phase,
    suggestions: Vec<Suggestion>,
    output_reference: Option<String>,
    failure: Option<SessionFailure>,
    generation: u64,
}

impl ConversionSession {
    /// A session accepting the default statement types.
    pub fn new(registry: Arc<BankRegistry>) -> Self {
        Self::with_accepted_types(registry, DEFAULT_ACCEPTED_TYPES)
    }

    /// A session using the accepted types from `config`.
    pub fn from_config(registry: Arc<BankRegistry>, config: &ClientConfig) -> Self {
        Self::with_accepted_types(registry, &config.accepted_types)
    }

    pub fn with_accepted_types<I, S>(registry: Arc<BankRegistry>, accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            registry,
            accepted_types: accepted
                .into_iter()
                .map(|t| normalise_extension(t.as_ref()))
                .collect(),
            file: None,
            bank: None,
            credential: String::new(),
            phase: Phase::Empty,
            suggestions: Vec::new(),
            output_reference: None,
            failure: None,
            generation: 0,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn file(&self) -> Option<&UploadedFile> {
        self.file.as_ref()
    }

    pub fn bank(&self) -> Option<&Bank> {
        self.bank.as_ref()
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn output_reference(&self) -> Option<&str> {
        self.output_reference.as_deref()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    // ── Input events ─────────────────────────────────────────────────────

    /// Select a statement file, starting a fresh attempt.
    ///
    /// Rejected files leave the session exactly as it was. An accepted file
    /// discards the bank, credential, suggestions, output reference and any
    /// error, and invalidates calls still in flight.
    pub fn select_file(&mut self, file: UploadedFile) -> Result<(), ConverterError> {
        if !self.accepted_types.iter().any(|t| t == file.extension()) {
            return Err(ConverterError::UnsupportedFileType {
                file_name: file.file_name().to_string(),
                accepted: self.accepted_types.join(", "),
            });
        }
        self.start_over();
        info!(
            generation = self.generation,
            "Selected statement '{}' ({:.2} KB)",
            file.file_name(),
            file.size_kib()
        );
        self.file = Some(file);
        self.phase = Phase::FileSelected;
        Ok(())
    }

    /// Drop the selected file and go back to `Empty`.
    pub fn clear_file(&mut self) {
        self.start_over();
        debug!(generation = self.generation, "Cleared statement file");
    }

    /// Restart the flow from scratch.
    pub fn reset(&mut self) {
        self.start_over();
        debug!(generation = self.generation, "Session reset");
    }

    pub fn select_bank(&mut self, bank_id: &str) -> Result<(), ConverterError> {
        let bank = self.registry.get(bank_id)?.clone();
        self.ensure_editable("select a bank")?;
        debug!("Selected bank {}", bank.id);
        self.bank = Some(bank);
        self.reevaluate();
        Ok(())
    }

    /// Set the bank credential. Only its presence is checked here; the
    /// backend decides whether it is correct.
    pub fn set_credential(&mut self, credential: impl Into<String>) -> Result<(), ConverterError> {
        self.ensure_editable("set the credential")?;
        self.credential = credential.into();
        self.reevaluate();
        Ok(())
    }

    /// Leave `Errored` without retrying.
    pub fn dismiss_error(&mut self) -> Result<(), ConverterError> {
        let step = match (&self.phase, &self.failure) {
            (Phase::Errored, Some(f)) => f.step,
            (phase, _) => {
                return Err(ConverterError::ActionNotAllowed {
                    action: "dismiss an error",
                    phase: *phase,
                })
            }
        };
        self.failure = None;
        match step {
            Step::Convert => self.reevaluate(),
            Step::Approve => self.phase = Phase::SuggestionsPending,
        }
        Ok(())
    }

    // ── Convert ──────────────────────────────────────────────────────────

    /// Validate the inputs and move to `Submitting`.
    pub fn begin_submit(&mut self) -> Result<SubmitTicket, ConverterError> {
        match self.phase {
            phase if phase.is_busy() => return Err(ConverterError::RequestInFlight),
            Phase::Empty | Phase::FileSelected | Phase::Ready => {}
            Phase::Errored if self.failed_step() == Some(Step::Convert) => {}
            phase => {
                return Err(ConverterError::ActionNotAllowed {
                    action: "submit",
                    phase,
                })
            }
        }

        let file = self
            .file
            .as_ref()
            .ok_or(ConverterError::MissingSelection("no statement file selected"))?;
        let bank = self
            .bank
            .as_ref()
            .ok_or(ConverterError::MissingSelection("no bank selected"))?;
        if bank.requires_credential && self.credential.trim().is_empty() {
            return Err(ConverterError::MissingCredential {
                bank: bank.id.clone(),
            });
        }

        let request = ConversionRequest {
            file: file.clone(),
            bank: bank.clone(),
            credential: (!self.credential.trim().is_empty()).then(|| self.credential.clone()),
        };

        self.phase = Phase::Submitting;
        self.failure = None;
        info!(
            generation = self.generation,
            bank = %request.bank.id,
            "Submitting '{}' for conversion",
            request.file.file_name()
        );

        Ok(SubmitTicket {
            generation: self.generation,
            request,
        })
    }

    /// Apply the result of a `convert` call.
    pub fn complete_submit(
        &mut self,
        ticket: SubmitTicket,
        outcome: Result<ConvertResponse, TransportError>,
    ) -> Completion {
        if let Some(stale) = self.stale(ticket.generation, Phase::Submitting) {
            return stale;
        }
        match outcome {
            Ok(response) => {
                info!(
                    generation = self.generation,
                    "Conversion returned {} suggestion(s)",
                    response.suggestions.len()
                );
                self.suggestions = response.suggestions;
                self.output_reference =
                    Some(response.output_file).filter(|r| !r.trim().is_empty());
                self.phase = Phase::SuggestionsPending;
            }
            Err(e) => {
                warn!(generation = self.generation, kind = %e.kind, "Conversion failed: {}", e.message);
                self.fail(Step::Convert, e);
            }
        }
        Completion::Applied
    }

    // ── Approve ──────────────────────────────────────────────────────────

    /// Move to `ApprovalSubmitting` with the full suggestion list.
    ///
    /// An empty list completes immediately without a backend call.
    pub fn begin_approve(&mut self) -> Result<ApprovalStart, ConverterError> {
        match self.phase {
            phase if phase.is_busy() => return Err(ConverterError::RequestInFlight),
            Phase::SuggestionsPending => {}
            Phase::Errored if self.failed_step() == Some(Step::Approve) => {}
            phase => {
                return Err(ConverterError::ActionNotAllowed {
                    action: "approve",
                    phase,
                })
            }
        }

        self.failure = None;
        if self.suggestions.is_empty() {
            info!(generation = self.generation, "No suggestions to approve");
            self.phase = Phase::Completed;
            return Ok(ApprovalStart::NothingToApprove);
        }

        self.phase = Phase::ApprovalSubmitting;
        info!(
            generation = self.generation,
            "Approving {} suggestion(s)",
            self.suggestions.len()
        );
        Ok(ApprovalStart::Call(ApprovalTicket {
            generation: self.generation,
            suggestions: self.suggestions.clone(),
        }))
    }

    /// Apply the result of an `approve` call.
    pub fn complete_approve(
        &mut self,
        ticket: ApprovalTicket,
        outcome: Result<(), TransportError>,
    ) -> Completion {
        if let Some(stale) = self.stale(ticket.generation, Phase::ApprovalSubmitting) {
            return stale;
        }
        match outcome {
            Ok(()) => {
                info!(generation = self.generation, "Suggestions approved");
                self.suggestions.clear();
                self.phase = Phase::Completed;
            }
            Err(e) => {
                warn!(generation = self.generation, kind = %e.kind, "Approval failed: {}", e.message);
                self.fail(Step::Approve, e);
            }
        }
        Completion::Applied
    }

    // ── Cancellation ─────────────────────────────────────────────────────

    /// Record that the call issued at `issued` was dropped before it
    /// returned.
    ///
    /// The session cannot know whether the server received the request, so
    /// the step is failed with a `NetworkError` and can be retried. Calls
    /// already superseded by a newer generation are ignored.
    pub fn abandon(&mut self, issued: u64) -> Completion {
        if issued != self.generation || !self.phase.is_busy() {
            return Completion::Discarded {
                issued,
                current: self.generation,
            };
        }
        let step = match self.phase {
            Phase::Submitting => Step::Convert,
            _ => Step::Approve,
        };
        warn!(generation = self.generation, ?step, "Request cancelled before a reply");
        self.fail(step, TransportError::network(REQUEST_CANCELLED));
        Completion::Applied
    }

    // ── Snapshot ─────────────────────────────────────────────────────────

    pub fn submit_blocker(&self) -> Option<SubmitBlocker> {
        let editable = match self.phase {
            Phase::Empty | Phase::FileSelected | Phase::Ready => true,
            Phase::Errored => self.failed_step() == Some(Step::Convert),
            _ => false,
        };
        if !editable {
            return None;
        }
        match (&self.file, &self.bank) {
            (Some(_), Some(bank)) => {
                if bank.requires_credential && self.credential.trim().is_empty() {
                    Some(SubmitBlocker::MissingCredential)
                } else {
                    None
                }
            }
            _ => Some(SubmitBlocker::MissingSelection),
        }
    }

    pub fn can_submit(&self) -> bool {
        let phase_ok = match self.phase {
            Phase::Ready => true,
            Phase::Errored => self.failed_step() == Some(Step::Convert),
            _ => false,
        };
        phase_ok && self.inputs_complete()
    }

    pub fn can_approve(&self) -> bool {
        match self.phase {
            Phase::SuggestionsPending => true,
            Phase::Errored => self.failed_step() == Some(Step::Approve),
            _ => false,
        }
    }

    pub fn can_download(&self) -> bool {
        self.phase == Phase::Completed && self.output_reference.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            generation: self.generation,
            file_name: self.file.as_ref().map(|f| f.file_name().to_string()),
            file_size: self.file.as_ref().map(|f| f.size()),
            bank: self.bank.as_ref().map(|b| b.id.clone()),
            credential_present: !self.credential.trim().is_empty(),
            error: self.failure.clone(),
            submit_blocker: self.submit_blocker(),
            suggestions: self.suggestions.clone(),
            output_reference: self.output_reference.clone(),
            can_submit: self.can_submit(),
            can_approve: self.can_approve(),
            can_download: self.can_download(),
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn start_over(&mut self) {
        self.generation += 1;
        self.file = None;
        self.bank = None;
        self.credential.clear();
        self.suggestions.clear();
        self.output_reference = None;
        self.failure = None;
        self.phase = Phase::Empty;
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), ConverterError> {
        match self.phase {
            Phase::Empty => Err(ConverterError::MissingSelection(
                "select a statement file first",
            )),
            Phase::FileSelected | Phase::Ready => Ok(()),
            Phase::Errored if self.failed_step() == Some(Step::Convert) => Ok(()),
            phase if phase.is_busy() => Err(ConverterError::RequestInFlight),
            phase => Err(ConverterError::ActionNotAllowed { action, phase }),
        }
    }

    fn inputs_complete(&self) -> bool {
        match (&self.file, &self.bank) {
            (Some(_), Some(bank)) => {
                !bank.requires_credential || !self.credential.trim().is_empty()
            }
            _ => false,
        }
    }

    fn reevaluate(&mut self) {
        self.failure = None;
        self.phase = if self.inputs_complete() {
            Phase::Ready
        } else {
            Phase::FileSelected
        };
    }

    fn failed_step(&self) -> Option<Step> {
        self.failure.as_ref().map(|f| f.step)
    }

    fn fail(&mut self, step: Step, error: TransportError) {
        self.failure = Some(SessionFailure {
            step,
            kind: error.kind,
            message: error.message,
        });
        self.phase = Phase::Errored;
    }

    fn stale(&self, issued: u64, expected: Phase) -> Option<Completion> {
        if issued == self.generation && self.phase == expected {
            return None;
        }
        warn!(
            issued,
            current = self.generation,
            phase = %self.phase,
            "Discarding stale completion"
        );
        Some(Completion::Discarded {
            issued,
            current: self.generation,
        })
    }
}
