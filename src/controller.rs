//! Async session controller: the surface a presentation layer talks to.
//!
//! [`ConversionController`] owns one [`ConversionSession`], the backend, and
//! the download resolver. Each UI action maps to one method; after every
//! state change the controller publishes a fresh [`SessionSnapshot`] on a
//! `watch` channel that renderers can subscribe to.
//!
//! ## Serialising completions
//!
//! The session lives behind a `std::sync::Mutex` that is never held across
//! an `.await`. A backend call is issued in three steps:
//!
//! 1. lock → `begin_*` (validate, take a generation-stamped ticket) → unlock
//! 2. await the backend with no lock held
//! 3. lock → `complete_*` (apply, or discard if the generation moved on) → unlock
//!
//! Selecting a new file during step 2 bumps the generation, so the late
//! completion is dropped in step 3 and reported as
//! [`ConverterError::Superseded`].

use crate::banks::{Bank, BankRegistry};
use crate::config::ClientConfig;
use crate::download::{Artifact, DownloadResolver};
use crate::error::{ConverterError, TransportError};
use crate::model::UploadedFile;
use crate::session::{ApprovalStart, Completion, ConversionSession, Phase, SessionSnapshot};
use crate::transport::{ConversionBackend, HttpTransport};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// One user flow: a session plus everything needed to drive it.
pub struct ConversionController {
    session: Mutex<ConversionSession>,
    backend: Arc<dyn ConversionBackend>,
    resolver: DownloadResolver,
    registry: Arc<BankRegistry>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl ConversionController {
    /// Controller talking HTTP to the backend described by `config`.
    pub fn connect(config: &ClientConfig, registry: Arc<BankRegistry>) -> Result<Self, ConverterError> {
        let backend = Arc::new(HttpTransport::new(config)?);
        Self::with_backend(config, registry, backend)
    }

    /// Controller over any [`ConversionBackend`].
    pub fn with_backend(
        config: &ClientConfig,
        registry: Arc<BankRegistry>,
        backend: Arc<dyn ConversionBackend>,
    ) -> Result<Self, ConverterError> {
        let session = ConversionSession::from_config(Arc::clone(&registry), config);
        let (snapshots, _) = watch::channel(session.snapshot());
        Ok(Self {
            session: Mutex::new(session),
            backend,
            resolver: DownloadResolver::new(config)?,
            registry,
            snapshots,
        })
    }

    // ── Read side ────────────────────────────────────────────────────────

    pub fn banks(&self) -> &[Bank] {
        self.registry.list_banks()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// The snapshot sequence as a `Stream`, starting with the current one.
    pub fn snapshot_stream(&self) -> WatchStream<SessionSnapshot> {
        WatchStream::new(self.subscribe())
    }

    // ── Input actions ────────────────────────────────────────────────────

    pub fn select_file(&self, file: UploadedFile) -> Result<SessionSnapshot, ConverterError> {
        self.update(|s| s.select_file(file))
    }

    /// Read `path` and select it.
    pub async fn select_path(&self, path: impl AsRef<Path>) -> Result<SessionSnapshot, ConverterError> {
        let file = UploadedFile::from_path(path).await?;
        self.select_file(file)
    }

    pub fn select_bank(&self, bank_id: &str) -> Result<SessionSnapshot, ConverterError> {
        self.update(|s| s.select_bank(bank_id))
    }

    pub fn set_credential(&self, credential: impl Into<String>) -> Result<SessionSnapshot, ConverterError> {
        let credential = credential.into();
        self.update(|s| s.set_credential(credential))
    }

    pub fn clear_file(&self) -> SessionSnapshot {
        self.apply(|s| s.clear_file())
    }

    pub fn reset(&self) -> SessionSnapshot {
        self.apply(|s| s.reset())
    }

    pub fn dismiss_error(&self) -> Result<SessionSnapshot, ConverterError> {
        self.update(|s| s.dismiss_error())
    }

    // ── Backend actions ──────────────────────────────────────────────────

    /// Submit the statement for conversion.
    ///
    /// Client-side validation failures return `Err` without touching the
    /// network or the session. A backend failure moves the session to
    /// `Errored` and is also returned as [`ConverterError::Backend`].
    ///
    /// Dropping the returned future before it resolves (a timeout, a
    /// `select!`, an aborted task) also leaves the session `Errored`, with a
    /// `NetworkError` failure, so the step can be retried.
    pub async fn submit(&self) -> Result<SessionSnapshot, ConverterError> {
        let ticket = {
            let mut session = self.lock();
            let ticket = session.begin_submit()?;
            self.publish(&session);
            ticket
        };
        let issued = ticket.generation();

        let guard = InFlight::new(self, issued);
        let outcome = self.backend.convert(&ticket.request).await;
        guard.disarm();
        let failure = outcome.as_ref().err().cloned();

        let mut session = self.lock();
        let completion = session.complete_submit(ticket, outcome);
        self.finish(session, issued, completion, failure)
    }

    /// Approve every pending suggestion.
    ///
    /// With no suggestions the session completes immediately and the
    /// backend is not called.
    pub async fn approve(&self) -> Result<SessionSnapshot, ConverterError> {
        let ticket = {
            let mut session = self.lock();
            let start = session.begin_approve()?;
            self.publish(&session);
            match start {
                ApprovalStart::Call(ticket) => ticket,
                ApprovalStart::NothingToApprove => return Ok(session.snapshot()),
            }
        };
        let issued = ticket.generation();

        let guard = InFlight::new(self, issued);
        let outcome = self.backend.approve(&ticket.suggestions).await;
        guard.disarm();
        let failure = outcome.as_ref().err().cloned();

        let mut session = self.lock();
        let completion = session.complete_approve(ticket, outcome);
        self.finish(session, issued, completion, failure)
    }

    // ── Download ─────────────────────────────────────────────────────────

    /// Resolve the converted artifact. Only valid once `Completed`.
    pub fn download(&self) -> Result<Artifact, ConverterError> {
        let session = self.lock();
        if session.phase() != Phase::Completed {
            return Err(ConverterError::NoOutputAvailable);
        }
        let reference = session
            .output_reference()
            .ok_or(ConverterError::NoOutputAvailable)?;
        self.resolver
            .resolve(reference, session.file().map(|f| f.file_name()))
    }

    /// Resolve the artifact and save it to `path`. Returns bytes written.
    pub async fn download_to(&self, path: impl AsRef<Path>) -> Result<u64, ConverterError> {
        let artifact = self.download()?;
        self.resolver.save(&artifact, path).await
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, ConversionSession> {
        // The session is only mutated through infallible state transitions,
        // so a poisoned lock still holds a consistent value.
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, session: &ConversionSession) {
        let snapshot = session.snapshot();
        debug!(phase = %snapshot.phase, generation = snapshot.generation, "Session updated");
        self.snapshots.send_replace(snapshot);
    }

    fn update<F>(&self, f: F) -> Result<SessionSnapshot, ConverterError>
    where
        F: FnOnce(&mut ConversionSession) -> Result<(), ConverterError>,
    {
        let mut session = self.lock();
        f(&mut session)?;
        self.publish(&session);
        Ok(session.snapshot())
    }

    fn apply<F>(&self, f: F) -> SessionSnapshot
    where
        F: FnOnce(&mut ConversionSession),
    {
        let mut session = self.lock();
        f(&mut session);
        self.publish(&session);
        session.snapshot()
    }

    fn finish(
        &self,
        session: MutexGuard<'_, ConversionSession>,
        issued: u64,
        completion: Completion,
        failure: Option<TransportError>,
    ) -> Result<SessionSnapshot, ConverterError> {
        match completion {
            Completion::Discarded { current, .. } => {
                Err(ConverterError::Superseded { issued, current })
            }
            Completion::Applied => {
                self.publish(&session);
                match failure {
                    Some(e) => Err(ConverterError::Backend(e)),
                    None => Ok(session.snapshot()),
                }
            }
        }
    }
}

/// Fails the outstanding step if the call is dropped before it returns.
struct InFlight<'a> {
    controller: &'a ConversionController,
    issued: u64,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(controller: &'a ConversionController, issued: u64) -> Self {
        Self {
            controller,
            issued,
            armed: true,
        }
    }

    /// The call returned; its outcome will be applied normally.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut session = self.controller.lock();
        if session.abandon(self.issued) == Completion::Applied {
            self.controller.publish(&session);
        }
    }
}
