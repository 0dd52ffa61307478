//! # statement-converter
//!
//! Client-side session logic for converting bank statements into a
//! categorized spreadsheet via a remote conversion service.
//!
//! The user picks a statement file, names the issuing bank (and a password
//! for banks whose exports are encrypted), reviews the categories the
//! service proposes for each line, approves them, and downloads the result.
//!
//! ## Flow
//!
//! ```text
//! statement file ─┐
//! bank (+password)┤
//!                 ├─ 1. Select    validate type, bank, credential (local)
//!                 ├─ 2. Submit    POST multipart → suggestions + output ref
//!                 ├─ 3. Review    suggestions shown to the user
//!                 ├─ 4. Approve   POST JSON [{texto, sugestao}]
//!                 └─ 5. Download  GET <server>/output/<file>
//! ```
//!
//! Every step is a transition of [`ConversionSession`]. A failed backend
//! call moves the session to `Errored` with its inputs intact, so the same
//! step can be retried. Picking a new file at any point starts over, and a
//! late response for the old file is discarded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statement_converter::{BankRegistry, ClientConfig, ConversionController};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url("http://localhost:8000")
//!         .build()?;
//!     let controller = ConversionController::connect(&config, Arc::new(BankRegistry::builtin()))?;
//!
//!     controller.select_path("extrato.csv").await?;
//!     controller.select_bank("XP")?;
//!     let review = controller.submit().await?;
//!     for s in &review.suggestions {
//!         println!("{} → {}", s.text, s.category);
//!     }
//!     controller.approve().await?;
//!     let bytes = controller.download_to("extrato_convertido.xlsx").await?;
//!     eprintln!("saved {bytes} bytes");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `stmtconv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! statement-converter = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod banks;
pub mod config;
pub mod controller;
pub mod download;
pub mod error;
pub mod model;
pub mod session;
pub mod transport;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use banks::{Bank, BankRegistry};
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_ACCEPTED_TYPES};
pub use controller::ConversionController;
pub use download::{Artifact, DownloadResolver};
pub use error::{ConverterError, FailureKind, TransportError};
pub use model::{ConversionRequest, ConvertResponse, EntryType, Suggestion, UploadedFile};
pub use session::{
    ApprovalStart, Completion, ConversionSession, Phase, SessionFailure, SessionSnapshot, Step,
    SubmitBlocker,
};
pub use transport::{ConversionBackend, HttpTransport};
