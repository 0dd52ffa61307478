//! CLI binary for statement-converter.
//!
//! A thin shim over the library crate: maps CLI flags to `ClientConfig`,
//! drives one `ConversionController` through select → submit → review →
//! approve → download, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use statement_converter::{
    BankRegistry, ClientConfig, ConversionController, Phase, SessionSnapshot, Suggestion,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert, review the suggestions, confirm, and download
  stmtconv extrato.csv --bank XP

  # Encrypted C6 export, approve without prompting
  stmtconv fatura.pdf --bank C6 --password 123456 -y

  # Choose where the converted spreadsheet goes
  stmtconv extrato.xlsx --bank Itau -y -o ~/Downloads/marco.xlsx

  # Only look at the suggestions; nothing is approved
  stmtconv extrato.csv --bank Avenue --review-only --json

  # List the banks this client knows about
  stmtconv --list-banks

ENVIRONMENT VARIABLES:
  STMTCONV_SERVER      Conversion server base URL (default http://localhost:8000)
  STMTCONV_BANK        Bank identifier
  STMTCONV_PASSWORD    Statement password for banks that require one
  STMTCONV_BANKS_FILE  JSON file replacing the built-in bank list
  RUST_LOG             Overrides the log filter (e.g. statement_converter=debug)
"#;

/// Convert bank statements into categorized spreadsheets.
#[derive(Parser, Debug)]
#[command(
    name = "stmtconv",
    version,
    about = "Convert bank statements into categorized spreadsheets",
    long_about = "Upload a bank statement (.xlsx, .xls, .csv, .pdf) to a conversion server, \
review the category it proposes for each line, approve them, and download the \
converted spreadsheet.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Statement file to convert.
    #[arg(required_unless_present = "list_banks")]
    input: Option<PathBuf>,

    /// Issuing bank identifier (see --list-banks).
    #[arg(short, long, env = "STMTCONV_BANK", required_unless_present = "list_banks")]
    bank: Option<String>,

    /// Password for banks whose statements are encrypted.
    #[arg(short, long, env = "STMTCONV_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Conversion server base URL.
    #[arg(long, env = "STMTCONV_SERVER", default_value = "http://localhost:8000")]
    server: String,

    /// Save the converted file here instead of `<stem>_convertido.<ext>`.
    #[arg(short, long, env = "STMTCONV_OUTPUT")]
    output: Option<PathBuf>,

    /// Approve the suggestions without asking.
    #[arg(short = 'y', long, env = "STMTCONV_YES", conflicts_with = "review_only")]
    yes: bool,

    /// Print the suggestions and stop; nothing is approved or downloaded.
    #[arg(long, env = "STMTCONV_REVIEW_ONLY")]
    review_only: bool,

    /// Print machine-readable JSON on stdout.
    #[arg(long, env = "STMTCONV_JSON")]
    json: bool,

    /// Request timeout in seconds (0 disables it).
    #[arg(long, env = "STMTCONV_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// JSON file with the bank list, replacing the built-in one.
    #[arg(long, env = "STMTCONV_BANKS_FILE")]
    banks_file: Option<PathBuf>,

    /// Print the known banks and exit.
    #[arg(long)]
    list_banks: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "STMTCONV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STMTCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "STMTCONV_QUIET")]
    quiet: bool,
}

/// `--json` summary of a finished run.
#[derive(Serialize)]
struct RunSummary<'a> {
    phase: Phase,
    suggestions: &'a [Suggestion],
    output_reference: Option<&'a str>,
    saved_to: Option<String>,
    bytes: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers what INFO logs would say; keep them out of its way.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let registry = Arc::new(load_registry(&cli).await?);

    // ── List-banks mode ──────────────────────────────────────────────────
    if cli.list_banks {
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(registry.list_banks())
                    .context("Failed to serialise bank list")?
            );
        } else {
            for bank in registry.list_banks() {
                let note = if bank.requires_credential {
                    dim("  (password required)")
                } else {
                    String::new()
                };
                println!("{:<10} {}{}", bold(&bank.id), bank.name, note);
            }
        }
        return Ok(());
    }

    let config = build_config(&cli)?;
    let controller = Arc::new(
        ConversionController::connect(&config, Arc::clone(&registry))
            .context("Failed to set up the conversion client")?,
    );

    // ── Inputs ───────────────────────────────────────────────────────────
    let input = cli.input.as_ref().context("No statement file given")?;
    let bank = cli.bank.as_deref().context("No bank given (use --bank)")?;

    controller
        .select_path(input)
        .await
        .with_context(|| format!("Cannot use '{}'", input.display()))?;
    controller.select_bank(bank).context("Invalid bank")?;
    if let Some(ref password) = cli.password {
        controller.set_credential(password.clone())?;
    }

    // ── Submit ───────────────────────────────────────────────────────────
    let spinner = show_progress.then(|| PhaseSpinner::start(&controller));
    let submitted = controller.submit().await;
    drop(spinner);
    let review = submitted.context("Conversion failed")?;

    if !cli.json && !cli.quiet {
        print_suggestions(&review.suggestions);
    }

    if cli.review_only {
        return print_summary(&cli, &review, None, None);
    }

    // ── Approve ──────────────────────────────────────────────────────────
    if !cli.yes && !review.suggestions.is_empty() && !confirm("Approve these categories?")? {
        if !cli.quiet {
            eprintln!("{} Nothing approved", cyan("◆"));
        }
        return print_summary(&cli, &review, None, None);
    }

    let spinner = show_progress.then(|| PhaseSpinner::start(&controller));
    controller.approve().await.context("Approval failed")?;

    // ── Download ─────────────────────────────────────────────────────────
    let artifact = controller.download().context("No converted file to download")?;
    let target = cli
        .output
        .clone()
        .unwrap_or_else(|| default_target(input, &artifact.file_name));
    let written = controller.download_to(&target).await;
    drop(spinner);
    let bytes = written.context("Download failed")?;

    let done = controller.snapshot();
    if !cli.quiet && !cli.json {
        eprintln!(
            "{}  {} categories approved  →  {}  {}",
            green("✔"),
            review.suggestions.len(),
            bold(&target.display().to_string()),
            dim(&format!("{bytes} bytes")),
        );
    }
    print_summary(&cli, &done, Some(&target), Some(bytes))
}

/// Built-in registry, or the one in `--banks-file`.
async fn load_registry(cli: &Cli) -> Result<BankRegistry> {
    match cli.banks_file {
        Some(ref path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read bank list from {:?}", path))?;
            BankRegistry::from_json(&json)
                .with_context(|| format!("Invalid bank list in {:?}", path))
        }
        None => Ok(BankRegistry::builtin()),
    }
}

/// Map CLI args to `ClientConfig`.
fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder().base_url(cli.server.clone());
    builder = if cli.timeout == 0 {
        builder.no_request_timeout()
    } else {
        builder.request_timeout_secs(cli.timeout)
    };
    builder.build().context("Invalid configuration")
}

/// Save next to the statement unless `-o` says otherwise.
fn default_target(input: &std::path::Path, file_name: &str) -> PathBuf {
    match input.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(file_name),
        _ => PathBuf::from(file_name),
    }
}

/// Spinner whose message follows the session phase.
///
/// Dropping it clears the bar and stops the task that feeds it.
struct PhaseSpinner {
    bar: ProgressBar,
    task: JoinHandle<()>,
}

impl PhaseSpinner {
    fn start(controller: &Arc<ConversionController>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));

        let mut stream = controller.snapshot_stream();
        let handle = bar.clone();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = stream.next().await {
                let (prefix, msg) = match snapshot.phase {
                    Phase::Submitting => ("Converting", "uploading statement…"),
                    Phase::SuggestionsPending => ("Review", "suggestions received"),
                    Phase::ApprovalSubmitting => ("Approving", "saving categories…"),
                    Phase::Completed => ("Download", "fetching converted file…"),
                    Phase::Errored => ("Failed", snapshot.error_message().unwrap_or("error")),
                    _ => ("Preparing", "checking inputs…"),
                };
                handle.set_prefix(prefix);
                handle.set_message(msg.to_string());
            }
        });
        Self { bar, task }
    }
}

impl Drop for PhaseSpinner {
    fn drop(&mut self) {
        self.task.abort();
        self.bar.finish_and_clear();
    }
}

fn print_suggestions(suggestions: &[Suggestion]) {
    if suggestions.is_empty() {
        eprintln!("{} The server proposed no categories", cyan("◆"));
        return;
    }
    eprintln!(
        "{} {}",
        cyan("◆"),
        bold(&format!("{} suggested categories:", suggestions.len()))
    );
    let width = suggestions
        .iter()
        .map(|s| s.text.chars().count())
        .max()
        .unwrap_or(0)
        .min(48);
    for s in suggestions {
        let text: String = s.text.chars().take(width).collect();
        eprintln!(
            "  {} {:<width$}  {}",
            dim(s.entry_type.code()),
            text,
            green(&s.category),
        );
    }
}

/// y/N prompt on stderr. Anything but `y`/`yes`/`s`/`sim` declines.
fn confirm(question: &str) -> Result<bool> {
    eprint!("{} {} ", bold(question), dim("[y/N]"));
    io::stderr().flush().ok();
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer from stdin")?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "s" | "sim"
    ))
}

fn print_summary(
    cli: &Cli,
    snapshot: &SessionSnapshot,
    saved_to: Option<&PathBuf>,
    bytes: Option<u64>,
) -> Result<()> {
    if !cli.json {
        if saved_to.is_none() && !cli.quiet && snapshot.phase == Phase::Errored {
            eprintln!("{} {}", red("✘"), snapshot.error_message().unwrap_or("failed"));
        }
        return Ok(());
    }
    let summary = RunSummary {
        phase: snapshot.phase,
        suggestions: &snapshot.suggestions,
        output_reference: snapshot.output_reference.as_deref(),
        saved_to: saved_to.map(|p| p.display().to_string()),
        bytes,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Arc<ConversionController> {
        let config = ClientConfig::default();
        Arc::new(
            ConversionController::connect(&config, Arc::new(BankRegistry::builtin())).unwrap(),
        )
    }

    #[tokio::test]
    async fn dropped_spinner_stops_its_task() {
        let c = controller();
        let first = PhaseSpinner::start(&c);
        let first_task = first.task.abort_handle();
        drop(first);

        let second = PhaseSpinner::start(&c);
        let second_task = second.task.abort_handle();
        for _ in 0..100 {
            if first_task.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(first_task.is_finished());
        assert!(!second_task.is_finished());

        drop(second);
        for _ in 0..100 {
            if second_task.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(second_task.is_finished());
    }

    #[test]
    fn default_target_sits_next_to_the_statement() {
        assert_eq!(
            default_target(std::path::Path::new("/tmp/in/extrato.csv"), "extrato_convertido.xlsx"),
            PathBuf::from("/tmp/in/extrato_convertido.xlsx")
        );
        assert_eq!(
            default_target(std::path::Path::new("extrato.csv"), "extrato_convertido.xlsx"),
            PathBuf::from("extrato_convertido.xlsx")
        );
    }
}
