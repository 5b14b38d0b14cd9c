//! CLI binary for receipt2json.
//!
//! A thin shim over the library crate: maps flags onto `ExtractionConfig`,
//! then either extracts one image or runs the HTTP server.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use receipt2json::{
    parse_expense, run_server, ExtractionConfig, ExtractionProgressCallback, Extractor,
    ProgressCallback, Stage,
};
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that names the running stage and logs one line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.set_message("reading image…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let msg = match stage {
            Stage::Normalize => "decoding image…",
            Stage::Recognize => "running OCR…",
            Stage::Extract => "asking the model…",
        };
        self.bar.set_message(msg);
    }

    fn on_stage_complete(&self, stage: Stage, elapsed: Duration) {
        self.bar.println(format!(
            "  {} {:<10} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{:.2}s", elapsed.as_secs_f64())),
        ));
    }

    fn on_fallback(&self, reason: &str) {
        let msg = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} {:<10} {}",
            yellow("⚠"),
            "fallback",
            yellow(&msg)
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one receipt (Ollama on localhost, llama3.2:1b)
  receipt2json extract receipt.jpg

  # Parsed record plus timings as JSON
  receipt2json extract --json receipt.jpg > receipt.json

  # Serve the upload form on http://127.0.0.1:5000
  receipt2json serve

  # Listen on all interfaces with a different model
  receipt2json --model qwen2.5:0.5b serve --host 0.0.0.0 --port 8080

  # Use a hosted provider through edgequake-llm
  receipt2json --provider openai --model gpt-4.1-nano extract receipt.jpg

ENVIRONMENT VARIABLES:
  RECEIPT2JSON_MODEL        Model ID (default llama3.2:1b)
  RECEIPT2JSON_OLLAMA_URL   Ollama base URL (default http://localhost:11434)
  RECEIPT2JSON_PROVIDER     edgequake-llm provider name instead of Ollama
  RECEIPT2JSON_TESSERACT    Path to the tesseract executable
  RECEIPT2JSON_API_TIMEOUT  Per-call model timeout in seconds (default none)
  RECEIPT2JSON_UPLOAD_DIR   Directory uploads are staged in (default uploads)
  RUST_LOG                  Overrides the log filter

SETUP:
  1. Install tesseract:  apt install tesseract-ocr   (or brew install tesseract)
  2. Pull the model:     ollama pull llama3.2:1b
  3. Extract:            receipt2json extract receipt.jpg
"#;

/// Extract structured expense records from receipt images.
#[derive(Parser, Debug)]
#[command(
    name = "receipt2json",
    version,
    about = "Extract structured expense records from receipt images",
    long_about = "Reads a receipt image with Tesseract OCR and asks a local language model \
(Ollama by default) to fill a fixed expense JSON schema. When the model is unreachable a \
deterministic fallback record holding the OCR text is returned instead.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Model ID (e.g. llama3.2:1b, qwen2.5:0.5b, gpt-4.1-nano).
    #[arg(long, global = true, env = "RECEIPT2JSON_MODEL")]
    model: Option<String>,

    /// Ollama base URL.
    #[arg(long, global = true, env = "RECEIPT2JSON_OLLAMA_URL")]
    ollama_url: Option<String>,

    /// edgequake-llm provider (openai, anthropic, gemini, …) instead of Ollama.
    #[arg(long, global = true, env = "RECEIPT2JSON_PROVIDER")]
    provider: Option<String>,

    /// Tesseract executable name or path.
    #[arg(long, global = true, env = "RECEIPT2JSON_TESSERACT")]
    tesseract: Option<String>,

    /// Per-call model timeout in seconds.
    #[arg(long, global = true, env = "RECEIPT2JSON_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "RECEIPT2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "RECEIPT2JSON_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract one receipt image and print the result.
    Extract {
        /// Path to the receipt image.
        image: PathBuf,

        /// Print the parsed record and stats as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Serve the upload form and upload handler.
    Serve {
        /// Address to bind.
        #[arg(long, env = "RECEIPT2JSON_HOST", default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to bind.
        #[arg(long, env = "RECEIPT2JSON_PORT", default_value_t = 5000)]
        port: u16,

        /// Directory uploads are staged in.
        #[arg(long, env = "RECEIPT2JSON_UPLOAD_DIR")]
        upload_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs for single extractions; the server
    // always logs at INFO.
    let show_progress = match &cli.command {
        Command::Extract { json, .. } => !global.quiet && !json,
        Command::Serve { .. } => false,
    };
    let filter = if global.verbose {
        "debug"
    } else if global.quiet || show_progress {
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

    match &cli.command {
        Command::Extract { image, json } => {
            let progress = if show_progress {
                Some(CliProgressCallback::new())
            } else {
                None
            };
            let progress_cb = progress
                .as_ref()
                .map(|cb| Arc::clone(cb) as ProgressCallback);

            let config = build_config(global, progress_cb, None)?;
            let extractor = Extractor::from_config(config).context("Failed to set up extractor")?;

            let result = extractor.extract_file(image).await;
            if let Some(ref cb) = progress {
                cb.finish();
            }
            let result = result
                .with_context(|| format!("Extraction failed for '{}'", image.display()))?;

            if *json {
                let report = serde_json::json!({
                    "expense": parse_expense(&result.content),
                    "result": &result,
                });
                let out = serde_json::to_string_pretty(&report).context("Failed to serialise output")?;
                println!("{out}");
            } else {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(result.content.as_bytes())
                    .context("Failed to write to stdout")?;
                if !result.content.ends_with('\n') {
                    handle.write_all(b"\n").context("Failed to write to stdout")?;
                }
            }

            if !global.quiet && !json {
                eprintln!(
                    "{}  {}  ocr {}ms  llm {}ms  total {}ms",
                    if result.is_fallback() {
                        yellow("⚠ fallback")
                    } else {
                        green("✔")
                    },
                    bold(&image.display().to_string()),
                    result.stats.ocr_ms,
                    result.stats.llm_ms,
                    result.stats.total_ms,
                );
            }
        }

        Command::Serve {
            host,
            port,
            upload_dir,
        } => {
            let config = build_config(global, None, upload_dir.clone())?;
            let extractor = Extractor::from_config(config).context("Failed to set up extractor")?;
            let addr = SocketAddr::new(*host, *port);

            run_server(Arc::new(extractor), addr)
                .await
                .map_err(|e| anyhow::anyhow!(e))
                .context("Server error")?;
        }
    }

    Ok(())
}

/// Map CLI flags onto an [`ExtractionConfig`].
fn build_config(
    global: &GlobalArgs,
    progress_cb: Option<ProgressCallback>,
    upload_dir: Option<PathBuf>,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder();

    if let Some(ref model) = global.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref url) = global.ollama_url {
        builder = builder.ollama_url(url.clone());
    }
    if let Some(ref provider) = global.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref program) = global.tesseract {
        builder = builder.tesseract_program(program.clone());
    }
    if let Some(secs) = global.api_timeout {
        builder = builder.api_timeout_secs(secs);
    }
    if let Some(dir) = upload_dir {
        builder = builder.upload_dir(dir);
    }
    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
