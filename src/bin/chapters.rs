//! CLI binary for edgequake-chapters.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ProcessorConfig`, runs the processor and writes the result.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_chapters::{
    load_document, DocumentProcessor, ModelSpec, ProcessingProgressCallback, ProcessingStage,
    ProcessorConfig, ProgressCallback, UsageSummary,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that shows the running stage and prints one line per finished
/// stage with its wall-clock time.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Mutex::new(None),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: ProcessingStage) {
        *self.started.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
        self.bar.set_prefix("Processing");
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_complete(&self, stage: ProcessingStage) {
        let elapsed_ms = self
            .started
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        self.bar.println(format!(
            "  {} {:<24} {}",
            green("✓"),
            stage.as_str(),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
    }

    fn on_usage(&self, summary: &UsageSummary) {
        self.bar.println(format!(
            "    {}",
            dim(&format!(
                "{} calls  {} tokens in / {} out",
                summary.calls, summary.input_tokens, summary.output_tokens
            ))
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a parsed document; page images live in out/pages/
  chapters out/report.json --output-dir out

  # Write the result somewhere else, with an explicit report id
  chapters out/report.json --output-dir out --report-id AR-2023 -o ar2023.json

  # Cheap default model, stronger fallback for retries and captions
  chapters doc.json --output-dir out --model gpt-4.1-mini --fallback-model openai/gpt-4.1

  # Skip structural TOC validation and caption reparsing
  chapters doc.json --output-dir out --no-toc-validation --no-caption-fallback

INPUT:
  DOCUMENT.json is a Docling-style parsed document. The vision fallback reads
  rendered pages from <output-dir>/pages/page_0.png, page_1.png, …

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key
  ANTHROPIC_API_KEY         Anthropic API key
  GEMINI_API_KEY            Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER    Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL           Override model ID
  EDGEQUAKE_FALLBACK_MODEL  Escalation model, as `model` or `provider/model`
  RUST_LOG                  Log filter (overrides -v / -q)
"#;

/// Build page-accurate chapter trees from parsed documents using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "chapters",
    version,
    about = "Build page-accurate chapter trees from parsed documents using LLMs",
    long_about = "Find the table of contents of a parsed document (structure first, page images \
second), structure it with an LLM, map printed page numbers to PDF pages and attach every text \
block, image, table and footnote to its chapter.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Parsed document JSON.
    input: PathBuf,

    /// Parser output directory (holds `pages/page_N.png`).
    #[arg(long, env = "CHAPTERS_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Report id recorded in the result. Defaults to the input file stem.
    #[arg(long)]
    report_id: Option<String>,

    /// Result JSON path. Defaults to `<output-dir>/chapters.json`.
    #[arg(short, long, env = "CHAPTERS_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Model used by every stage (e.g. gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Escalation model, as `model` or `provider/model`.
    #[arg(long, env = "EDGEQUAKE_FALLBACK_MODEL")]
    fallback_model: Option<String>,

    /// Pages searched for a TOC by the rule-based locator.
    #[arg(long, env = "CHAPTERS_MAX_SEARCH_PAGES", default_value_t = 10)]
    max_search_pages: u32,

    /// Captions per parse/validation call.
    #[arg(long, env = "CHAPTERS_CAPTION_BATCH_SIZE", default_value_t = 10)]
    caption_batch_size: usize,

    /// Retries per completion call before escalating.
    #[arg(long, env = "CHAPTERS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Do not reparse captions that fail validation with the fallback model.
    #[arg(long)]
    no_caption_fallback: bool,

    /// Skip structural validation of the extracted TOC.
    #[arg(long)]
    no_toc_validation: bool,

    /// Disable the spinner.
    #[arg(long, env = "CHAPTERS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CHAPTERS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "CHAPTERS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; warnings still come through.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress = show_progress.then(CliProgressCallback::new);
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;

    let processor = DocumentProcessor::with_llm(config).context("Failed to set up LLM providers")?;

    // ── Ctrl-C → cancel at the next stage boundary ───────────────────────
    let cancel = processor.cancel_handle();
    let quiet = cli.quiet;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if !quiet {
                eprintln!("{} cancelling after the current stage…", cyan("⚠"));
            }
            cancel.cancel();
        }
    });

    let doc = load_document(&cli.input).await.context("Failed to load document")?;
    let report_id = cli.report_id.clone().unwrap_or_else(|| file_stem(&cli.input));
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.output_dir.join("chapters.json"));

    let started = Instant::now();
    let outcome = processor.process(&doc, &report_id, &cli.output_dir).await;
    if let Some(p) = &progress {
        p.finish();
    }
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{} {}: {}", red("✘"), bold(e.kind()), e);
            return Err(e).context("Processing failed");
        }
    };

    result
        .write_json(&output)
        .await
        .context("Failed to write result")?;

    // ── Summary ──────────────────────────────────────────────────────────
    if !cli.quiet {
        let usage = result.usage_summary();
        eprintln!(
            "{}  {} chapters  {} images  {} tables  {} footnotes  {}ms  →  {}",
            green("✔"),
            result.chapters.len(),
            result.images.len(),
            result.tables.len(),
            result.footnotes.len(),
            started.elapsed().as_millis(),
            bold(&output.display().to_string()),
        );
        eprintln!(
            "   {} calls  {} tokens in  /  {} tokens out  ({} on fallback)",
            dim(&usage.calls.to_string()),
            dim(&usage.input_tokens.to_string()),
            dim(&usage.output_tokens.to_string()),
            usage.fallback_calls,
        );
        for (component, totals) in &usage.by_component {
            eprintln!(
                "     {:<26} {}",
                component,
                dim(&format!(
                    "{} calls  {} in / {} out",
                    totals.calls, totals.input_tokens, totals.output_tokens
                )),
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ProcessorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ProcessorConfig> {
    let provider = cli.provider.clone().unwrap_or_else(detect_provider);
    let mut builder = ProcessorConfig::builder()
        .max_search_pages(cli.max_search_pages)
        .caption_batch_size(cli.caption_batch_size)
        .max_retries(cli.max_retries)
        .caption_fallback_retry(!cli.no_caption_fallback)
        .validate_structure(!cli.no_toc_validation);

    if let Some(model) = &cli.model {
        builder = builder.default_model(ModelSpec::parse(model, &provider));
    } else {
        builder = builder.default_model(ModelSpec::new(
            provider.clone(),
            edgequake_chapters::config::DEFAULT_MODEL,
        ));
    }
    if let Some(fallback) = &cli.fallback_model {
        builder = builder.fallback_model(ModelSpec::parse(fallback, &provider));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Provider from whichever API key is set, OpenAI first.
fn detect_provider() -> String {
    [
        ("OPENAI_API_KEY", "openai"),
        ("ANTHROPIC_API_KEY", "anthropic"),
        ("GEMINI_API_KEY", "gemini"),
    ]
    .iter()
    .find(|(var, _)| std::env::var(var).is_ok_and(|v| !v.is_empty()))
    .map(|(_, name)| name.to_string())
    .unwrap_or_else(|| edgequake_chapters::config::DEFAULT_PROVIDER.to_string())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string())
}
