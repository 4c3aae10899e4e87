//! CLI binary for md2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! wires Ctrl-C to cooperative cancellation and prints the batch report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use md2pdf::{
    enumerate_inputs, plan_batch, BatchConfig, BatchProgressCallback, BatchRunner, BatchSummary,
    CancelFlag, CommandEngine, ConversionResult, EngineCommand, Outcome, ProgressCallback,
    ThemeRegistry,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Path relative to the current directory when possible, for shorter lines.
fn short(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per document.
/// Documents complete out of order, so start times are keyed by job index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_for(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total} Markdown files…"))
        ));
    }

    fn on_job_start(&self, index: usize, _total: usize, source: &Path) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, Instant::now());
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.set_message(name);
    }

    fn on_job_complete(&self, result: &ConversionResult, completed: usize, total: usize) {
        let secs = self.elapsed_for(result.index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            completed,
            total,
            short(&result.output),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_error(&self, result: &ConversionResult, completed: usize, total: usize) {
        let secs = self.elapsed_for(result.index);
        let message = match &result.outcome {
            Outcome::Failure { message, .. } => message.as_str(),
            Outcome::Success { .. } => "",
        };
        // Keep one line per file even for long engine diagnostics.
        let message: String = if message.chars().count() > 100 {
            message.chars().take(99).chain(std::iter::once('…')).collect()
        } else {
            message.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            completed,
            total,
            short(&result.source),
            red(&message),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a vault, keeping its folder structure under ./pdf
  md2pdf ~/notes

  # Dark theme, custom font, flat output directory
  md2pdf --theme dark --font-family "Inter" --flatten -o out docs/*.md

  # Explicit base directory and a per-file time limit
  md2pdf --base-dir ~/notes --timeout 60 ~/notes/projects

  # Machine-readable report
  md2pdf --json docs > report.json

  # Show what would be written, without converting
  md2pdf --dry-run docs

  # Use a different engine invocation
  md2pdf --engine /opt/weasyprint/bin/weasyprint \
         --engine-arg=--base-url --engine-arg={base_url} \
         --engine-arg={input} --engine-arg={output} docs

CALLOUTS:
  > [!warning] Title        note, info, todo, tip, success, question,
  > Body text               warning, failure, danger, bug, example,
                            quote, abstract (+ aliases); unknown → note

ENVIRONMENT VARIABLES:
  MD2PDF_OUTPUT           Output directory (default: pdf)
  MD2PDF_THEME            light | dark
  MD2PDF_FONT_FAMILY      Font for text and code
  MD2PDF_ENGINE           Engine program name or path (default: weasyprint)
  MD2PDF_ENGINE_PATH      Executable used for the default engine; skips the PATH search
  RUST_LOG                Log filter (e.g. md2pdf=debug)

SETUP:
  md2pdf needs WeasyPrint on PATH:  pip install weasyprint
  Check with:                       md2pdf --check-engine
"#;

/// Convert Markdown files and folders into themed PDF documents.
#[derive(Parser, Debug)]
#[command(
    name = "md2pdf",
    version,
    about = "Convert Markdown files and folders into themed PDF documents",
    long_about = "Convert Markdown notes (CommonMark + GFM, Obsidian callouts, highlighted code) \
into styled PDFs. Folders are converted recursively and in parallel; one bad file never stops \
the batch.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown files or directories to convert.
    #[arg(required_unless_present_any = ["list_themes", "check_engine"])]
    inputs: Vec<PathBuf>,

    /// Directory receiving the PDFs.
    #[arg(short, long, env = "MD2PDF_OUTPUT", default_value = "pdf")]
    output: PathBuf,

    /// Visual theme: light or dark.
    #[arg(short, long, env = "MD2PDF_THEME", default_value = "light")]
    theme: String,

    /// Font family for text and code.
    #[arg(long, env = "MD2PDF_FONT_FAMILY", default_value = md2pdf::config::DEFAULT_FONT_FAMILY)]
    font_family: String,

    /// Base font size in points (6–32).
    #[arg(long, env = "MD2PDF_FONT_SIZE", default_value_t = md2pdf::config::DEFAULT_FONT_SIZE_PT)]
    font_size: f32,

    /// Put every PDF directly in the output directory.
    #[arg(long, env = "MD2PDF_FLATTEN")]
    flatten: bool,

    /// Root for relative output paths (default: common parent of the inputs).
    #[arg(long, env = "MD2PDF_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Documents converted in parallel (default: number of CPUs).
    #[arg(short, long, env = "MD2PDF_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Per-document time limit in seconds.
    #[arg(long, env = "MD2PDF_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Do not add the file name as a title heading.
    #[arg(long, env = "MD2PDF_NO_TITLE")]
    no_title: bool,

    /// Rendering engine program.
    #[arg(long, env = "MD2PDF_ENGINE", default_value = "weasyprint")]
    engine: String,

    /// Engine argument template (repeatable); {input}, {output}, {base_url} are substituted.
    #[arg(long = "engine-arg", env = "MD2PDF_ENGINE_ARGS", value_delimiter = ' ',
          allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Print the batch summary as JSON on stdout.
    #[arg(long, env = "MD2PDF_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "MD2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Print planned source → PDF pairs without converting.
    #[arg(long)]
    dry_run: bool,

    /// List the available themes and exit.
    #[arg(long)]
    list_themes: bool,

    /// Locate the rendering engine, print its version and exit.
    #[arg(long)]
    check_engine: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MD2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MD2PDF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports per-file results, so library INFO
    // logs are suppressed while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.dry_run;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    // ── Informational modes ──────────────────────────────────────────────
    if cli.list_themes {
        for id in ThemeRegistry::ids() {
            println!("{id}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let engine_command = engine_command(&cli);

    if cli.check_engine {
        let engine = CommandEngine::from_config(&engine_command, None).context("Engine check failed")?;
        let version = engine_locate::probe_version(engine.program())
            .with_context(|| format!("Failed to run {}", engine.program().display()))?;
        println!("{}  {}", engine.program().display(), version);
        return Ok(ExitCode::SUCCESS);
    }

    // ── Plan ─────────────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, engine_command, progress_cb)?;

    let sources = enumerate_inputs(&cli.inputs).context("Failed to read inputs")?;
    if sources.is_empty() {
        if !cli.quiet {
            eprintln!("{} No Markdown files found", yellow("⚠"));
        }
        return Ok(ExitCode::SUCCESS);
    }

    if cli.dry_run {
        let jobs = plan_batch(&sources, &config).context("Failed to plan batch")?;
        for job in &jobs {
            match job.destination() {
                Ok(dest) => println!("{} → {}", short(&job.source), short(&dest)),
                Err(e) => println!("{} ✗ {}", short(&job.source), e),
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // Locate the engine before planning so a missing engine leaves no output directory behind.
    let engine = CommandEngine::from_config(&config.engine, config.job_timeout())
        .context("Rendering engine not available")?;
    let jobs = plan_batch(&sources, &config).context("Failed to plan batch")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            cancel.cancel();
            eprintln!(
                "{} Cancelling: finishing documents in progress (Ctrl-C again to abort)",
                yellow("⚠")
            );
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    }

    let summary = BatchRunner::from_config(&config, Arc::new(engine))
        .cancel_flag(cancel)
        .run(jobs)
        .await;

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        print_report(&summary, show_progress);
    }

    Ok(if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn engine_command(cli: &Cli) -> EngineCommand {
    if cli.engine_args.is_empty() {
        EngineCommand {
            program: cli.engine.clone(),
            ..EngineCommand::default()
        }
    } else {
        EngineCommand::new(cli.engine.clone(), cli.engine_args.clone())
    }
}

/// Map CLI args to `BatchConfig`.
fn build_config(cli: &Cli, engine: EngineCommand, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .theme(&cli.theme)
        .font_family(&cli.font_family)
        .font_size(cli.font_size)
        .output_root(&cli.output)
        .preserve_structure(!cli.flatten)
        .document_title(!cli.no_title)
        .engine(engine);

    if let Some(base) = &cli.base_dir {
        builder = builder.base_directory(base);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.job_timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_report(summary: &BatchSummary, progress_shown: bool) {
    // Without the bar, failures have not been listed yet.
    if !progress_shown {
        for result in summary.failures() {
            if let Outcome::Failure { kind, message } = &result.outcome {
                eprintln!("  {} {}  {}  {}", red("✗"), short(&result.source), dim(&kind.to_string()), message);
            }
        }
    }

    let total = summary.total();
    let secs = summary.duration_ms as f64 / 1000.0;
    if summary.failed == 0 {
        eprintln!(
            "{} {} files converted in {:.1}s",
            green("✔"),
            bold(&summary.succeeded.to_string()),
            secs
        );
    } else {
        eprintln!(
            "{} {}/{} files converted in {:.1}s  ({} failed)",
            if summary.succeeded == 0 { red("✘") } else { cyan("⚠") },
            bold(&summary.succeeded.to_string()),
            total,
            secs,
            red(&summary.failed.to_string()),
        );
    }
    if summary.cancelled {
        eprintln!("{} Batch was cancelled; unstarted files were skipped", yellow("⚠"));
    }
}
