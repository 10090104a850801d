//! CLI binary for docjobs.
//!
//! A thin shim over the library crate: job records live under
//! `<data-dir>/jobs`, documents under `<artifact-root>/<namespace>/<key>`.
//! `submit` only records a job; `serve` executes recorded jobs; `run` does
//! both in one process.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use docjobs::{
    convert_bytes, convert_now, ConversionKind, Engines, FsArtifactStore, FsJobStore, Job,
    JobProgressCallback, JobService, JobStatus, LatexEngine, PdfRasterEngine, ProgressCallback,
    ServiceConfig, SubmitRequest, WaitOptions,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn percent_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix(prefix.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Drives a percentage bar from the runner's checkpoints and prints one line
/// per emitted unit.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = percent_bar("Converting");
        bar.set_message("queued…");
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_start(&self, _job_id: &str) {
        self.bar.set_message("fetching source…");
    }

    fn on_checkpoint(&self, _job_id: &str, progress: u8) {
        self.bar.set_position(progress as u64);
    }

    fn on_units_discovered(&self, _job_id: &str, total: usize) {
        self.bar.set_message(format!("{total} units"));
    }

    fn on_unit_complete(&self, _job_id: &str, unit: usize, total: usize, progress: u8) {
        self.bar.println(format!(
            "  {} Unit {:>3}/{:<3}  {}",
            green("✓"),
            unit,
            total,
            dim(&format!("{progress}%"))
        ));
    }

    fn on_job_complete(&self, _job_id: &str, total: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} units converted", green("✔"), bold(&total.to_string()));
    }

    fn on_job_failed(&self, _job_id: &str, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(error));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a stored PDF in the background and wait for it
  docjobs --namespace documents run reports/q3.pdf

  # Record a job only; a `serve` process executes it
  docjobs --namespace documents submit reports/q3.pdf --callback-url https://example.com/hook
  docjobs serve --workers 4

  # Poll
  docjobs status 1b4e28ba-2fa1-11d2-883f-0016d3cca427
  docjobs wait 1b4e28ba-2fa1-11d2-883f-0016d3cca427 --timeout 900
  docjobs list --status failed --limit 20

  # Immediate conversion, no job record
  docjobs --namespace documents convert reports/q3.pdf --dpi 150
  docjobs convert --local ./paper.pdf --json > pages.json

  # LaTeX → DOCX (+ PDF)
  docjobs --namespace documents run thesis/main.tex --kind latex-to-docx --generate-pdf

ENVIRONMENT VARIABLES:
  DOCJOBS_DATA_DIR        Job record directory root (default ./data)
  DOCJOBS_ARTIFACT_ROOT   Artifact store root (default <data-dir>/artifacts)
  DOCJOBS_NAMESPACE       Default namespace for sources and outputs
  DOCJOBS_WORKERS         Concurrent jobs for `serve`
  PDFIUM_LIB_PATH         Path to libpdfium; skips the first-run download
  PDFIUM_AUTO_CACHE_DIR   Where the downloaded libpdfium is cached
  RUST_LOG                Log filter, overrides --verbose / --quiet
"#;

/// Asynchronous document conversion jobs.
#[derive(Parser, Debug)]
#[command(
    name = "docjobs",
    version,
    about = "Asynchronous document conversion jobs (PDF → PNG, LaTeX → DOCX/PDF)",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Root directory for job records.
    #[arg(long, global = true, env = "DOCJOBS_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Root directory of the artifact store. Default: <data-dir>/artifacts.
    #[arg(long, global = true, env = "DOCJOBS_ARTIFACT_ROOT")]
    artifact_root: Option<PathBuf>,

    /// Namespace used when a command does not name one.
    #[arg(long, global = true, env = "DOCJOBS_NAMESPACE")]
    namespace: Option<String>,

    /// Days a job record stays visible.
    #[arg(long, global = true, env = "DOCJOBS_RETENTION_DAYS", default_value_t = 7)]
    retention_days: u64,

    /// Print machine-readable JSON.
    #[arg(long, global = true, env = "DOCJOBS_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCJOBS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCJOBS_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a conversion job and print its id.
    Submit(JobArgs),
    /// Submit a job, execute it in this process and wait for it.
    Run(JobArgs),
    /// Execute recorded jobs until interrupted.
    Serve(ServeArgs),
    /// Print a job's current record.
    Status { job_id: String },
    /// List recent jobs.
    List {
        /// Only jobs in this status.
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Maximum number of jobs (1–1000).
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Wait for a job to finish.
    Wait {
        job_id: String,
        /// Seconds between polls.
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Give up after this many seconds.
        #[arg(long, default_value_t = 900)]
        timeout: u64,
    },
    /// Convert immediately without creating a job.
    Convert {
        #[command(flatten)]
        job: JobArgs,
        /// Treat SOURCE as a local file and return outputs inline.
        #[arg(long)]
        local: bool,
    },
    /// Delete expired job records.
    Purge,
}

#[derive(Args, Debug, Clone)]
struct JobArgs {
    /// Source key inside the namespace.
    source: String,

    #[arg(long, value_enum, default_value = "pdf-to-png")]
    kind: KindArg,

    /// Prefix for uploaded outputs. Default: "converted".
    #[arg(long)]
    output_prefix: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: Option<u32>,

    /// Faster PNG encoding, larger files.
    #[arg(long)]
    no_optimize: bool,

    /// LaTeX only: also produce a PDF.
    #[arg(long)]
    generate_pdf: bool,

    /// Keep outputs inline (base64) in the job record instead of uploading.
    #[arg(long)]
    inline: bool,

    /// URL notified when the job finishes.
    #[arg(long)]
    callback_url: Option<String>,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args, Debug, Clone, Default)]
struct ToolArgs {
    /// pandoc executable.
    #[arg(long, env = "DOCJOBS_PANDOC", default_value = "pandoc")]
    pandoc: PathBuf,
    /// LibreOffice executable.
    #[arg(long, env = "DOCJOBS_SOFFICE", default_value = "soffice")]
    soffice: PathBuf,
    /// Reference DOCX for pandoc styles.
    #[arg(long, env = "DOCJOBS_REFERENCE_DOC")]
    reference_doc: Option<PathBuf>,
    /// Lua filter for pandoc.
    #[arg(long, env = "DOCJOBS_LUA_FILTER")]
    lua_filter: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Concurrent jobs.
    #[arg(long, env = "DOCJOBS_WORKERS", default_value_t = 4)]
    workers: usize,
    /// Seconds between store scans for new, stale and expired jobs.
    #[arg(long, env = "DOCJOBS_POLL_INTERVAL", default_value_t = 2)]
    poll_interval: u64,
    /// Fail `processing` jobs without progress for this many seconds.
    #[arg(long, env = "DOCJOBS_STALE_AFTER")]
    stale_after: Option<u64>,
    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    PdfToPng,
    LatexToDocx,
}

impl From<KindArg> for ConversionKind {
    fn from(v: KindArg) -> Self {
        match v {
            KindArg::PdfToPng => ConversionKind::PdfToPng,
            KindArg::LatexToDocx => ConversionKind::LatexToDocx,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StatusArg {
    Submitted,
    Processing,
    Completed,
    Failed,
}

impl From<StatusArg> for JobStatus {
    fn from(v: StatusArg) -> Self {
        match v {
            StatusArg::Submitted => JobStatus::Submitted,
            StatusArg::Processing => JobStatus::Processing,
            StatusArg::Completed => JobStatus::Completed,
            StatusArg::Failed => JobStatus::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars give all the feedback `run` and `wait` need, so library
    // INFO logs are suppressed there unless --verbose.
    let bar_command = matches!(cli.command, Command::Run(_) | Command::Wait { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || (bar_command && !cli.json) {
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
        Command::Submit(args) => {
            let service = open_service(&cli, ServiceOptions::submit_only(&args.tools)).await?;
            let receipt = service
                .submit(submit_request(args))
                .await
                .context("Submission rejected")?;
            if cli.json {
                print_json(&receipt)?;
            } else {
                println!("{}", receipt.job_id);
            }
            service.shutdown().await;
        }

        Command::Run(args) => {
            let show_progress = !cli.quiet && !cli.json;
            let mut options = ServiceOptions::workers(1, &args.tools);
            // Jobs recorded by others belong to `serve`.
            options.recover_on_start = false;
            if ConversionKind::from(args.kind) == ConversionKind::PdfToPng {
                options.pdfium = Some(ensure_pdfium(cli.quiet || cli.json)?);
            }
            if show_progress {
                options.progress = Some(CliProgressCallback::new() as ProgressCallback);
            }
            let service = open_service(&cli, options).await?;
            let receipt = service
                .submit(submit_request(args))
                .await
                .context("Submission rejected")?;
            let waited = service
                .wait(
                    &receipt.job_id,
                    WaitOptions::new(Duration::from_millis(200), Duration::from_secs(24 * 3600)),
                )
                .await;
            service.shutdown().await;
            let job = waited.with_context(|| format!("Job {} did not complete", receipt.job_id))?;
            print_job(&cli, &job)?;
        }

        Command::Serve(args) => {
            let mut options = ServiceOptions::workers(args.workers, &args.tools);
            options.pdfium = Some(ensure_pdfium(cli.quiet)?);
            options.maintenance_interval = Some(Duration::from_secs(args.poll_interval.max(1)));
            options.stale_after = args.stale_after.map(Duration::from_secs);
            let service = open_service(&cli, options).await?;
            if !cli.quiet {
                eprintln!(
                    "{} serving jobs from {} with {} workers (Ctrl-C to stop)",
                    green("◆"),
                    bold(&cli.data_dir.join("jobs").display().to_string()),
                    args.workers
                );
            }
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            eprintln!("{}", dim("stopping; waiting for running jobs…"));
            service.shutdown().await;
        }

        Command::Status { job_id } => {
            let service = open_service(&cli, ServiceOptions::submit_only(&ToolArgs::default())).await?;
            let job = service.get_status(job_id).await?;
            print_job(&cli, &job)?;
        }

        Command::List { status, limit } => {
            let service = open_service(&cli, ServiceOptions::submit_only(&ToolArgs::default())).await?;
            let list = service
                .list_jobs((*status).map(JobStatus::from), *limit)
                .await?;
            if cli.json {
                print_json(&list)?;
            } else {
                for job in &list.jobs {
                    println!(
                        "{}  {:<10}  {:>3}%  {}  {}",
                        job.job_id,
                        job.status.to_string(),
                        job.progress,
                        dim(&job.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                        job.source_key
                    );
                }
                eprintln!("{} jobs", list.count);
            }
        }

        Command::Wait {
            job_id,
            interval,
            timeout,
        } => {
            let service = open_service(&cli, ServiceOptions::submit_only(&ToolArgs::default())).await?;
            let options =
                WaitOptions::new(Duration::from_secs(*interval), Duration::from_secs(*timeout));
            let bar = (!cli.quiet && !cli.json).then(|| percent_bar("Waiting"));
            let result = docjobs::wait_for_job_with(&service, job_id, options, |job| {
                if let Some(bar) = &bar {
                    bar.set_position(job.progress as u64);
                    bar.set_message(job.status.to_string());
                }
            })
            .await;
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            let job = result.with_context(|| format!("Job {job_id} did not complete"))?;
            print_job(&cli, &job)?;
        }

        Command::Convert { job, local } => {
            let kind = ConversionKind::from(job.kind);
            let pdfium = if kind == ConversionKind::PdfToPng {
                Some(ensure_pdfium(cli.quiet || cli.json)?)
            } else {
                None
            };
            let engines = build_engines(&job.tools, pdfium.as_deref());
            let Some(engine) = engines.get(kind) else {
                bail!("no engine for {kind}");
            };
            let config = service_config(&cli, 0, None, None)?;
            let output = if *local {
                let bytes = tokio::fs::read(&job.source)
                    .await
                    .with_context(|| format!("Failed to read {}", job.source))?;
                let params = submit_request(job)
                    .resolve(&config_with_namespace(&config))?
                    .params;
                convert_bytes(engine.as_ref(), bytes, &params).await?
            } else {
                let request = submit_request(job).resolve(&config)?;
                let artifacts = FsArtifactStore::new(artifact_root(&cli));
                convert_now(&artifacts, engine.as_ref(), &request)
                    .await
                    .context("Conversion failed")?
            };
            if cli.json {
                print_json(&output)?;
            } else {
                for artifact in &output.artifacts {
                    println!(
                        "{:>3}  {:>9} bytes  {}",
                        artifact.unit,
                        artifact.size_bytes,
                        artifact.key().unwrap_or("(inline)")
                    );
                }
                eprintln!("{} {} units", green("✔"), output.total_units);
            }
        }

        Command::Purge => {
            let store = FsJobStore::open(cli.data_dir.join("jobs")).await?;
            let removed = docjobs::JobStore::purge_expired(&store).await?;
            println!("{removed}");
        }
    }

    Ok(())
}

struct ServiceOptions {
    workers: usize,
    tools: ToolArgs,
    pdfium: Option<PathBuf>,
    recover_on_start: bool,
    progress: Option<ProgressCallback>,
    maintenance_interval: Option<Duration>,
    stale_after: Option<Duration>,
}

impl ServiceOptions {
    fn submit_only(tools: &ToolArgs) -> Self {
        Self::workers(0, tools)
    }

    fn workers(workers: usize, tools: &ToolArgs) -> Self {
        Self {
            workers,
            tools: tools.clone(),
            pdfium: None,
            recover_on_start: true,
            progress: None,
            maintenance_interval: None,
            stale_after: None,
        }
    }
}

fn artifact_root(cli: &Cli) -> PathBuf {
    cli.artifact_root
        .clone()
        .unwrap_or_else(|| cli.data_dir.join("artifacts"))
}

fn service_config(
    cli: &Cli,
    workers: usize,
    maintenance_interval: Option<Duration>,
    stale_after: Option<Duration>,
) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .workers(workers)
        .retention(Duration::from_secs(cli.retention_days.max(1) * 24 * 3600));
    if let Some(ns) = &cli.namespace {
        builder = builder.default_namespace(ns.clone());
    }
    if let Some(every) = maintenance_interval {
        builder = builder.maintenance_interval(every);
    }
    if let Some(after) = stale_after {
        builder = builder.stale_after(after);
    }
    builder.build().context("Invalid configuration")
}

/// Local conversions need no namespace; fill in a placeholder so request
/// validation still checks the remaining fields.
fn config_with_namespace(config: &ServiceConfig) -> ServiceConfig {
    let mut config = config.clone();
    config
        .default_namespace
        .get_or_insert_with(|| "local".to_string());
    config
}

/// Locate libpdfium, downloading it into the user cache on first use.
///
/// `PDFIUM_LIB_PATH` short-circuits the lookup.
fn ensure_pdfium(quiet: bool) -> Result<PathBuf> {
    if quiet || pdfium_auto::is_pdfium_cached() {
        return tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine");
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    bar.set_prefix("PDF engine");
    bar.set_message("Connecting…");
    bar.enable_steady_tick(Duration::from_millis(80));

    let progress = bar.clone();
    let path = tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if progress.length().unwrap_or(0) != t {
                    progress.set_length(t);
                }
            }
            progress.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;
    bar.finish_with_message("ready ✓");
    Ok(path)
}

fn build_engines(tools: &ToolArgs, pdfium: Option<&Path>) -> Engines {
    let mut latex = LatexEngine::new()
        .pandoc(tools.pandoc.clone())
        .soffice(tools.soffice.clone());
    if let Some(doc) = &tools.reference_doc {
        latex = latex.reference_doc(doc.clone());
    }
    if let Some(filter) = &tools.lua_filter {
        latex = latex.lua_filter(filter.clone());
    }
    // Without a provisioned library the PDF engine still registers, so
    // submit-only commands accept PDF jobs for `serve` to execute.
    let raster = match pdfium {
        Some(path) => PdfRasterEngine::with_library(path),
        None => PdfRasterEngine::new(),
    };
    Engines::new()
        .with(ConversionKind::PdfToPng, Arc::new(raster))
        .with(ConversionKind::LatexToDocx, Arc::new(latex))
}

async fn open_service(cli: &Cli, options: ServiceOptions) -> Result<JobService> {
    let mut config = service_config(
        cli,
        options.workers,
        options.maintenance_interval,
        options.stale_after,
    )?;
    config.recover_on_start = options.recover_on_start;
    let store = FsJobStore::open(cli.data_dir.join("jobs"))
        .await
        .context("Failed to open job store")?;

    let mut builder = JobService::builder()
        .config(config)
        .store(Arc::new(store))
        .artifacts(Arc::new(FsArtifactStore::new(artifact_root(cli))));
    let engines = build_engines(&options.tools, options.pdfium.as_deref());
    for kind in [ConversionKind::PdfToPng, ConversionKind::LatexToDocx] {
        if let Some(engine) = engines.get(kind) {
            builder = builder.engine(kind, engine);
        }
    }
    if let Some(progress) = options.progress {
        builder = builder.progress_callback(progress);
    }
    builder.start().await.context("Failed to start job service")
}

fn submit_request(args: &JobArgs) -> SubmitRequest {
    SubmitRequest {
        source_key: args.source.clone(),
        namespace: None,
        output_prefix: args.output_prefix.clone(),
        kind: args.kind.into(),
        dpi: args.dpi,
        optimize: Some(!args.no_optimize),
        generate_pdf: args.generate_pdf,
        return_inline: args.inline,
        callback_url: args.callback_url.clone(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialise output")?
    );
    Ok(())
}

fn print_job(cli: &Cli, job: &Job) -> Result<()> {
    if cli.json {
        return print_json(job);
    }
    println!("Job:        {}", job.job_id);
    println!("Status:     {}", job.status);
    println!("Progress:   {}%", job.progress);
    println!("Source:     {}/{}", job.request.namespace, job.request.source_key);
    println!("Created:    {}", job.created_at.to_rfc3339());
    println!("Updated:    {}", job.updated_at.to_rfc3339());
    if let Some(total) = job.total_units {
        println!("Units:      {total}");
    }
    for artifact in &job.artifacts {
        println!(
            "  {:>3}  {:>9} bytes  {}",
            artifact.unit,
            artifact.size_bytes,
            artifact.key().unwrap_or("(inline)")
        );
    }
    if let Some(err) = &job.error_message {
        println!("Error:      {}", red(err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docjobs::{ConversionEngine, EngineError, RenderParams};

    #[tokio::test]
    async fn provisioned_pdfium_path_reaches_the_raster_engine() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libpdfium-missing.so");
        let engines = build_engines(&ToolArgs::default(), Some(lib.as_path()));
        assert!(engines.supports(ConversionKind::LatexToDocx));

        let raster = engines.get(ConversionKind::PdfToPng).unwrap();
        let err = raster
            .convert(b"%PDF-1.4\n".to_vec(), &RenderParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BindingFailed(_)));
    }
}
