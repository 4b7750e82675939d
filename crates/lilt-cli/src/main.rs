//! Lilt CLI
//!
//! Main entry point for generating lessons from source texts.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use lilt_client::{HttpClientConfig, HttpGenerationClient};
use lilt_pipeline::{
    AttemptScope, CefrLevel, ContextExtractor, GenerateLessonRequest, Lesson, LessonType,
    PipelineConfig, PipelineOrchestrator, ProgressEvent, PromptBuilder, RunRecord, SourceMetadata,
    SourceText,
};
use lilt_report::{JsonExporter, LessonRenderer, RunReportRenderer};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Chat-completions base URL used when `LILT_BASE_URL` is not set.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model identifier used when `LILT_MODEL` is not set.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Lilt - Progressive Lesson Generator
///
/// Generates a CEFR-calibrated language lesson from a source text by driving
/// an LLM section by section, with validation and bounded retries.
#[derive(Parser, Debug)]
#[command(name = "lilt")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the source text file
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Path to configuration file (default: lilt.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// CEFR level to calibrate the lesson to
    #[arg(short, long, default_value = "B1")]
    level: CefrLevel,

    /// Lesson type selecting the focus section
    #[arg(
        short = 't',
        long = "type",
        value_name = "TYPE",
        default_value = "discussion"
    )]
    lesson_type: LessonType,

    /// Language the lesson teaches
    #[arg(long, default_value = "English")]
    language: String,

    /// Lesson title to fall back on if title generation fails
    #[arg(long, value_name = "TITLE")]
    title: Option<String>,

    /// Write the generated lesson as JSON to this path
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Render the lesson as Markdown to this path
    #[arg(short, long, value_name = "FILE")]
    markdown: Option<PathBuf>,

    /// Write a run report as Markdown to this path
    #[arg(short, long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Print the section plan and first-attempt prompts without calling the model
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing subscriber with appropriate filter
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Lilt starting");
    tracing::debug!(source = %args.source.display(), "Source file");
    tracing::debug!(config = ?args.config, "Config file");

    // Run the generation and handle errors
    match run_lilt(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Runs one lesson generation from the command line.
///
/// This function drives the whole process:
/// 1. Load config and source text
/// 2. Build the generation client from environment credentials
/// 3. Subscribe to progress events
/// 4. Run the pipeline (or print prompts for `--dry-run`)
/// 5. Write the requested outputs
#[allow(clippy::too_many_lines)]
async fn run_lilt(args: Args) -> anyhow::Result<()> {
    // Load configuration
    let config = load_config(args.config.as_deref())?;
    print_config(&config);

    // Load source text
    let source = SourceText::load(&args.source)?;
    print_source_info(&source);

    let request = build_request(&args, source);

    // A dry run stops before any model call
    if args.dry_run {
        print_dry_run(&config, &request);
        return Ok(());
    }

    let client = build_client(&config)?;
    let orchestrator = PipelineOrchestrator::new(client, config);

    // Log progress events as the run advances
    let mut progress = orchestrator.subscribe();
    let progress_task = tokio::spawn(async move {
        loop {
            match progress.recv().await {
                Ok(event) => log_progress(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress subscriber fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!();
    println!(
        "Generating {} {} lesson in {}...",
        args.level, args.lesson_type, args.language
    );

    // Use select to handle both the run and Ctrl+C
    let record = tokio::select! {
        record = orchestrator.run_recorded(request) => record,
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
            anyhow::bail!("Interrupted before the lesson was finished");
        }
    };

    // Dropping the orchestrator closes the progress channel
    drop(orchestrator);
    let _ = progress_task.await;

    if let Some(report_path) = args.report.as_deref() {
        write_run_report(&record, report_path)?;
    }

    print_summary(&record);

    let lesson = record.finish()?;
    write_lesson_outputs(&lesson, args.out.as_deref(), args.markdown.as_deref())?;

    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<PipelineConfig> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            PipelineConfig::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => PipelineConfig::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Builds the generation request from CLI arguments and the loaded source.
fn build_request(args: &Args, source: SourceText) -> GenerateLessonRequest {
    let mut request = GenerateLessonRequest::new(
        source.content,
        args.lesson_type,
        args.level,
        args.language.clone(),
    );
    if let Some(title) = &args.title {
        request = request.with_metadata(SourceMetadata {
            title: Some(title.clone()),
            ..Default::default()
        });
    }
    request
}

/// Builds the HTTP generation client from environment credentials.
///
/// `LILT_API_KEY` is required; `LILT_BASE_URL` and `LILT_MODEL` override the
/// OpenAI-compatible defaults.
fn build_client(config: &PipelineConfig) -> anyhow::Result<Arc<HttpGenerationClient>> {
    let api_key = std::env::var("LILT_API_KEY").map_err(|_| {
        anyhow::anyhow!(
            "LILT_API_KEY is not set\n\nSuggestion: Export the API key for your model provider before running"
        )
    })?;
    let base_url = std::env::var("LILT_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let model = std::env::var("LILT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

    tracing::debug!(%base_url, %model, "Building generation client");

    let client_config =
        HttpClientConfig::new(base_url, model, api_key).with_timeout_secs(config.call_timeout_secs);
    let client = HttpGenerationClient::new(client_config)
        .map_err(|e| anyhow::anyhow!("{e}\n\nSuggestion: Check the LILT_BASE_URL value"))?;

    Ok(Arc::new(client))
}

/// Logs one progress event.
fn log_progress(event: &ProgressEvent) {
    match event.section {
        Some(section) => tracing::info!(
            phase = event.phase.as_str(),
            percent = event.progress_percent,
            %section,
            "{}",
            event.step
        ),
        None => tracing::info!(
            phase = event.phase.as_str(),
            percent = event.progress_percent,
            "{}",
            event.step
        ),
    }
}

/// Prints the loaded configuration.
fn print_config(config: &PipelineConfig) {
    println!("Configuration loaded:");
    println!("  Vocabulary workers: {}", config.vocabulary_workers);
    println!("  Call timeout: {}s", config.call_timeout_secs);
    if config.run_timeout_secs == 0 {
        println!("  Run timeout: disabled");
    } else {
        println!("  Run timeout: {}s", config.run_timeout_secs);
    }
}

/// Prints source text information.
fn print_source_info(source: &SourceText) {
    println!();
    println!("Source text loaded:");
    println!("  Path: {}", source.path.display());
    println!("  Size: {} bytes", source.size_bytes);
}

/// Prints the section plan and first-attempt prompts without calling the model.
fn print_dry_run(config: &PipelineConfig, request: &GenerateLessonRequest) {
    let plan = PipelineOrchestrator::plan(request.lesson_type);

    println!();
    println!(
        "Section plan ({} {} lesson):",
        request.cefr_level, request.lesson_type
    );
    for (position, section) in plan.iter().enumerate() {
        println!("  {}. {section}", position + 1);
    }

    let context = ContextExtractor::extract(request);
    let builder = PromptBuilder::new(&context);

    for section in plan {
        let scope = AttemptScope::for_attempt(section, request.cefr_level, 1, config);
        println!();
        println!(
            "--- {section} prompt (attempt 1, cap {} tokens) ---",
            scope.token_cap
        );
        println!("{}", builder.build(section, &scope));
    }
}

/// Prints a summary of the generation run.
fn print_summary(record: &RunRecord) {
    let report = &record.token_report;
    let valid = record
        .sections
        .iter()
        .filter(|s| s.status.is_valid())
        .count();

    println!();
    println!("=== Lilt Run Summary ===");
    println!("Sections: {valid}/{} valid", record.sections.len());
    println!("Attempts: {}", report.total_attempts);
    println!(
        "Tokens: {} ({} prompt, {} completion)",
        report.total_tokens, report.prompt_tokens, report.completion_tokens
    );
    if report.errors.total() > 0 {
        println!("Failed attempts: {}", report.errors.total());
    }
    if record.used_supplied_title() {
        println!("Title: supplied by caller");
    }
}

/// Writes the run report as Markdown.
fn write_run_report(record: &RunRecord, path: &Path) -> anyhow::Result<()> {
    let markdown = RunReportRenderer::new(record).render();
    std::fs::write(path, markdown).map_err(|e| {
        anyhow::anyhow!(
            "Failed to write run report to '{}': {e}\n\nSuggestion: Check that the directory exists and is writable",
            path.display()
        )
    })?;
    println!("  Run report: {}", path.display());
    Ok(())
}

/// Writes the requested lesson outputs.
fn write_lesson_outputs(
    lesson: &Lesson,
    out: Option<&Path>,
    markdown: Option<&Path>,
) -> anyhow::Result<()> {
    println!();
    println!("Lesson generated: {}", lesson.title);

    if let Some(path) = out {
        let exporter = JsonExporter::new(lesson);
        exporter.write_to_file(path, true).map_err(|e| {
            anyhow::anyhow!(
                "Failed to write lesson JSON to '{}': {e}\n\nSuggestion: Check that the directory exists and is writable",
                path.display()
            )
        })?;
        println!("  Lesson JSON: {}", path.display());
    }

    if let Some(path) = markdown {
        let rendered = LessonRenderer::new(lesson).render();
        std::fs::write(path, rendered).map_err(|e| {
            anyhow::anyhow!(
                "Failed to write lesson Markdown to '{}': {e}\n\nSuggestion: Check that the directory exists and is writable",
                path.display()
            )
        })?;
        println!("  Lesson Markdown: {}", path.display());
    }

    Ok(())
}
