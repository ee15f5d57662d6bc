use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use refmerge_core::batch::BatchDir;
use refmerge_core::config::Settings;
use refmerge_core::diff::{change_counts, unified_diff};
use refmerge_core::logging::init_logging;
use refmerge_core::request::process_request;
use refmerge_engine::{
    comment_symbols, validate, ApplyRequest, CancellationFlag, Language, MergeEngine,
    ParserLookup,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(
    name = "refmerge",
    about = "Apply partial file rewrites with reference comments to the original source"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to .refmerge data directory
    #[arg(long, default_value = ".refmerge")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge one proposed update into a file
    Apply(ApplyArgs),
    /// Check a file for syntax errors
    Validate {
        /// File to check
        file: PathBuf,
    },
    /// Process every request in a batch directory
    Batch {
        /// Directory holding incoming/, outgoing/ and failed/
        #[arg(long)]
        dir: PathBuf,
    },
    /// List language tags, comment markers and parser availability
    Languages,
    /// Show settings, or write the defaults
    Config {
        /// Write default settings to the data directory
        #[arg(long)]
        init: bool,
        /// Overwrite existing settings without asking
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[derive(Args)]
struct ApplyArgs {
    /// The file being edited
    #[arg(long)]
    original: PathBuf,
    /// The proposed update
    #[arg(long)]
    proposed: PathBuf,
    /// Change description (e.g. "type: add")
    #[arg(long, conflicts_with = "description_file")]
    description: Option<String>,
    /// Read the change description from a file
    #[arg(long)]
    description_file: Option<PathBuf>,
    /// Path used to pick the language (defaults to --original)
    #[arg(long)]
    path: Option<PathBuf>,
    /// Language tag or extension, overriding the path
    #[arg(long)]
    language: Option<Language>,
    /// Do not add references at the file edges
    #[arg(long)]
    no_edge_refs: bool,
    /// Print the full result as JSON
    #[arg(long, conflicts_with = "diff")]
    json: bool,
    /// Print a unified diff against the original
    #[arg(long)]
    diff: bool,
    /// Write the merged file here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Exit status when the merge needs a human (or a model) to check it.
const EXIT_NEEDS_VERIFICATION: i32 = 2;

fn settings_path(cli: &Cli) -> PathBuf {
    cli.data_dir.join("settings.json")
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let path = settings_path(cli);
    Settings::load_or_default(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Apply(args) => cmd_apply(&cli, args).await,
        Commands::Validate { file } => cmd_validate(&cli, file).await,
        Commands::Batch { dir } => cmd_batch(&cli, dir).await,
        Commands::Languages => cmd_languages(),
        Commands::Config { init, force } => cmd_config(&cli, *init, *force),
    }
}

async fn read_file(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn cmd_apply(cli: &Cli, args: &ApplyArgs) -> anyhow::Result<()> {
    let settings = load_settings(cli)?;
    let _guard = init_logging(&settings.logging, &cli.data_dir)?;

    let original = read_file(&args.original).await?;
    let proposed = read_file(&args.proposed).await?;
    let description = match (&args.description, &args.description_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => read_file(path).await?,
        (None, None) => String::new(),
    };

    let path = args.path.as_deref().unwrap_or(&args.original);
    let language = args.language.or_else(|| Language::from_path(path));

    let mut request = ApplyRequest::new(&original, &proposed, &description)
        .with_edge_refs(settings.engine.synthesize_edge_refs && !args.no_edge_refs);
    if let Some(language) = language {
        request = request.with_language(language);
    }

    let engine = MergeEngine::new(settings.to_engine_config());
    let result = engine.apply_changes(&request, &CancellationFlag::new())?;

    let (inserted, deleted) = change_counts(&original, &result.new_file);
    tracing::info!(
        path = %path.display(),
        language = language.map(|l| l.as_str()).unwrap_or("unknown"),
        inserted,
        deleted,
        "merge finished"
    );

    if let Some(output) = &args.output {
        tokio::fs::write(output, &result.new_file)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if args.diff {
        print!("{}", unified_diff(&original, &result.new_file, &path.display().to_string()));
    } else if args.output.is_none() {
        print!("{}", result.new_file);
    }

    if result.needs_verification() {
        let reasons: Vec<&str> = result.reasons.iter().map(|r| r.as_str()).collect();
        eprintln!("Merge needs verification: {}", reasons.join(", "));
        std::process::exit(EXIT_NEEDS_VERIFICATION);
    }

    Ok(())
}

async fn cmd_validate(cli: &Cli, file: &Path) -> anyhow::Result<()> {
    let settings = load_settings(cli)?;
    let _guard = init_logging(&settings.logging, &cli.data_dir)?;

    let source = read_file(file).await?;
    let timeout = settings.to_engine_config().parse_timeout;
    let result = validate(file, &source, timeout, &CancellationFlag::new())?;
    let language = result.language.map(|l| l.as_str()).unwrap_or("unknown");

    if !result.has_parser {
        println!("{}: no parser for {}", file.display(), language);
        return Ok(());
    }
    if result.timed_out {
        eprintln!("{}: parse timed out", file.display());
        std::process::exit(1);
    }
    if result.valid {
        println!("{}: valid ({})", file.display(), language);
        return Ok(());
    }

    println!("{}: invalid ({})", file.display(), language);
    for error in &result.errors {
        println!("  {}", error);
    }
    std::process::exit(1);
}

#[derive(Default)]
struct BatchStats {
    merged: usize,
    needs_verification: usize,
    cancelled: usize,
    crashed: usize,
}

async fn cmd_batch(cli: &Cli, dir: &Path) -> anyhow::Result<()> {
    let settings = load_settings(cli)?;
    let _guard = init_logging(&settings.logging, &cli.data_dir)?;

    let batch = BatchDir::new(dir).await?;
    let engine = Arc::new(MergeEngine::new(settings.to_engine_config()));
    let synthesize = settings.engine.synthesize_edge_refs;
    let semaphore = Arc::new(Semaphore::new(settings.batch.max_concurrency.max(1)));
    let cancel = CancellationFlag::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Cancelling in-flight merges...");
                cancel.cancel();
            }
        });
    }

    tracing::info!(dir = %dir.display(), "Processing batch");

    let mut workers = JoinSet::new();
    while !cancel.is_cancelled() {
        let Some((path, request)) = batch.claim_next().await? else {
            break;
        };
        let permit = semaphore.clone().acquire_owned().await?;
        let engine = engine.clone();
        let cancel = cancel.clone();
        workers.spawn_blocking(move || {
            let response = process_request(&engine, &request, synthesize, &cancel);
            drop(permit);
            (path, response)
        });
    }

    let mut stats = BatchStats::default();
    while let Some(res) = workers.join_next().await {
        match res {
            Ok((path, response)) if response.error.is_some() => {
                stats.cancelled += 1;
                batch.retry(&path).await?;
            }
            Ok((path, response)) => {
                if response.needs_verification() {
                    stats.needs_verification += 1;
                    tracing::warn!(
                        request_id = %response.request_id,
                        reasons = ?response.needs_verify_reasons,
                        "Merge needs verification"
                    );
                }
                stats.merged += 1;
                batch.complete(&path, &response).await?;
            }
            Err(e) => {
                stats.crashed += 1;
                tracing::error!(error = %e, "Merge worker failed");
            }
        }
    }

    println!(
        "Merged: {} ({} need verification), cancelled: {}, crashed: {}",
        stats.merged, stats.needs_verification, stats.cancelled, stats.crashed
    );
    Ok(())
}

fn cmd_languages() -> anyhow::Result<()> {
    println!("{:<12} {:<12} {:<8} {}", "LANGUAGE", "COMMENT", "PARSER", "FALLBACK");
    for language in Language::ALL {
        let symbols = comment_symbols(language);
        let comment = if symbols.is_empty() {
            "-".to_string()
        } else if symbols.close.is_empty() {
            symbols.open.to_string()
        } else {
            format!("{} {}", symbols.open, symbols.close)
        };
        let lookup = ParserLookup::for_language(language);
        let parser = if lookup.parser.is_some() { "yes" } else { "no" };
        let fallback = lookup.fallback_language().map(|l| l.as_str()).unwrap_or("-");
        println!("{:<12} {:<12} {:<8} {}", language.as_str(), comment, parser, fallback);
    }
    Ok(())
}

fn cmd_config(cli: &Cli, init: bool, force: bool) -> anyhow::Result<()> {
    let path = settings_path(cli);

    if !init {
        let settings = load_settings(cli)?;
        if !path.exists() {
            println!("# {} not found, showing defaults", path.display());
        }
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    if path.exists() && !force {
        let overwrite = dialoguer::Confirm::new()
            .with_prompt(format!("{} exists. Overwrite?", path.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            return Ok(());
        }
    }

    Settings::default().save(&path)?;
    println!("Configuration saved to {}", path.display());
    Ok(())
}
