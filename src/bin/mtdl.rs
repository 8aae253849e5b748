use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mt_dataset_downloader::cache::CacheStore;
use mt_dataset_downloader::config::{ConfigLoader, DEFAULT_MAX_WORKERS, Settings};
use mt_dataset_downloader::domain::{DatasetManifest, DatasetSpec};
use mt_dataset_downloader::engine::{DownloadEngine, EngineOptions, ProgressSink};
use mt_dataset_downloader::error::DatasetError;
use mt_dataset_downloader::fetch::{Fetcher, HttpFetcher, HttpOptions};
use mt_dataset_downloader::orchestrator::DatasetOrchestrator;
use mt_dataset_downloader::output::{
    self, CacheReport, ClearResult, JsonOutput, LogProgress, OutputMode,
};
use mt_dataset_downloader::resolver::ResolverRegistry;
use mt_dataset_downloader::retry::RetryPolicy;

#[derive(Parser)]
#[command(name = "mtdl")]
#[command(about = "Download and cache machine-translation corpora")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON instead of a summary.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Cache directory (defaults to $MTDL_CACHE_DIR, then the user cache dir).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List registered datasets")]
    List,
    #[command(about = "Download one dataset")]
    Download(DownloadArgs),
    #[command(about = "Download every dataset in a JSON batch file")]
    Batch(BatchArgs),
    /// Inspect or clear the download cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args)]
struct RunArgs {
    #[arg(short, long, default_value = "./data")]
    output_dir: PathBuf,

    #[arg(short = 'w', long, default_value_t = DEFAULT_MAX_WORKERS)]
    max_workers: usize,

    /// Download again even when the cache already holds the file.
    #[arg(short, long)]
    force: bool,
}

#[derive(Args)]
struct DownloadArgs {
    dataset_id: String,

    #[arg(short, long)]
    language_pair: Option<String>,

    #[arg(short, long)]
    category: Option<String>,

    /// Extra resolver parameter, repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,

    #[arg(short, long)]
    extract: bool,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct BatchArgs {
    config: PathBuf,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Show cached artifacts")]
    Show,
    #[command(about = "Forget every cached artifact")]
    Clear,
}

enum Outcome {
    Complete,
    Incomplete,
}

fn parse_param(value: &str) -> Result<(String, String), String> {
    let (key, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{value}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("parameter name is empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

fn main() -> ExitCode {
    match run() {
        Ok(Outcome::Complete) => ExitCode::SUCCESS,
        Ok(Outcome::Incomplete) => ExitCode::from(4),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<DatasetError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &DatasetError) -> u8 {
    match error {
        DatasetError::UnknownDataset(_)
        | DatasetError::Resolution { .. }
        | DatasetError::ConfigRead(_)
        | DatasetError::ConfigParse(_) => 2,
        DatasetError::Network { .. } | DatasetError::HttpStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<Outcome> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::List => {
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(HttpOptions::default())?);
            let catalog =
                ResolverRegistry::with_builtins(fetcher, RetryPolicy::default()).catalog();
            match output_mode {
                OutputMode::NonInteractive => {
                    JsonOutput::print_catalog(&catalog).into_diagnostic()?
                }
                OutputMode::Interactive => output::print_catalog(&catalog),
            }
            Ok(Outcome::Complete)
        }
        Commands::Download(args) => {
            let mut spec = DatasetSpec::new(
                &args.dataset_id,
                args.run.output_dir.join(&args.dataset_id),
            )
            .with_extract(args.extract);
            if let Some(pair) = args.language_pair {
                spec = spec.with_param("language_pair", pair);
            }
            if let Some(category) = args.category {
                spec = spec.with_param("category", category);
            }
            for (key, value) in args.params {
                spec = spec.with_param(key, value);
            }
            run_downloads(&[spec], cli.cache_dir, &args.run, output_mode)
        }
        Commands::Batch(args) => {
            let specs = ConfigLoader::resolve(&args.config, &args.run.output_dir)?;
            run_downloads(&specs, cli.cache_dir, &args.run, output_mode)
        }
        Commands::Cache(command) => {
            let settings = Settings::resolve(cli.cache_dir, None)?;
            let cache = CacheStore::open(settings.cache_dir)?;
            match command {
                CacheCommand::Show => {
                    let entries = cache.entries();
                    let report = CacheReport {
                        root: cache.root().as_str(),
                        stats: cache.stats(),
                        entries: &entries,
                    };
                    match output_mode {
                        OutputMode::NonInteractive => {
                            JsonOutput::print_cache(&report).into_diagnostic()?
                        }
                        OutputMode::Interactive => output::print_cache(&report),
                    }
                }
                CacheCommand::Clear => {
                    let removed = cache.clear()?;
                    match output_mode {
                        OutputMode::NonInteractive => {
                            JsonOutput::print_clear(&ClearResult { removed }).into_diagnostic()?
                        }
                        OutputMode::Interactive => println!("removed {removed} cache entries"),
                    }
                }
            }
            Ok(Outcome::Complete)
        }
    }
}

fn run_downloads(
    specs: &[DatasetSpec],
    cache_dir: Option<PathBuf>,
    run: &RunArgs,
    output_mode: OutputMode,
) -> miette::Result<Outcome> {
    let settings = Settings::resolve(cache_dir, Some(run.max_workers))?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(HttpOptions::default())?);
    let cache = Arc::new(CacheStore::open(settings.cache_dir)?);
    let options = EngineOptions {
        max_workers: settings.max_workers,
        force: run.force,
        ..EngineOptions::default()
    };
    let registry = ResolverRegistry::with_builtins(fetcher.clone(), RetryPolicy::default());
    let engine = DownloadEngine::new(fetcher, cache, options);
    let orchestrator = DatasetOrchestrator::new(registry, engine);

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &LogProgress,
    };
    let manifests = orchestrator.download_many_with_progress(specs, sink)?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_manifests(&manifests).into_diagnostic()?,
        OutputMode::Interactive => output::print_download_summary(&manifests),
    }
    Ok(outcome(&manifests))
}

fn outcome(manifests: &BTreeMap<String, DatasetManifest>) -> Outcome {
    if manifests.values().all(DatasetManifest::is_complete) {
        Outcome::Complete
    } else {
        Outcome::Incomplete
    }
}
