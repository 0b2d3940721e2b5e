use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use appstore_harvest::app::Harvester;
use appstore_harvest::client::HttpCatalogClient;
use appstore_harvest::collect::{CollectOptions, collect};
use appstore_harvest::config::{ConfigLoader, ConfigOverrides, HarvestConfig};
use appstore_harvest::domain::{BatchMode, CountryCode, Locale, Platform};
use appstore_harvest::engine::{EngineSettings, ThreadedEngine};
use appstore_harvest::error::HarvestError;
use appstore_harvest::input::load_identifiers;
use appstore_harvest::output::{JsonOutput, OutputMode};
use appstore_harvest::progress::{NoStatus, StatusSurface, TerminalStatus};
use appstore_harvest::store::FsCompletionStore;

#[derive(Parser)]
#[command(name = "appstore-harvest")]
#[command(about = "Resumable App Store metadata harvester (bulk API + storefront pages)")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true, help = "Append logs to this file instead of stderr")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch every outstanding app id from the enabled sources")]
    Harvest(RunArgs),
    #[command(about = "Show what a harvest would fetch, without network access")]
    Plan(RunArgs),
    #[command(about = "Aggregate discovery crawl output into id lists")]
    Collect(CollectArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(help = "Newline-delimited file of app ids")]
    input: PathBuf,

    #[arg(long, default_value = "output")]
    output_dir: String,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    country: Option<CountryCode>,

    #[arg(long, value_enum)]
    platform: Option<Platform>,

    #[arg(long)]
    locale: Option<Locale>,

    #[arg(long, value_enum)]
    batch_mode: Option<BatchMode>,

    #[arg(long, help = "Also fetch storefront pages")]
    single: bool,

    #[arg(long)]
    no_bulk: bool,

    #[arg(long)]
    delay_ms: Option<u64>,

    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Args)]
struct CollectArgs {
    input: PathBuf,

    output_base: String,

    #[arg(long, help = "Shortcut for --json --all-ids --popular-ids")]
    all: bool,

    #[arg(long)]
    json: bool,

    #[arg(long)]
    all_ids: bool,

    #[arg(long)]
    popular_ids: bool,

    #[arg(long)]
    sort: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::MissingInput(_)
        | HarvestError::InputRead(_)
        | HarvestError::InvalidIdentifier { .. }
        | HarvestError::InvalidAppId(_)
        | HarvestError::InvalidCountry(_)
        | HarvestError::InvalidLocale(_)
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_) => 2,
        HarvestError::AuthExtraction(_) | HarvestError::Http(_) | HarvestError::Status { .. } => {
            3
        }
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Harvest(args) => run_harvest(args, output_mode),
        Commands::Plan(args) => run_plan(args),
        Commands::Collect(args) => run_collect(args),
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> miette::Result<()> {
    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(log_file.is_none())
        .with_writer(writer)
        .init();
    Ok(())
}

fn resolve_config(args: &RunArgs) -> Result<HarvestConfig, HarvestError> {
    let overrides = ConfigOverrides {
        country: args.country.clone(),
        platform: args.platform,
        locale: args.locale.clone(),
        batch_mode: args.batch_mode,
        bulk_enabled: args.no_bulk.then_some(false),
        single_enabled: args.single.then_some(true),
        download_delay_ms: args.delay_ms,
        concurrency: args.concurrency,
    };
    ConfigLoader::resolve(args.config.as_deref(), overrides)
}

fn run_harvest(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = resolve_config(&args)?;
    let input = load_identifiers(&args.input)?;

    let client = Arc::new(HttpCatalogClient::new(&config)?);
    let store = Arc::new(FsCompletionStore::new(args.output_dir.as_str()));
    let engine = ThreadedEngine::new(Arc::clone(&client), EngineSettings::from_config(&config));
    let surface: Box<dyn StatusSurface> = match output_mode {
        OutputMode::Interactive => Box::new(TerminalStatus),
        OutputMode::NonInteractive => Box::new(NoStatus),
    };

    let harvester = Harvester::new(config, client, store);
    let summary = harvester.run(&input, engine, surface)?;
    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}

fn run_plan(args: RunArgs) -> miette::Result<()> {
    let config = resolve_config(&args)?;
    let input = load_identifiers(&args.input)?;

    let client = Arc::new(HttpCatalogClient::new(&config)?);
    let store = Arc::new(FsCompletionStore::new(args.output_dir.as_str()));
    let harvester = Harvester::new(config, client, store);
    let plan = harvester.plan(&input)?;
    JsonOutput::print_plan(&plan).into_diagnostic()?;
    Ok(())
}

fn run_collect(args: CollectArgs) -> miette::Result<()> {
    let options = if args.all {
        CollectOptions::everything(args.sort)
    } else {
        CollectOptions {
            json: args.json,
            all_ids: args.all_ids,
            popular_ids: args.popular_ids,
            sort: args.sort,
        }
    };
    let result = collect(&args.input, &args.output_base, options)?;
    JsonOutput::print_collect(&result).into_diagnostic()?;
    Ok(())
}
