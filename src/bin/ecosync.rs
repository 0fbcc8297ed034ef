use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ecostress_sync::app::{App, ProgressSink};
use ecostress_sync::config::{ConfigLoader, Overrides};
use ecostress_sync::domain::Action;
use ecostress_sync::earthdata::EarthdataHttpClient;
use ecostress_sync::error::SyncError;
use ecostress_sync::filename::parse_granule_name;
use ecostress_sync::mgrs::epsg_from_mgrs;
use ecostress_sync::output::{JsonOutput, OutputMode, StderrProgress, print_run_summary};
use ecostress_sync::table::enhance_metadata_table;
use ecostress_sync::upload::{GeeupUploader, SystemCommandRunner};

#[derive(Parser)]
#[command(name = "ecosync")]
#[command(about = "Download ECOSTRESS granules and publish them to Earth Engine with enriched metadata")]
#[command(version, author)]
struct Cli {
    /// Print machine-readable JSON instead of a text summary.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search, download and upload according to the config file")]
    Run(RunArgs),
    #[command(about = "Fill a metadata table from the .tif files in band folders")]
    Reconcile(ReconcileArgs),
    #[command(about = "Print the UTM EPSG code for an MGRS tile")]
    Epsg { tile: String },
    #[command(about = "Print the fields encoded in a granule or file name")]
    ParseName { name: String },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long, value_enum)]
    action: Option<Action>,

    #[arg(long)]
    tile: Option<String>,

    #[arg(long)]
    start: Option<String>,

    #[arg(long)]
    end: Option<String>,
}

#[derive(Args)]
struct ReconcileArgs {
    #[arg(long)]
    table: Utf8PathBuf,

    /// Band folder as BAND=DIR, repeatable.
    #[arg(long = "folder", value_parser = parse_folder)]
    folders: Vec<(String, Utf8PathBuf)>,
}

fn parse_folder(value: &str) -> Result<(String, Utf8PathBuf), String> {
    match value.split_once('=') {
        Some((band, dir)) if !band.is_empty() && !dir.is_empty() => {
            Ok((band.to_string(), Utf8PathBuf::from(dir)))
        }
        _ => Err(format!("expected BAND=DIR, got `{value}`")),
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::MissingConfig
        | SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_)
        | SyncError::InvalidConfig(_)
        | SyncError::InvalidTile(_)
        | SyncError::InvalidDate(_)
        | SyncError::InvalidDateRange { .. }
        | SyncError::InvalidFileType(_) => 2,
        SyncError::EarthdataHttp(_)
        | SyncError::EarthdataStatus { .. }
        | SyncError::SearchResponse(_)
        | SyncError::MissingCredentials
        | SyncError::AuthenticationFailed(_)
        | SyncError::MissingTool(_)
        | SyncError::CommandFailed { .. }
        | SyncError::CommandTimeout { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Commands::Run(args) => run_sync(args, output_mode),
        Commands::Reconcile(args) => {
            init_logging(None)?;
            let stats = enhance_metadata_table(&args.table, &args.folders, &[])?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_reconcile(&stats).into_diagnostic()?,
                OutputMode::Text => println!(
                    "{}: {} rows, {} matched, {} unmatched files",
                    args.table, stats.rows, stats.matched_rows, stats.unmatched_sources
                ),
            }
            Ok(())
        }
        Commands::Epsg { tile } => {
            init_logging(None)?;
            let epsg = epsg_from_mgrs(tile.trim());
            if epsg.is_empty() {
                return Err(SyncError::InvalidTile(tile).into());
            }
            println!("{epsg}");
            Ok(())
        }
        Commands::ParseName { name } => {
            init_logging(None)?;
            let fields = parse_granule_name(name.trim());
            match output_mode {
                OutputMode::Json => JsonOutput::print_fields(&fields).into_diagnostic()?,
                OutputMode::Text => {
                    let show = |label: &str, value: Option<String>| {
                        println!("{label:<26}{}", value.unwrap_or_default());
                    };
                    show("processing_ID", fields.processing_id.clone());
                    show("mgrs_tile", fields.mgrs_tile.clone());
                    show("orbit_number_from_filename", fields.orbit_number.clone());
                    show("version_from_filename", fields.version.clone());
                    show("processing_level", fields.processing_level.clone());
                    show("scene", fields.scene.map(|scene| scene.to_string()));
                    show("orbit_scene", fields.orbit_scene.clone());
                }
            }
            Ok(())
        }
    }
}

fn run_sync(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = Overrides {
        action: args.action,
        tile: args.tile,
        start_date: args.start,
        end_date: args.end,
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), overrides)?;
    init_logging(config.log_file.as_deref())?;

    let action = config.action;
    let earthdata = EarthdataHttpClient::new()?;
    let uploader = GeeupUploader::new(SystemCommandRunner, config.command_timeout)
        .with_project(config.gee_project.clone());
    let app = App::new(config, earthdata, uploader);

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &StderrProgress,
    };
    let report = app.run(action, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Text => print_run_summary(&report),
    }
    Ok(())
}

fn init_logging(log_file: Option<&Utf8Path>) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .map_err(|err| SyncError::Filesystem(format!("open log file {path}: {err}")))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
