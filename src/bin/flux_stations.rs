use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use flux_stations::app::{App, DownloadOptions, RegistryOptions};
use flux_stations::config::ConfigLoader;
use flux_stations::convert::NetcdfFlattener;
use flux_stations::domain::Network;
use flux_stations::error::{ErrorCategory, FluxError};
use flux_stations::networks::{SparqlHttpClient, build_adapters};
use flux_stations::output::{self, JsonOutput, LogSink, OutputMode};
use flux_stations::transport::ArtifactHttpClient;

#[derive(Parser)]
#[command(name = "flux-stations")]
#[command(about = "Harmonized flux-tower site registry and catalog artifact downloader")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./flux-stations.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print the run report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Rebuild the canonical site registry from all networks")]
    Registry(RegistryArgs),
    #[command(about = "Resolve and download the latest artifact of every listed site")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct RegistryArgs {
    /// Networks to include, in order (overrides the config file)
    #[arg(long, value_enum, value_delimiter = ',')]
    networks: Vec<Network>,

    /// Point shapefile to write; the flat table goes beside it as .csv
    #[arg(long, default_value = "flux_stations.shp")]
    out: PathBuf,
}

#[derive(Args)]
struct DownloadArgs {
    /// Destination directory for artifacts
    #[arg(long)]
    dest: PathBuf,

    /// Download again even when both output files exist
    #[arg(long)]
    overwrite: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(flux) = report.downcast_ref::<FluxError>() {
            return ExitCode::from(map_exit_code(flux));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FluxError) -> u8 {
    match error.category() {
        ErrorCategory::Configuration | ErrorCategory::SourceUnavailable => 2,
        ErrorCategory::TransportFailure => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Registry(args) => {
            if !args.networks.is_empty() {
                let mut networks = Vec::new();
                for network in args.networks {
                    if !networks.contains(&network) {
                        networks.push(network);
                    }
                }
                config.networks = networks;
            }
            let sparql = SparqlHttpClient::new(config.metadata_timeout)?;
            let adapters = build_adapters(&config, Arc::new(sparql));
            let transport = ArtifactHttpClient::new(config.download.timeout)?;
            let app = App::new(config, transport, NetcdfFlattener);
            let options = RegistryOptions::from_shapefile(args.out);
            match output_mode {
                OutputMode::Json => {
                    let result = app.build_registry(&adapters, &options, &JsonOutput)?;
                    JsonOutput::print_registry(&result).into_diagnostic()?;
                }
                OutputMode::Human => {
                    let result = app.build_registry(&adapters, &options, &LogSink)?;
                    output::print_registry_summary(&result);
                }
            }
        }
        Commands::Download(args) => {
            let transport = ArtifactHttpClient::new(config.download.timeout)?;
            let app = App::new(config, transport, NetcdfFlattener);
            let options = DownloadOptions {
                dest_dir: args.dest,
                overwrite: args.overwrite,
            };
            match output_mode {
                OutputMode::Json => {
                    let result = app.download(&options, &JsonOutput)?;
                    JsonOutput::print_download(&result).into_diagnostic()?;
                }
                OutputMode::Human => {
                    let result = app.download(&options, &LogSink)?;
                    output::print_download_summary(&result);
                }
            }
        }
    }
    Ok(())
}
