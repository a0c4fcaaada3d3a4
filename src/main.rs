use apiscope::analysis::AnalysisOrchestrator;
use apiscope::configuration::{Config, ConfigOverrides};
use apiscope::storage::file_storage::CAPTURE_DIR_ENV;
use apiscope::storage::JsonlRepository;
use clap::{Parser, ValueEnum};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Digest,
}

#[derive(Parser, Debug)]
#[command(name = "apiscope")]
#[command(version = "0.0.1")]
#[command(about = "Infers API endpoints, payload schemas and client sessions from captured HTTP traffic")]
struct Args {
    /// TOML configuration file; defaults apply when omitted
    config_file: Option<PathBuf>,

    /// Directory holding the *.jsonl capture files
    #[arg(short, long, env = CAPTURE_DIR_ENV)]
    input: Option<PathBuf>,

    /// Only analyze this host
    #[arg(long)]
    host: Option<String>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

fn load_config(args: &Args) -> Config {
    let config = match &args.config_file {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }),
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };
    config.with_overrides(&args.overrides).unwrap_or_else(|e| {
        error!("Invalid configuration override: {}", e);
        std::process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args);
    info!("Configuration imported successfully");

    let repository = match &args.input {
        Some(dir) => JsonlRepository::new(dir),
        None => JsonlRepository::new_default(),
    }
    .unwrap_or_else(|e| {
        error!("Unable to open the capture directory: {}", e);
        std::process::exit(1);
    });

    let orchestrator = AnalysisOrchestrator::new(Arc::new(repository), config);
    let result = match &args.host {
        Some(host) => orchestrator.analyze_hosts(std::slice::from_ref(host)).await,
        None => orchestrator.analyze_all().await,
    };
    let reports = result.unwrap_or_else(|e| {
        error!("Analysis failed: {}", e);
        std::process::exit(1);
    });

    match args.format {
        OutputFormat::Json => match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Unable to serialize the reports: {}", e);
                std::process::exit(1);
            }
        },
        OutputFormat::Digest => {
            for report in &reports {
                println!("{}", report.render_digest());
            }
        }
    }
    info!("Analyzed {} host(s)", reports.len());
}
