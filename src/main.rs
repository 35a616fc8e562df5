//! Metis CLI Entry Point
//!
//! One binary serves every role of the service.
//!
//! # Usage
//!
//! ```bash
//! # Start the WES API server
//! metis api
//!
//! # Run the agent of one run (launched by the API server as a job)
//! metis metel --run-id=4f0c... --workflow-url=file://main.cwl --workflow-type=CWL \
//!     --workflow-type-version=v1.2
//!
//! # Liveness probe
//! metis healthz
//!
//! # Print the documentation site configuration
//! metis docs-config
//! metis docs-config --check-link http://localhost:8080/runs
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};

use metis::cluster::KubeClient;
use metis::config::{self, Config};
use metis::logger::setup_logging;
use metis::metel::params::MetelArgs;
use metis::metel::run_metel;
use metis::store::SqliteRunStore;
use metis::{api, DocsSiteConfig, Result, APP_NAME, VERSION};

#[derive(Parser, Debug)]
#[command(name = "metis", version, about = "Kubernetes-native GA4GH WES 1.1.0 service")]
struct Cli {
    /// Configuration file (defaults to $METIS_CONFIG or ~/.metis/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the WES API server
    Api,

    /// Drive one run to completion
    Metel(MetelArgs),

    /// Print "ok"
    Healthz,

    /// Print the documentation site configuration as JSON
    DocsConfig {
        /// Report whether dead-link warnings for this URL are suppressed
        #[arg(long)]
        check_link: Option<String>,
    },
}

async fn run_api(config: Config) -> Result<()> {
    info!("{} v{} starting API server", APP_NAME, VERSION);
    let store = Arc::new(SqliteRunStore::open(&config.store.path)?);
    let cluster = Arc::new(KubeClient::from_config(&config.k8s)?);
    api::serve(config, store, cluster).await
}

fn docs_config(check_link: Option<String>) -> Result<()> {
    let docs = DocsSiteConfig::default();
    docs.validate()?;

    match check_link {
        Some(url) => {
            let verdict = if docs.is_dead_link_ignored(&url) {
                "ignored"
            } else {
                "checked"
            };
            println!("{} {}", url, verdict);
        }
        None => println!("{}", serde_json::to_string_pretty(&docs)?),
    }
    Ok(())
}

/// Main application entry point.
async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Healthz => {
            println!("ok");
            Ok(())
        }
        Command::DocsConfig { check_link } => docs_config(check_link),
        Command::Api => {
            let config = config::load(cli.config.as_deref())?;
            setup_logging(&config.log, cli.verbose);
            run_api(config).await
        }
        Command::Metel(args) => {
            let config = config::load(cli.config.as_deref())?;
            setup_logging(&config.log, cli.verbose);
            let run_id = args.run_id.clone();
            let state = run_metel(config, args).await?;
            info!("Metel for run {} done, final state {}", run_id, state);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
