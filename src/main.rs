use std::process::ExitCode;

use clap::Parser;
use cli::ReaperCli;
use config::{Config, expand_home};
use database::mysql::MySqlConnector;
use reaper::{Reaper, ReaperError, RunOutcome, error_chain};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transport::SshTransportFactory;
use tunneling::auth::AuthResolver;

mod cli;
mod config;
mod database;
mod reaper;
mod table;
mod transport;
mod tunneling;

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = ReaperCli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: ReaperCli) -> Result<(), ReaperError> {
    let config = Config::load(&expand_home(&cli.config))?;
    let reaper = Reaper::new(
        SshTransportFactory::new(AuthResolver::from_env()),
        MySqlConnector,
        cli.max_time,
    );
    let stdin = BufReader::new(tokio::io::stdin());
    match reaper.run(&config, stdin, tokio::io::stdout()).await? {
        RunOutcome::Declined { candidates } => {
            info!("aborted, {} processes left running", candidates)
        }
        RunOutcome::Completed(report) => {
            for outcome in report.outcomes().iter().filter(|o| !o.succeeded) {
                warn!(
                    "process {} not killed: {}",
                    outcome.process_id,
                    outcome.error_detail.as_deref().unwrap_or_default()
                );
            }
            info!(
                "killed {} of {} processes",
                report.succeeded(),
                report.attempted()
            );
        }
    }
    Ok(())
}

/// Logs go to stderr so they never mix with the listing and the prompt.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
