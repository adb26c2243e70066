mod cli;
mod constants;
mod devicetree;
mod entity;
mod errors;
mod linux;
mod manifest;
mod reconcile;
mod run;
mod utils;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::entity::report::ReconcileResult;
use crate::errors::ReconcileError;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(constants::defaults::LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let args = cli::Cli::parse();
    if let Err(err) = run::run(args) {
        let msg = err.to_string();
        let failure = match err {
            ReconcileError::CommitFailed { result, .. } => result.to_failure_json(&msg),
            _ => ReconcileResult::default().to_failure_json(&msg),
        };

        println!("{failure}");
        std::process::exit(1);
    }
}
