pub mod apply;
pub mod query;
pub mod sanity;
pub mod validate;

use std::env;

use colored::Colorize;

use crate::constants::{self, defaults};
use crate::errors::ReconcileError;
use crate::manifest::Manifest;
use crate::utils::fs;
use crate::{cli, linux};

pub fn run(cli_args: cli::Cli) -> Result<(), ReconcileError> {
    match cli_args.commands {
        // Default is to validate
        None | Some(cli::Commands::Validate) => validate::run(&cli_args.manifest),

        Some(cli::Commands::Packages) => {
            let packages = apply::packages(&cli_args.manifest)?;
            println!("{}", serde_json::json!({ "packages": packages }));

            Ok(())
        }

        // Apply manifest in full
        Some(cli::Commands::Apply) => {
            if !linux::user::is_root() {
                eprintln!("{}", "WARN: running as non-root user".yellow())
            }

            let report = apply::run(&cli_args.manifest, cli_args.dry_run, &fstab_location())?;
            println!("{}", report.to_json_string());

            Ok(())
        }

        Some(cli::Commands::Info) => query::info(),
        Some(cli::Commands::Resolve(args)) => query::resolve(&args.spec),
        Some(cli::Commands::UnusedDisks(args)) => query::unused_disks(&args.min_size, args.max_return),
    }
}

fn fstab_location() -> String {
    env::var(constants::ENV_FSTAB).unwrap_or(defaults::FSTAB.to_string())
}

pub(super) fn read_manifest(manifest_file: &str) -> Result<Manifest, ReconcileError> {
    let manifest_yaml = fs::read_file(manifest_file)?;
    Manifest::from_yaml(&manifest_yaml)
}
