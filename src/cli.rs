use clap::{Args, Parser, Subcommand};

use crate::constants::defaults;
use crate::errors::ReconcileError;

#[derive(Debug, Parser)]
#[clap(
    version,
    about = "Declarative storage layout reconciler"
)]
pub struct Cli {
    #[command(subcommand)]
    pub commands: Option<Commands>,

    /// Manifest file
    #[arg(
        global = true,
        short = 'f',
        long = "file",
        value_parser = validate_filename,
        default_value_t = String::from(defaults::MANIFEST)
    )]
    pub manifest: String,

    /// Dry-run, blkstack will not commit any changes to disks,
    /// and will just print the actions it would perform
    #[arg(global = true, short = 'n', long = "dry-run", default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the system's storage with the manifest
    Apply,

    /// Print the host packages the manifest needs
    Packages,

    /// Validate the manifest without looking at the system
    Validate,

    /// Print every discovered block device
    Info,

    /// Resolve a device spec (UUID=, LABEL=, path or name) to its device
    Resolve(ArgsResolve),

    /// List disks that are safe to use for new pools
    UnusedDisks(ArgsUnusedDisks),
}

#[derive(Debug, Args)]
pub struct ArgsResolve {
    pub spec: String,
}

#[derive(Debug, Args)]
pub struct ArgsUnusedDisks {
    /// Smallest usable disk, e.g. 10GiB
    #[arg(long = "min-size", default_value_t = String::from("0"))]
    pub min_size: String,

    /// Return at most this many disks
    #[arg(long = "max-return")]
    pub max_return: Option<usize>,
}

fn validate_filename(name: &str) -> Result<String, ReconcileError> {
    if name.is_empty() {
        return Err(ReconcileError::BadArgs(String::from("empty filename")));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli() {
        let cli = Cli::parse_from(["blkstack"]);
        assert!(cli.commands.is_none());
        assert_eq!(defaults::MANIFEST, cli.manifest);
        assert!(!cli.dry_run);

        let cli = Cli::parse_from(["blkstack", "apply", "-n", "-f", "storage.yaml"]);
        assert!(matches!(cli.commands, Some(Commands::Apply)));
        assert_eq!("storage.yaml", cli.manifest);
        assert!(cli.dry_run);

        let cli = Cli::parse_from(["blkstack", "unused-disks", "--min-size", "10GiB", "--max-return", "2"]);
        let Some(Commands::UnusedDisks(args)) = cli.commands else {
            panic!("expected unused-disks");
        };
        assert_eq!("10GiB", args.min_size);
        assert_eq!(Some(2), args.max_return);

        assert!(Cli::try_parse_from(["blkstack", "-f", ""]).is_err());
    }
}
