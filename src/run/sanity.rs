use tracing::warn;

use crate::constants::REQUIRED_COMMANDS;
use crate::errors::ReconcileError;
use crate::manifest::Manifest;
use crate::utils::fs::file_exists;
use crate::utils::shell::in_path;

/// Fails early if a tool needed to inspect the system is missing
pub fn check_commands() -> Result<(), ReconcileError> {
    for cmd in REQUIRED_COMMANDS {
        if !in_path(cmd) {
            return Err(ReconcileError::CmdFailed {
                error: None,
                context: format!("no such program: {cmd}"),
            });
        }
    }

    Ok(())
}

/// Warns about declared disk paths missing from the system
pub fn check_disks(manifest: &Manifest) {
    let disks = manifest
        .pools
        .iter()
        .flat_map(|p| p.disks.iter())
        .chain(manifest.volumes.iter().flat_map(|v| v.disks.iter()));

    for disk in disks.filter(|d| d.starts_with('/')) {
        if !file_exists(disk) {
            warn!("no such device: {disk}");
        }
    }
}
