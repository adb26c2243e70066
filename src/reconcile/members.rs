use tracing::info;

use super::config::ReconcileConfig;
use crate::constants::sizes;
use crate::devicetree::device::{DeviceId, Format, FormatKind};
use crate::devicetree::DeviceTree;
use crate::entity::size::Size;
use crate::errors::ReconcileError;

/// Resolves declared disk names, failing on the first unknown one
pub fn resolve_disks(tree: &DeviceTree, names: &[String]) -> Result<Vec<DeviceId>, ReconcileError> {
    names
        .iter()
        .map(|name| {
            tree.resolve_id(name).ok_or(ReconcileError::UnresolvedDisk(format!(
                "unable to resolve disk specified: {name}"
            )))
        })
        .collect()
}

/// Wipes a disk and returns the device a new member format goes on:
/// a fresh whole-disk partition when partitions are configured,
/// the disk itself otherwise
pub fn prepare_member(
    tree: &mut DeviceTree,
    config: &ReconcileConfig,
    disk: DeviceId,
) -> Result<DeviceId, ReconcileError> {
    if config.safe_mode && tree.carries_data(disk) {
        return Err(ReconcileError::SafeMode(format!(
            "cannot reuse existing disk '{}' with data in safe mode",
            tree.get(disk)?.path
        )));
    }

    tree.recursive_remove(disk, false)?;

    if !config.use_partitions {
        return Ok(disk);
    }

    info!("partitioning member disk {}", tree.get(disk)?.path);
    tree.format_device(disk, Format::new(FormatKind::DiskLabel(config.disklabel())))?;
    tree.new_partition(
        disk,
        Size(sizes::PARTITION_INITIAL),
        true,
        None,
        Format::none(),
    )
}
