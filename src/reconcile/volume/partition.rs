use tracing::{info, warn};

use super::{VolumeKindOps, VolumeReconciler};
use crate::constants::sizes;
use crate::devicetree::device::{Device, DeviceId, DeviceKind, Format};
use crate::entity::size::Size;
use crate::errors::ReconcileError;

/// A partition on the disk of a partition pool
pub(super) struct PartitionVolume;

impl VolumeKindOps for PartitionVolume {
    // Partitions carry no names, so the n-th volume of a pool is its n-th partition
    fn lookup(&self, r: &VolumeReconciler) -> Result<Option<DeviceId>, ReconcileError> {
        let Some(disk) = r.pool()?.device else {
            return Ok(None);
        };

        let mut partitions: Vec<(u32, DeviceId)> = r
            .tree
            .children(disk)
            .into_iter()
            .filter_map(|id| match r.tree.get(id).map(|d| &d.kind) {
                Ok(DeviceKind::Partition { number }) => Some((*number, id)),
                _ => None,
            })
            .collect();

        partitions.sort();

        let declared = r.pool()?.spec.volumes.len();
        if r.index == 0 && !partitions.is_empty() && partitions.len() != declared {
            warn!(
                "{} has {} partitions but pool '{}' declares {declared} volumes; matching them by position",
                r.tree.get(disk)?.path,
                partitions.len(),
                r.pool()?.spec.name
            );
        }

        Ok(partitions.get(r.index).map(|(_, id)| *id))
    }

    fn type_matches(&self, device: &Device) -> bool {
        matches!(device.kind, DeviceKind::Partition { .. })
    }

    fn create(&self, r: &mut VolumeReconciler) -> Result<DeviceId, ReconcileError> {
        let disk = r.pool_device()?;
        let free = r.tree.free_space(disk)?;

        let max = match r.spec.size {
            Some(_) => Some(r.new_size(free)?),
            None => None,
        };

        info!("creating partition for volume '{}' on {}", r.spec.name, r.tree.get(disk)?.path);
        r.tree.new_partition(
            disk,
            Size(sizes::PARTITION_INITIAL),
            true,
            max,
            Format::none(),
        )
    }

    fn size_base(&self, r: &VolumeReconciler) -> Result<(Option<Size>, Size), ReconcileError> {
        let disk = r.pool_device()?;
        Ok((Some(r.tree.get(disk)?.size), Size(sizes::PARTITION_ALIGN)))
    }
}
