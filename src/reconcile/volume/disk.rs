use super::{VolumeKindOps, VolumeReconciler};
use crate::devicetree::device::{Device, DeviceId};
use crate::entity::size::Size;
use crate::errors::ReconcileError;

/// A filesystem directly on a whole disk
pub(super) struct DiskVolume;

impl VolumeKindOps for DiskVolume {
    fn lookup(&self, r: &VolumeReconciler) -> Result<Option<DeviceId>, ReconcileError> {
        let disk = match r.declared.disks.as_slice() {
            [disk] => disk,
            disks => {
                return Err(ReconcileError::BadManifest(format!(
                    "disk volume '{}' must have exactly one disk, got {}",
                    r.declared.name,
                    disks.len()
                )))
            }
        };

        r.tree
            .resolve_id(disk)
            .map(Some)
            .ok_or(ReconcileError::UnresolvedDisk(format!(
                "unable to resolve disk '{disk}' of volume '{}'",
                r.declared.name
            )))
    }

    fn type_matches(&self, device: &Device) -> bool {
        device.is_disk()
    }

    fn create(&self, r: &mut VolumeReconciler) -> Result<DeviceId, ReconcileError> {
        Err(ReconcileError::UnresolvedDisk(format!(
            "disk of volume '{}' is not a whole disk",
            r.spec.name
        )))
    }

    fn size_base(&self, _r: &VolumeReconciler) -> Result<(Option<Size>, Size), ReconcileError> {
        Ok((None, Size::ZERO))
    }

    fn resizable(&self) -> bool {
        false
    }

    fn apply_defaults(&self, r: &mut VolumeReconciler) {
        if r.spec.fs_create_options.is_some() {
            return;
        }

        let Some(fs_type) = r.spec.fs_type.as_deref() else {
            return;
        };

        r.spec.fs_create_options = r.config.diskvolume_mkfs_option_map.get(fs_type).cloned();
    }
}
