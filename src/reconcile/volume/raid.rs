use tracing::info;

use super::{VolumeKindOps, VolumeReconciler};
use crate::devicetree::device::{Device, DeviceId, DeviceKind, Format, FormatKind};
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::reconcile::{members, raid};

/// A standalone md array assembled from whole disks
pub(super) struct RaidVolume;

impl VolumeKindOps for RaidVolume {
    fn lookup(&self, r: &VolumeReconciler) -> Result<Option<DeviceId>, ReconcileError> {
        Ok(r.tree.resolve_id(&format!("/dev/md/{}", r.declared.name)))
    }

    fn type_matches(&self, device: &Device) -> bool {
        matches!(device.kind, DeviceKind::Md { .. })
    }

    fn create(&self, r: &mut VolumeReconciler) -> Result<DeviceId, ReconcileError> {
        let disks = members::resolve_disks(r.tree, &r.spec.disks)?;

        let mut array_members = Vec::with_capacity(disks.len());
        for disk in disks {
            let member = members::prepare_member(r.tree, r.config, disk)?;
            r.tree.format_device(member, Format::new(FormatKind::MdMember))?;
            array_members.push(member);
        }

        let request = raid::md_request(&r.spec.name, &r.spec.raid, array_members)?;
        info!(
            "creating {} array '{}' of {} members",
            request.level.as_str(),
            request.name,
            request.members.len()
        );

        r.tree.new_md(request)
    }

    fn size_base(&self, _r: &VolumeReconciler) -> Result<(Option<Size>, Size), ReconcileError> {
        Ok((None, Size::ZERO))
    }

    fn resizable(&self) -> bool {
        false
    }
}
