use tracing::{debug, warn};

use super::{blkid, fdisk, luks, lvm, mdadm, mkfs, mount};
use crate::devicetree::actions::{ActionKind, PendingAction};
use crate::devicetree::device::{Device, DeviceKind, Format, FormatKind, LvKind};
use crate::devicetree::engine::Engine;
use crate::errors::ReconcileError;
use crate::utils::shell;

/// Engine carrying out actions with the usual Linux storage tools
#[derive(Debug, Default)]
pub struct ShellEngine;

fn parent(action: &PendingAction) -> Result<&Device, ReconcileError> {
    action.parents.first().ok_or(ReconcileError::Bug(format!(
        "device '{}' has no parent",
        action.device.path
    )))
}

fn unsupported(action: &PendingAction) -> ReconcileError {
    ReconcileError::Bug(format!(
        "cannot {} on device '{}' of type {}",
        action.kind.as_str(),
        action.device.path,
        action.device.type_name()
    ))
}

impl ShellEngine {
    fn create_device(&self, action: &PendingAction) -> Result<(), ReconcileError> {
        let device = &action.device;

        match &device.kind {
            DeviceKind::Partition { .. } => fdisk::create_partition(&parent(action)?.path, device.size),

            DeviceKind::LvmVg { pe_size } => {
                let pvs: Vec<&str> = action.parents.iter().map(|p| p.path.as_str()).collect();
                lvm::create_vg(&device.name, *pe_size, &pvs)
            }

            DeviceKind::LvmLv { vg, lv, kind, cache } => {
                match kind {
                    LvKind::Linear => lvm::create_lv(vg, lv, device.size, None)?,
                    LvKind::Raid { level } => lvm::create_lv(vg, lv, device.size, Some(level.as_str()))?,
                    LvKind::ThinPool { metadata_size } => {
                        lvm::create_thin_pool(vg, lv, device.size, *metadata_size)?
                    }
                    LvKind::Thin => {
                        let pool = lv_name(parent(action)?)?;
                        lvm::create_thin_lv(vg, pool, lv, device.size)?
                    }

                    // Created together with its virtual volume
                    LvKind::VdoPool { .. } => {
                        debug!("deferring creation of vdo pool {}", device.path);
                    }

                    LvKind::Vdo => {
                        let pool = parent(action)?;
                        let DeviceKind::LvmLv {
                            lv: pool_name,
                            kind: LvKind::VdoPool { deduplication, compression },
                            ..
                        } = &pool.kind
                        else {
                            return Err(unsupported(action));
                        };

                        lvm::create_vdo(&lvm::VdoArgs {
                            vg,
                            pool: pool_name,
                            lv,
                            pool_size: pool.size,
                            virtual_size: device.size,
                            deduplication: *deduplication,
                            compression: *compression,
                        })?
                    }
                }

                match cache {
                    Some(cache) => lvm::attach_cache(vg, lv, cache.size, &cache.mode, &cache.devices),
                    None => Ok(()),
                }
            }

            DeviceKind::Md {
                level,
                active,
                spare,
                chunk_size,
                metadata,
            } => mdadm::create(&mdadm::ArrayArgs {
                name: &device.name,
                level: *level,
                active: *active,
                spare: *spare,
                chunk_size: *chunk_size,
                metadata: metadata.as_deref(),
                members: action.parents.iter().map(|p| p.path.as_str()).collect(),
            }),

            DeviceKind::Luks => {
                let raw = parent(action)?;
                let params = raw.format.luks().ok_or_else(|| unsupported(action))?;

                luks::open(&raw.path, params)
            }

            DeviceKind::Disk | DeviceKind::Other(_) => Err(unsupported(action)),
        }
    }

    fn destroy_device(&self, action: &PendingAction) -> Result<(), ReconcileError> {
        let device = &action.device;

        match &device.kind {
            DeviceKind::Partition { number } => fdisk::delete_partition(&parent(action)?.path, *number),
            DeviceKind::LvmVg { .. } => lvm::remove_vg(&device.name),
            DeviceKind::LvmLv { vg, lv, .. } => lvm::remove_lv(vg, lv),
            DeviceKind::Md { .. } => mdadm::stop(&device.path),
            DeviceKind::Luks => luks::close(&device.name),
            DeviceKind::Disk | DeviceKind::Other(_) => Err(unsupported(action)),
        }
    }

    fn create_format(&self, device: &Device, format: &Format) -> Result<Option<String>, ReconcileError> {
        let path = device.path.as_str();
        let label = format.label.as_deref();

        match &format.kind {
            FormatKind::None | FormatKind::MdMember => return Ok(None),
            FormatKind::LvmPv => {
                lvm::create_pv(path)?;
                return Ok(None);
            }
            FormatKind::DiskLabel(table) => {
                fdisk::create_table(path, table)?;
                return Ok(None);
            }

            FormatKind::Fs(fs_type) => {
                mkfs::create_fs(fs_type, path, label, format.create_options.as_deref())?
            }
            FormatKind::Swap => mkfs::create_swap(path, label)?,
            FormatKind::Luks(params) => luks::format(path, params)?,
        }

        blkid::uuid(path)
    }

    fn destroy_format(&self, device: &Device, format: &Format) -> Result<(), ReconcileError> {
        match &format.kind {
            FormatKind::None => Ok(()),
            FormatKind::LvmPv => lvm::remove_pv(&device.path),
            FormatKind::MdMember => mdadm::zero_superblock(&device.path),
            _ => blkid::wipe(&device.path),
        }
    }

    fn resize_device(&self, action: &PendingAction) -> Result<(), ReconcileError> {
        let device = &action.device;
        let size = action.size.unwrap_or(device.size);

        match &device.kind {
            DeviceKind::Partition { number } => {
                fdisk::resize_partition(&parent(action)?.path, *number, size)
            }
            DeviceKind::LvmLv { vg, lv, .. } => lvm::resize_lv(vg, lv, size),
            DeviceKind::Luks => luks::resize(&device.name),
            _ => Err(unsupported(action)),
        }
    }
}

fn lv_name(device: &Device) -> Result<&str, ReconcileError> {
    match &device.kind {
        DeviceKind::LvmLv { lv, .. } => Ok(lv),
        _ => Err(ReconcileError::Bug(format!(
            "device '{}' is not a logical volume",
            device.path
        ))),
    }
}

impl Engine for ShellEngine {
    fn execute(&mut self, action: &PendingAction) -> Result<Option<String>, ReconcileError> {
        let device = &action.device;

        match action.kind {
            ActionKind::CreateDevice => self.create_device(action)?,
            ActionKind::DestroyDevice => self.destroy_device(action)?,
            ActionKind::CreateFormat => return self.create_format(device, &action.format),
            ActionKind::DestroyFormat => self.destroy_format(device, &action.format)?,

            ActionKind::ConfigureFormat => {
                let fs_type = action.format.type_name().ok_or_else(|| unsupported(action))?;
                let label = action.format.label.as_deref().unwrap_or_default();

                mkfs::relabel(fs_type, &device.path, label)?
            }

            ActionKind::ResizeDevice => self.resize_device(action)?,

            ActionKind::ResizeFormat => {
                let fs_type = action.format.type_name().ok_or_else(|| unsupported(action))?;
                mkfs::resize_fs(fs_type, &device.path, action.format.uuid.as_deref())?
            }

            ActionKind::AddMember | ActionKind::RemoveMember => {
                let member = action.member.as_ref().ok_or_else(|| unsupported(action))?;

                match action.kind {
                    ActionKind::AddMember => lvm::extend_vg(&device.name, &member.path)?,
                    _ => lvm::reduce_vg(&device.name, &member.path)?,
                }
            }

            ActionKind::AttachCache => {
                let DeviceKind::LvmLv {
                    vg,
                    lv,
                    cache: Some(cache),
                    ..
                } = &device.kind
                else {
                    return Err(unsupported(action));
                };

                lvm::attach_cache(vg, lv, cache.size, &cache.mode, &cache.devices)?
            }

            ActionKind::DetachCache => {
                let DeviceKind::LvmLv { vg, lv, .. } = &device.kind else {
                    return Err(unsupported(action));
                };

                lvm::detach_cache(vg, lv)?
            }
        }

        Ok(None)
    }

    fn teardown_format(&mut self, device: &Device) -> Result<(), ReconcileError> {
        if device.format.is_swap() {
            // Inactive swap is fine
            if let Err(err) = mount::swapoff(&device.path) {
                warn!("swapoff {}: {err}", device.path);
            }

            return Ok(());
        }

        match &device.format.mountpoint {
            Some(mountpoint) => mount::umount(mountpoint),
            None => Ok(()),
        }
    }

    fn activate_swap(&mut self, device: &Device) -> Result<(), ReconcileError> {
        mount::swapon(&device.path)
    }

    fn format_supported(&self, kind: &FormatKind) -> bool {
        match kind {
            FormatKind::None => true,
            FormatKind::Fs(fs_type) => mkfs::supported(fs_type),
            FormatKind::Swap => mkfs::supported("swap"),
            FormatKind::LvmPv => shell::in_path("pvcreate"),
            FormatKind::Luks(_) => shell::in_path("cryptsetup"),
            FormatKind::MdMember => shell::in_path("mdadm"),
            FormatKind::DiskLabel(_) => shell::in_path("sfdisk"),
        }
    }

    fn has_signature(&self, device: &Device) -> bool {
        blkid::has_signature(&device.path)
    }
}
