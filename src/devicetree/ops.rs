use tracing::debug;

use super::actions::ActionKind;
use super::device::{
    dm_escape, Device, DeviceId, DeviceKind, Format, FormatKind, LvCache, LvKind, RaidLevel,
};
use super::DeviceTree;
use crate::constants::sizes;
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::linux::partition_name;

#[derive(Debug, Clone)]
pub struct LvRequest {
    pub name: String,
    pub size: Size,
    pub kind: LvKind,
    pub format: Format,
    pub cache: Option<LvCache>,
}

#[derive(Debug, Clone)]
pub struct MdRequest {
    pub name: String,
    pub level: RaidLevel,
    pub members: Vec<DeviceId>,
    pub active: u32,
    pub spare: u32,
    pub chunk_size: Option<Size>,
    pub metadata: Option<String>,
    pub format: Format,
}

fn fresh(mut format: Format) -> Format {
    format.exists = false;
    format.uuid = None;
    format.mountpoint = None;
    format
}

impl DeviceTree {
    fn create_new(&mut self, mut device: Device) -> Result<DeviceId, ReconcileError> {
        let format = fresh(std::mem::take(&mut device.format));
        device.format = format.clone();

        let id = self.insert_new(device);
        self.schedule(ActionKind::CreateDevice, id)?;

        if !format.is_none() {
            let snapshot = self.get(id)?.clone();
            self.schedule_with(ActionKind::CreateFormat, snapshot, format, None, None)?;
        }

        Ok(id)
    }

    /// Replaces the format of `id`, destroying the old one if it exists
    pub fn format_device(&mut self, id: DeviceId, format: Format) -> Result<(), ReconcileError> {
        let device = self.get(id)?.clone();
        let old = device.format.clone();

        if old.exists && !old.is_none() {
            self.schedule_with(ActionKind::DestroyFormat, device, old, None, None)?;
        } else if !old.is_none() {
            self.cancel(id, |a| a.kind.is_format());
        }

        let format = fresh(format);
        self.get_mut(id)?.format = format.clone();

        if !format.is_none() {
            let snapshot = self.get(id)?.clone();
            self.schedule_with(ActionKind::CreateFormat, snapshot, format, None, None)?;
        }

        Ok(())
    }

    pub fn destroy_format(&mut self, id: DeviceId) -> Result<(), ReconcileError> {
        if self.get(id)?.format.is_none() {
            return Ok(());
        }

        self.format_device(id, Format::none())
    }

    /// Removes a leaf device. Scheduled-only devices simply vanish
    /// together with every action queued for them.
    pub fn destroy_device(&mut self, id: DeviceId) -> Result<(), ReconcileError> {
        let device = self.get(id)?.clone();

        if !self.is_leaf(id) {
            return Err(ReconcileError::Bug(format!(
                "cannot destroy device '{}' with devices on top of it",
                device.path
            )));
        }

        match device.exists {
            true => {
                let format = device.format.clone();
                self.schedule_with(ActionKind::DestroyDevice, device, format, None, None)?;
            }
            false => self.cancel(id, |_| true),
        }

        // Containers lose the device as a member
        for container in self.devices.values_mut() {
            container.parents.retain(|p| *p != id);
        }

        self.devices.remove(&id);
        Ok(())
    }

    /// Destroys everything built on `id` leaves first, then its format,
    /// and the device itself if `remove_device` is set
    pub fn recursive_remove(&mut self, id: DeviceId, remove_device: bool) -> Result<(), ReconcileError> {
        let mut pending = self.descendants(id);

        while !pending.is_empty() {
            let leaves: Vec<DeviceId> = pending
                .iter()
                .copied()
                .filter(|d| self.is_leaf(*d))
                .collect();

            if leaves.is_empty() {
                return Err(ReconcileError::Bug(format!(
                    "dependency cycle below device {id} in device tree"
                )));
            }

            for leaf in leaves {
                self.destroy_format(leaf)?;
                self.destroy_device(leaf)?;
                pending.retain(|d| *d != leaf);
            }
        }

        self.destroy_format(id)?;
        if remove_device {
            self.destroy_device(id)?;
        }

        Ok(())
    }

    pub fn relabel_format(&mut self, id: DeviceId, label: &str) -> Result<(), ReconcileError> {
        let device = self.get_mut(id)?;
        if !device.format.exists || device.format.is_none() {
            return Err(ReconcileError::Bug(format!(
                "cannot relabel missing format on '{}'",
                device.path
            )));
        }

        device.format.label = Some(label.to_string());
        self.schedule(ActionKind::ConfigureFormat, id)
    }

    /// Smallest and largest size `id` can be resized to
    pub fn resize_bounds(&self, id: DeviceId) -> Result<(Size, Size), ReconcileError> {
        let device = self.get(id)?;
        let top = self.luks_child(id).unwrap_or(id);
        let can_shrink = self.get(top)?.format.can_shrink();
        let parent = device.parents.first().copied();

        let not_resizable = || {
            Err(ReconcileError::ResizeBounds(format!(
                "device '{}' of type {} is not resizable",
                device.path,
                device.type_name()
            )))
        };

        let Some(parent) = parent else {
            return not_resizable();
        };

        let pe = Size(sizes::LVM_PE_SIZE);
        match &device.kind {
            DeviceKind::LvmLv { kind, .. } => match kind {
                LvKind::Linear | LvKind::Raid { .. } => {
                    let min = if can_shrink { pe } else { device.size };
                    Ok((min, device.size + self.free_space(parent)?))
                }

                LvKind::ThinPool { .. } => Ok((device.size, device.size + self.free_space(parent)?)),

                LvKind::Thin => {
                    let min = if can_shrink { pe } else { device.size };
                    Ok((min, self.get(parent)?.size))
                }

                LvKind::VdoPool { .. } | LvKind::Vdo => not_resizable(),
            },

            DeviceKind::Partition { .. } => {
                let min = if can_shrink { Size(sizes::MIB) } else { device.size };
                Ok((min, device.size + self.free_space(parent)?))
            }

            _ => not_resizable(),
        }
    }

    /// Schedules a resize of `id` and whatever sits on it. Growing resizes
    /// the device before the format; shrinking does the reverse.
    pub fn resize(&mut self, id: DeviceId, target: Size) -> Result<(), ReconcileError> {
        let (min, max) = self.resize_bounds(id)?;
        let device = self.get(id)?.clone();

        if target < min || target > max {
            return Err(ReconcileError::ResizeBounds(format!(
                "invalid size {target} for device '{}': must be within [{min}, {max}]",
                device.path
            )));
        }

        if target == device.size {
            return Ok(());
        }

        let grow = target > device.size;
        let luks = self.luks_child(id);
        let top = luks.unwrap_or(id);

        self.get_mut(id)?.size = target;
        if let Some(luks) = luks {
            let header = device
                .format
                .luks()
                .map(|p| p.header_size())
                .unwrap_or_default();

            self.get_mut(luks)?.size = target - header;
        }

        let mut steps = vec![(ActionKind::ResizeDevice, id)];
        if let Some(luks) = luks {
            steps.push((ActionKind::ResizeDevice, luks));
        }

        let top_format = &self.get(top)?.format;
        if top_format.exists && (top_format.is_mountable() || top_format.is_swap()) {
            steps.push((ActionKind::ResizeFormat, top));
        }

        if !grow {
            steps.reverse();
        }

        debug!("resizing {} from {} to {target}", device.path, device.size);

        for (kind, dev) in steps {
            let snapshot = self.get(dev)?.clone();
            let format = snapshot.format.clone();
            let size = Some(snapshot.size);

            self.schedule_with(kind, snapshot, format, size, None)?;
        }

        Ok(())
    }

    /// Allocates a partition on a disk carrying a partition table. Growing
    /// partitions take all free space, capped at `max`.
    pub fn new_partition(
        &mut self,
        disk: DeviceId,
        initial: Size,
        grow: bool,
        max: Option<Size>,
        format: Format,
    ) -> Result<DeviceId, ReconcileError> {
        let parent = self.get(disk)?.clone();

        if !matches!(parent.format.kind, FormatKind::DiskLabel(_)) {
            return Err(ReconcileError::Allocation(format!(
                "disk '{}' has no partition table",
                parent.name
            )));
        }

        let granularity = Size(sizes::PARTITION_ALIGN);
        let free = self.free_space(disk)?.round_down(granularity);
        let size = match grow {
            true => max.map_or(free, |m| m.round_up(granularity).min(free)),
            false => initial.round_up(granularity),
        };

        let fits = match grow {
            true => free >= initial && size > Size::ZERO,
            false => size <= free && size > Size::ZERO,
        };

        if !fits {
            return Err(ReconcileError::Allocation(format!(
                "not enough space on disk '{}' for a new partition: {free} free",
                parent.name
            )));
        }

        let number = self
            .children(disk)
            .into_iter()
            .filter_map(|c| match self.devices.get(&c).map(|d| &d.kind) {
                Some(DeviceKind::Partition { number }) => Some(*number),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            + 1;

        self.create_new(Device {
            id: DeviceId(0),
            name: partition_name(&parent.name, number),
            path: partition_name(&parent.path, number),
            aliases: Vec::new(),
            kind: DeviceKind::Partition { number },
            parents: vec![disk],
            size,
            format,
            exists: false,
        })
    }

    pub fn new_vg(&mut self, name: &str, pvs: &[DeviceId]) -> Result<DeviceId, ReconcileError> {
        let pe_size = Size(sizes::LVM_PE_SIZE);
        let mut size = Size::ZERO;

        for pv in pvs {
            let device = self.get(*pv)?;
            if device.format.kind != FormatKind::LvmPv {
                return Err(ReconcileError::Bug(format!(
                    "device '{}' is not an lvm physical volume",
                    device.path
                )));
            }

            size = size + self.pv_contribution(device, pe_size);
        }

        self.create_new(Device {
            id: DeviceId(0),
            name: name.to_string(),
            path: format!("/dev/{name}"),
            aliases: Vec::new(),
            kind: DeviceKind::LvmVg { pe_size },
            parents: pvs.to_vec(),
            size,
            format: Format::none(),
            exists: false,
        })
    }

    /// Creates an LV in a VG, or a thin/VDO volume in a pool LV
    pub fn new_lv(&mut self, parent: DeviceId, request: LvRequest) -> Result<DeviceId, ReconcileError> {
        let container = self.get(parent)?.clone();

        let vg = match &container.kind {
            DeviceKind::LvmVg { .. } => container.name.clone(),
            DeviceKind::LvmLv {
                vg,
                kind: LvKind::ThinPool { .. } | LvKind::VdoPool { .. },
                ..
            } => vg.clone(),
            _ => {
                return Err(ReconcileError::Bug(format!(
                    "device '{}' can not hold logical volumes",
                    container.path
                )))
            }
        };

        let dm_name = format!("{}-{}", dm_escape(&vg), dm_escape(&request.name));
        let device = Device {
            id: DeviceId(0),
            name: dm_name.clone(),
            path: format!("/dev/mapper/{dm_name}"),
            aliases: Vec::new(),
            kind: DeviceKind::LvmLv {
                vg,
                lv: request.name.clone(),
                kind: request.kind,
                cache: request.cache,
            },
            parents: vec![parent],
            size: request.size,
            format: request.format,
            exists: false,
        };

        if container.is_vg() {
            let needed = self.lv_footprint(&device);
            let free = self.free_space(parent)?;

            if needed > free {
                return Err(ReconcileError::InsufficientSpace(format!(
                    "not enough space in '{}' for volume '{}': need {needed}, {free} free",
                    container.name, request.name
                )));
            }
        }

        self.create_new(device)
    }

    pub fn new_md(&mut self, request: MdRequest) -> Result<DeviceId, ReconcileError> {
        let mut member_size: Option<Size> = None;

        for member in &request.members {
            let device = self.get(*member)?;
            if device.format.kind != FormatKind::MdMember {
                return Err(ReconcileError::Bug(format!(
                    "device '{}' is not formatted as an md member",
                    device.path
                )));
            }

            member_size = Some(member_size.map_or(device.size, |s| s.min(device.size)));
        }

        let member_size = member_size.unwrap_or_default() - Size(sizes::MD_SUPERBLOCK);

        self.create_new(Device {
            id: DeviceId(0),
            name: request.name.clone(),
            path: format!("/dev/md/{}", request.name),
            aliases: Vec::new(),
            kind: DeviceKind::Md {
                level: request.level,
                active: request.active,
                spare: request.spare,
                chunk_size: request.chunk_size,
                metadata: request.metadata,
            },
            parents: request.members,
            size: request.level.data_size(member_size, request.active),
            format: request.format,
            exists: false,
        })
    }

    /// Opens a mapping on a LUKS-formatted device, carrying `format`
    pub fn new_luks(&mut self, raw: DeviceId, format: Format) -> Result<DeviceId, ReconcileError> {
        let device = self.get(raw)?.clone();
        let Some(params) = device.format.luks() else {
            return Err(ReconcileError::Bug(format!(
                "device '{}' is not formatted as luks",
                device.path
            )));
        };

        self.create_new(Device {
            id: DeviceId(0),
            name: params.map_name.clone(),
            path: format!("/dev/mapper/{}", params.map_name),
            aliases: Vec::new(),
            kind: DeviceKind::Luks,
            parents: vec![raw],
            size: device.size - params.header_size(),
            format,
            exists: false,
        })
    }

    fn vg_pe_size(&self, vg: DeviceId) -> Result<Size, ReconcileError> {
        let device = self.get(vg)?;
        match &device.kind {
            DeviceKind::LvmVg { pe_size } => Ok(*pe_size),
            _ => Err(ReconcileError::Bug(format!(
                "device '{}' is not a volume group",
                device.path
            ))),
        }
    }

    pub fn add_member(&mut self, vg: DeviceId, member: DeviceId) -> Result<(), ReconcileError> {
        let pe_size = self.vg_pe_size(vg)?;
        let pv = self.get(member)?.clone();

        if pv.format.kind != FormatKind::LvmPv {
            return Err(ReconcileError::Bug(format!(
                "device '{}' is not an lvm physical volume",
                pv.path
            )));
        }

        let contribution = self.pv_contribution(&pv, pe_size);
        let container = self.get_mut(vg)?;
        container.parents.push(member);
        container.size = container.size + contribution;

        let snapshot = container.clone();
        self.schedule_with(ActionKind::AddMember, snapshot, Format::none(), None, Some(pv))
    }

    pub fn remove_member(&mut self, vg: DeviceId, member: DeviceId) -> Result<(), ReconcileError> {
        let pe_size = self.vg_pe_size(vg)?;
        let pv = self.get(member)?.clone();
        let contribution = self.pv_contribution(&pv, pe_size);
        let free = self.free_space(vg)?;
        let container = self.get(vg)?;

        if !container.parents.contains(&member) {
            return Err(ReconcileError::Bug(format!(
                "device '{}' is not a member of '{}'",
                pv.path, container.name
            )));
        }

        if free < contribution {
            return Err(ReconcileError::MemberRemoval(format!(
                "not enough free space in '{}' to remove member '{}': {free} free, {contribution} needed",
                container.name, pv.path
            )));
        }

        let container = self.get_mut(vg)?;
        container.parents.retain(|p| *p != member);
        container.size = container.size - contribution;

        let snapshot = container.clone();
        self.schedule_with(ActionKind::RemoveMember, snapshot, Format::none(), None, Some(pv))
    }

    pub fn attach_cache(&mut self, lv: DeviceId, cache: LvCache) -> Result<(), ReconcileError> {
        let device = self.get(lv)?.clone();
        let Some(&vg) = device.parents.first() else {
            return Err(ReconcileError::Bug(format!("lv '{}' has no vg", device.path)));
        };

        let free = self.free_space(vg)?;
        if cache.size > free {
            return Err(ReconcileError::InsufficientSpace(format!(
                "not enough space for cache of '{}': need {}, {free} free",
                device.path, cache.size
            )));
        }

        match &mut self.get_mut(lv)?.kind {
            DeviceKind::LvmLv { cache: current, .. } => *current = Some(cache),
            _ => {
                return Err(ReconcileError::Bug(format!(
                    "device '{}' is not a logical volume",
                    device.path
                )))
            }
        }

        self.schedule(ActionKind::AttachCache, lv)
    }

    pub fn detach_cache(&mut self, lv: DeviceId) -> Result<(), ReconcileError> {
        self.schedule(ActionKind::DetachCache, lv)?;

        if let DeviceKind::LvmLv { cache, .. } = &mut self.get_mut(lv)?.kind {
            *cache = None;
        }

        Ok(())
    }
}
