pub mod actions;
pub mod device;
pub mod discovery;
pub mod engine;
pub mod fstab;
pub mod ops;
pub mod unused;

#[cfg(test)]
pub mod testing;

use std::collections::{BTreeMap, BTreeSet};

use crate::constants::{sizes, DEVICE_SEARCH_DIRS};
use crate::entity::size::Size;
use crate::errors::ReconcileError;

use self::actions::PendingAction;
use self::device::{Device, DeviceId, DeviceKind, FormatKind, LvKind};
use self::engine::Engine;

/// In-memory view of the host's block devices. All mutations are
/// schedule-only until `commit` hands the action queue to the engine.
pub struct DeviceTree {
    devices: BTreeMap<DeviceId, Device>,
    committed: BTreeMap<DeviceId, Device>,
    queue: Vec<PendingAction>,
    next_id: usize,
    engine: Box<dyn Engine>,
}

impl DeviceTree {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            devices: BTreeMap::new(),
            committed: BTreeMap::new(),
            queue: Vec::new(),
            next_id: 0,
            engine,
        }
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> &mut dyn Engine {
        self.engine.as_mut()
    }

    fn allocate_id(&mut self) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Registers a device discovered on the system
    pub fn add_existing(&mut self, mut device: Device) -> DeviceId {
        let id = self.allocate_id();
        device.id = id;
        device.exists = true;

        self.committed.insert(id, device.clone());
        self.devices.insert(id, device);

        id
    }

    pub(crate) fn insert_new(&mut self, mut device: Device) -> DeviceId {
        let id = self.allocate_id();
        device.id = id;
        device.exists = false;
        self.devices.insert(id, device);

        id
    }

    pub fn get(&self, id: DeviceId) -> Result<&Device, ReconcileError> {
        self.devices
            .get(&id)
            .ok_or(ReconcileError::Bug(format!("no device with id {id} in device tree")))
    }

    pub(crate) fn get_mut(&mut self, id: DeviceId) -> Result<&mut Device, ReconcileError> {
        self.devices
            .get_mut(&id)
            .ok_or(ReconcileError::Bug(format!("no device with id {id} in device tree")))
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn children(&self, id: DeviceId) -> Vec<DeviceId> {
        self.devices
            .values()
            .filter(|d| d.parents.contains(&id))
            .map(|d| d.id)
            .collect()
    }

    pub fn is_leaf(&self, id: DeviceId) -> bool {
        !self.devices.values().any(|d| d.parents.contains(&id))
    }

    pub fn leaves(&self) -> Vec<&Device> {
        self.devices
            .values()
            .filter(|d| self.is_leaf(d.id))
            .collect()
    }

    /// All devices `id` is built upon, nearest first
    pub fn ancestors(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut ancestors = Vec::new();
        let mut frontier = match self.devices.get(&id) {
            Some(device) => device.parents.clone(),
            None => return ancestors,
        };

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for parent in frontier {
                if ancestors.contains(&parent) {
                    continue;
                }

                ancestors.push(parent);
                if let Some(device) = self.devices.get(&parent) {
                    next.extend(device.parents.iter().copied());
                }
            }

            frontier = next;
        }

        ancestors
    }

    /// All devices built (transitively) on top of `id`
    pub fn descendants(&self, id: DeviceId) -> Vec<DeviceId> {
        let mut descendants: Vec<DeviceId> = Vec::new();
        let mut frontier = vec![id];

        while let Some(current) = frontier.pop() {
            for child in self.children(current) {
                if !descendants.contains(&child) {
                    descendants.push(child);
                    frontier.push(child);
                }
            }
        }

        descendants
    }

    /// The whole disks `id` ultimately sits on
    pub fn backing_disks(&self, id: DeviceId) -> Vec<DeviceId> {
        if self.devices.get(&id).is_some_and(|d| d.is_disk()) {
            return vec![id];
        }

        self.ancestors(id)
            .into_iter()
            .filter(|a| self.devices.get(a).is_some_and(|d| d.is_disk()))
            .collect()
    }

    /// The open LUKS mapping on top of `id`, if `id` is LUKS-formatted
    pub fn luks_child(&self, id: DeviceId) -> Option<DeviceId> {
        let device = self.devices.get(&id)?;
        device.format.luks()?;

        self.children(id)
            .into_iter()
            .find(|c| self.devices.get(c).is_some_and(|d| d.is_luks()))
    }

    /// The device with encryption unwrapped
    pub fn raw_device(&self, id: DeviceId) -> DeviceId {
        match self.devices.get(&id) {
            Some(device) if device.is_luks() => device.parents.first().copied().unwrap_or(id),
            _ => id,
        }
    }

    /// Whether the device holds data a user could lose: existing
    /// non-empty formatting, devices on top of it, or a signature
    pub fn carries_data(&self, id: DeviceId) -> bool {
        let Some(device) = self.devices.get(&id) else {
            return false;
        };

        if !self.is_leaf(id) {
            return true;
        }

        if device.format.exists && !device.format.is_none() {
            return true;
        }

        device.exists && device.format.is_none() && self.engine.has_signature(device)
    }

    /// Whether the device's current format is real user formatting
    pub fn has_real_format(&self, id: DeviceId) -> bool {
        let Some(device) = self.devices.get(&id) else {
            return false;
        };

        match device.format.is_none() {
            false => device.format.exists,
            true => device.exists && self.engine.has_signature(device),
        }
    }

    /// Space not yet allocated to children
    pub fn free_space(&self, id: DeviceId) -> Result<Size, ReconcileError> {
        let device = self.get(id)?;

        let used: Size = match &device.kind {
            DeviceKind::LvmVg { .. } => self
                .children(id)
                .into_iter()
                .filter_map(|c| self.devices.get(&c))
                .map(|lv| self.lv_footprint(lv))
                .sum(),

            // Thin volumes may overcommit
            DeviceKind::LvmLv {
                kind: LvKind::ThinPool { .. },
                ..
            } => return Ok(device.size),

            DeviceKind::Disk | DeviceKind::Md { .. }
                if matches!(device.format.kind, FormatKind::DiskLabel(_)) =>
            {
                let partitions: Size = self
                    .children(id)
                    .into_iter()
                    .filter_map(|c| self.devices.get(&c))
                    .map(|p| p.size)
                    .sum();

                partitions + Size(sizes::PARTITION_ALIGN * 2)
            }

            _ => return Ok(Size::ZERO),
        };

        Ok(device.size - used)
    }

    /// Space an LV takes from its volume group
    pub(crate) fn lv_footprint(&self, lv: &Device) -> Size {
        let DeviceKind::LvmLv { kind, cache, .. } = &lv.kind else {
            return Size::ZERO;
        };

        let pvs = lv
            .parents
            .first()
            .and_then(|vg| self.devices.get(vg))
            .map(|vg| vg.parents.len() as u32)
            .unwrap_or(1);

        let size = match kind {
            LvKind::Raid { level } => level.lvm_footprint(lv.size, pvs),
            LvKind::ThinPool { metadata_size } => lv.size + *metadata_size,
            LvKind::Thin | LvKind::Vdo => Size::ZERO,
            _ => lv.size,
        };

        size + cache.as_ref().map(|c| c.size).unwrap_or_default()
    }

    /// Size a PV adds to a volume group with extent size `pe_size`
    pub(crate) fn pv_contribution(&self, pv: &Device, pe_size: Size) -> Size {
        (pv.size - Size(sizes::LVM_PV_METADATA)).round_down(pe_size)
    }

    /// Looks a device up by `UUID=`, `LABEL=`, path, alias or bare name
    pub fn resolve(&self, spec: &str) -> Option<&Device> {
        let spec = spec.trim();
        if spec.is_empty() {
            return None;
        }

        if let Some(uuid) = spec.strip_prefix("UUID=") {
            return self
                .devices
                .values()
                .find(|d| d.format.uuid.as_deref() == Some(uuid));
        }

        if let Some(label) = spec.strip_prefix("LABEL=") {
            return self
                .devices
                .values()
                .find(|d| d.format.label.as_deref() == Some(label));
        }

        let candidates: BTreeSet<String> = match spec.starts_with('/') {
            true => BTreeSet::from([spec.to_string()]),
            false => DEVICE_SEARCH_DIRS
                .iter()
                .map(|dir| format!("{dir}/{spec}"))
                .collect(),
        };

        self.devices
            .values()
            .find(|d| {
                candidates.contains(&d.path)
                    || d.aliases.iter().any(|a| candidates.contains(a))
                    || lvm_alias(d).is_some_and(|a| candidates.contains(&a))
            })
            .or_else(|| self.devices.values().find(|d| d.name == spec))
    }

    pub fn resolve_id(&self, spec: &str) -> Option<DeviceId> {
        self.resolve(spec).map(|d| d.id)
    }

    /// Identifier to use in fstab: UUID if known, otherwise the path
    pub fn mount_id(&self, id: DeviceId) -> Option<String> {
        let device = self.devices.get(&id)?;

        match &device.format.uuid {
            Some(uuid) => Some(format!("UUID={uuid}")),
            None => Some(device.path.clone()),
        }
    }
}

// LVs are also reachable as /dev/<vg>/<lv>
fn lvm_alias(device: &Device) -> Option<String> {
    match &device.kind {
        DeviceKind::LvmLv { vg, lv, .. } => Some(format!("/dev/{vg}/{lv}")),
        _ => None,
    }
}
