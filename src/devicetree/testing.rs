//! In-memory storage engine and device tree builders for tests

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use super::actions::{ActionKind, PendingAction};
use super::device::{
    dm_escape, Device, DeviceId, DeviceKind, Format, FormatKind, LuksParams, LvKind, RaidLevel,
};
use super::engine::Engine;
use super::DeviceTree;
use crate::constants::sizes;
use crate::entity::size::Size;
use crate::errors::ReconcileError;

/// Shared view of what a `MemoryEngine` did, kept after the tree takes ownership
#[derive(Debug, Default, Clone)]
pub struct EngineLog {
    pub executed: Rc<RefCell<Vec<String>>>,
    pub teardowns: Rc<RefCell<Vec<String>>>,
    pub swaps: Rc<RefCell<Vec<String>>>,
}

impl EngineLog {
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    pub fn teardowns(&self) -> Vec<String> {
        self.teardowns.borrow().clone()
    }

    pub fn swaps(&self) -> Vec<String> {
        self.swaps.borrow().clone()
    }
}

#[derive(Debug, Default)]
pub struct MemoryEngine {
    pub log: EngineLog,
    /// Fail the n-th executed action
    pub fail_at: Option<usize>,
    /// Paths reported as carrying an unknown signature
    pub signatures: HashSet<String>,
    /// Format types whose tools are missing
    pub missing_tools: HashSet<String>,
    uuids: usize,
}

impl MemoryEngine {
    pub fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Default::default()
        }
    }
}

impl Engine for MemoryEngine {
    fn execute(&mut self, action: &PendingAction) -> Result<Option<String>, ReconcileError> {
        let n = self.log.executed.borrow().len();
        if self.fail_at == Some(n) {
            return Err(ReconcileError::CmdFailed {
                error: None,
                context: format!("simulated failure of {}", action.kind.as_str()),
            });
        }

        self.log.executed.borrow_mut().push(format!(
            "{} {} {}",
            action.kind.as_str(),
            action.format.type_name().unwrap_or("-"),
            action.device.path
        ));

        if action.kind == ActionKind::CreateFormat && !action.format.is_none() {
            self.uuids += 1;
            return Ok(Some(format!("uuid-{}", self.uuids)));
        }

        Ok(None)
    }

    fn teardown_format(&mut self, device: &Device) -> Result<(), ReconcileError> {
        self.log.teardowns.borrow_mut().push(device.path.clone());
        Ok(())
    }

    fn activate_swap(&mut self, device: &Device) -> Result<(), ReconcileError> {
        self.log.swaps.borrow_mut().push(device.path.clone());
        Ok(())
    }

    fn format_supported(&self, kind: &FormatKind) -> bool {
        match kind {
            FormatKind::Fs(t) => !self.missing_tools.contains(t),
            _ => true,
        }
    }

    fn has_signature(&self, device: &Device) -> bool {
        self.signatures.contains(&device.path)
    }
}

pub fn disk(name: &str, size: u64) -> Device {
    Device {
        id: DeviceId(0),
        name: name.to_string(),
        path: format!("/dev/{name}"),
        aliases: Vec::new(),
        kind: DeviceKind::Disk,
        parents: Vec::new(),
        size: Size(size),
        format: Format::none(),
        exists: true,
    }
}

/// Builds a tree of existing devices. Ids are assigned in insertion order.
#[derive(Default)]
pub struct TreeBuilder {
    devices: Vec<Device>,
    engine: MemoryEngine,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: MemoryEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn add(&mut self, mut device: Device) -> DeviceId {
        let id = DeviceId(self.devices.len());
        device.id = id;
        self.devices.push(device);
        id
    }

    pub fn device_mut(&mut self, id: DeviceId) -> &mut Device {
        &mut self.devices[id.0]
    }

    pub fn disk(&mut self, name: &str, size: u64, format: Format) -> DeviceId {
        let mut device = disk(name, size);
        device.format = format;
        self.add(device)
    }

    pub fn partition(&mut self, disk: DeviceId, number: u32, size: u64, format: Format) -> DeviceId {
        let parent = &self.devices[disk.0];
        let name = crate::linux::partition_name(&parent.name, number);
        let path = crate::linux::partition_name(&parent.path, number);

        self.add(Device {
            id: DeviceId(0),
            name,
            path,
            aliases: Vec::new(),
            kind: DeviceKind::Partition { number },
            parents: vec![disk],
            size: Size(size),
            format,
            exists: true,
        })
    }

    pub fn pv_on(&mut self, id: DeviceId) -> DeviceId {
        self.devices[id.0].format = Format::new(FormatKind::LvmPv).existing(None);
        id
    }

    /// Formats `id` as LUKS and opens it, returning the mapping
    pub fn luks_on(&mut self, id: DeviceId, format: Format) -> DeviceId {
        let raw = &mut self.devices[id.0];
        let map_name = format!("luks-{}", raw.name);
        let params = LuksParams {
            version: "luks2".to_string(),
            map_name: map_name.clone(),
            ..Default::default()
        };
        let size = raw.size - params.header_size();
        raw.format = Format::new(FormatKind::Luks(params)).existing(None);

        self.add(Device {
            id: DeviceId(0),
            name: map_name.clone(),
            path: format!("/dev/mapper/{map_name}"),
            aliases: Vec::new(),
            kind: DeviceKind::Luks,
            parents: vec![id],
            size,
            format,
            exists: true,
        })
    }

    pub fn vg(&mut self, name: &str, pvs: &[DeviceId]) -> DeviceId {
        let pe_size = Size(sizes::LVM_PE_SIZE);
        let size = pvs
            .iter()
            .map(|pv| (self.devices[pv.0].size - Size(sizes::LVM_PV_METADATA)).round_down(pe_size))
            .sum();

        self.add(Device {
            id: DeviceId(0),
            name: name.to_string(),
            path: format!("/dev/{name}"),
            aliases: Vec::new(),
            kind: DeviceKind::LvmVg { pe_size },
            parents: pvs.to_vec(),
            size,
            format: Format::none(),
            exists: true,
        })
    }

    pub fn lv(&mut self, vg: DeviceId, name: &str, size: u64, format: Format) -> DeviceId {
        self.lv_kind(vg, name, size, LvKind::Linear, format)
    }

    /// `parent` is the VG, or the pool LV for thin and VDO volumes
    pub fn lv_kind(
        &mut self,
        parent: DeviceId,
        name: &str,
        size: u64,
        kind: LvKind,
        format: Format,
    ) -> DeviceId {
        let vg_name = match &self.devices[parent.0].kind {
            DeviceKind::LvmLv { vg, .. } => vg.clone(),
            _ => self.devices[parent.0].name.clone(),
        };

        let dm_name = format!("{}-{}", dm_escape(&vg_name), dm_escape(name));

        self.add(Device {
            id: DeviceId(0),
            name: dm_name.clone(),
            path: format!("/dev/mapper/{dm_name}"),
            aliases: Vec::new(),
            kind: DeviceKind::LvmLv {
                vg: vg_name,
                lv: name.to_string(),
                kind,
                cache: None,
            },
            parents: vec![parent],
            size: Size(size),
            format,
            exists: true,
        })
    }

    pub fn md(&mut self, name: &str, level: RaidLevel, members: &[DeviceId], format: Format) -> DeviceId {
        for member in members {
            self.devices[member.0].format = Format::new(FormatKind::MdMember).existing(None);
        }

        let member_size = members
            .iter()
            .map(|m| self.devices[m.0].size)
            .min()
            .unwrap_or_default()
            - Size(sizes::MD_SUPERBLOCK);

        self.add(Device {
            id: DeviceId(0),
            name: name.to_string(),
            path: format!("/dev/md/{name}"),
            aliases: Vec::new(),
            kind: DeviceKind::Md {
                level,
                active: members.len() as u32,
                spare: 0,
                chunk_size: None,
                metadata: None,
            },
            parents: members.to_vec(),
            size: level.data_size(member_size, members.len() as u32),
            format,
            exists: true,
        })
    }

    pub fn build(self) -> DeviceTree {
        self.build_with_log().0
    }

    pub fn build_with_log(self) -> (DeviceTree, EngineLog) {
        let log = self.engine.log.clone();
        let mut tree = DeviceTree::new(Box::new(self.engine));

        for device in self.devices {
            tree.add_existing(device);
        }

        (tree, log)
    }
}
