//! Per-volume reconciliation: lookup, destroy or create, encryption,
//! cache, format and size, dispatched over the volume kinds

mod disk;
mod lvm;
mod partition;
mod raid;

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::config::ReconcileConfig;
use super::encryption;
use super::policy;
use crate::constants::defaults;
use crate::devicetree::device::{Device, DeviceId, DeviceKind};
use crate::devicetree::DeviceTree;
use crate::entity::outcome::VolumeOutcome;
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::manifest::defaults::Merge;
use crate::manifest::{EncryptionSpec, PoolSpec, PoolType, State, VolumeSpec, VolumeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Unresolved,
    Destroying,
    Creating,
    Reformatting,
    Resizing,
    Done,
}

/// What a volume reconciler needs to know about its pool
#[derive(Debug, Clone)]
pub struct PoolContext {
    pub spec: PoolSpec,
    pub kind: PoolType,
    pub device: Option<DeviceId>,
    pub disks: Vec<DeviceId>,
    /// Whether the pool exists at the end of the run
    pub present: bool,
    pub thin_pools: HashMap<String, DeviceId>,
}

/// A reconciled volume, with what the executor needs to compute mounts
#[derive(Debug, Clone)]
pub struct VolumeResult {
    pub outcome: VolumeOutcome,
    /// Top device at the end of planning
    pub device: Option<DeviceId>,
    /// Top device found on the system before planning
    pub prior: Option<DeviceId>,
    pub present: bool,
    /// Whether the prior format is gone
    pub reformatted: bool,
}

/// Behavior that differs between volume kinds
trait VolumeKindOps {
    /// Finds the volume's device by its kind-specific identifier
    fn lookup(&self, r: &VolumeReconciler) -> Result<Option<DeviceId>, ReconcileError>;

    fn type_matches(&self, device: &Device) -> bool;

    fn create(&self, r: &mut VolumeReconciler) -> Result<DeviceId, ReconcileError>;

    /// Size percentages are taken of this, and sizes rounded to the granularity
    fn size_base(&self, r: &VolumeReconciler) -> Result<(Option<Size>, Size), ReconcileError>;

    fn resizable(&self) -> bool {
        true
    }

    fn manage_cache(&self, _r: &mut VolumeReconciler, _device: DeviceId) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Fills volume settings from the kind's defaults
    fn apply_defaults(&self, _r: &mut VolumeReconciler) {}
}

fn ops(kind: VolumeType) -> &'static dyn VolumeKindOps {
    match kind {
        VolumeType::Disk => &disk::DiskVolume,
        VolumeType::Partition => &partition::PartitionVolume,
        VolumeType::Lvm => &lvm::LvmVolume,
        VolumeType::Raid => &raid::RaidVolume,
    }
}

fn builtin_defaults() -> VolumeSpec {
    VolumeSpec {
        fs_type: Some(defaults::FS_TYPE.to_string()),
        mount_options: Some(defaults::MOUNT_OPTIONS.to_string()),
        mount_check: Some(defaults::MOUNT_CHECK),
        mount_passno: Some(defaults::MOUNT_PASSNO),
        state: Some(State::Present),
        encryption: EncryptionSpec {
            enabled: Some(false),
            luks_version: Some(defaults::LUKS_VERSION.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub struct VolumeReconciler<'a> {
    tree: &'a mut DeviceTree,
    config: &'a ReconcileConfig,
    pool: Option<&'a PoolContext>,
    /// Position of the volume in its pool
    index: usize,
    kind: VolumeType,
    /// Declared settings with all defaults applied
    spec: VolumeSpec,
    declared: VolumeSpec,
    state: VolumeState,
}

impl<'a> VolumeReconciler<'a> {
    pub fn new(
        tree: &'a mut DeviceTree,
        config: &'a ReconcileConfig,
        pool: Option<&'a PoolContext>,
        declared: &VolumeSpec,
        index: usize,
    ) -> Result<Self, ReconcileError> {
        let kind = match (&declared.volume_type, pool) {
            (Some(t), _) => t.parse()?,
            (None, Some(pool)) => VolumeType::from(pool.kind),
            (None, None) => {
                return Err(ReconcileError::BadManifest(format!(
                    "standalone volume '{}' must declare its type",
                    declared.name
                )))
            }
        };

        Ok(Self {
            tree,
            config,
            pool,
            index,
            kind,
            spec: declared.clone(),
            declared: declared.clone(),
            state: VolumeState::Unresolved,
        })
    }

    fn pool(&self) -> Result<&'a PoolContext, ReconcileError> {
        self.pool.ok_or(ReconcileError::PoolNotFound(format!(
            "volume '{}' of type {:?} requires a pool",
            self.spec.name, self.kind
        )))
    }

    /// The pool's device, which must exist by the time volumes are reconciled
    fn pool_device(&self) -> Result<DeviceId, ReconcileError> {
        self.pool()?.device.ok_or(ReconcileError::PoolNotFound(format!(
            "failed to find parent device of volume '{}'",
            self.spec.name
        )))
    }

    fn transition(&mut self, next: VolumeState) {
        debug!("volume '{}': {:?} -> {next:?}", self.spec.name, self.state);
        self.state = next;
    }

    fn ultimately_present(&self) -> bool {
        self.spec.state() == State::Present && self.pool.map_or(true, |p| p.present)
    }

    /// Settings read back from the existing device, below explicit settings
    /// but above the configured defaults
    fn introspect(&self, raw: DeviceId) -> VolumeSpec {
        let mut found = VolumeSpec::default();
        let top = self.tree.luks_child(raw).unwrap_or(raw);

        if let Ok(device) = self.tree.get(top) {
            if device.format.is_mountable() || device.format.is_swap() {
                found.fs_type = device.format.type_name().map(String::from);
                found.fs_label = device.format.label.clone();
            }
        }

        if let Ok(device) = self.tree.get(raw) {
            found.encryption.enabled = Some(device.format.luks().is_some());
            if let Some(params) = device.format.luks() {
                found.encryption.luks_version = Some(params.version.clone());
            }

            if let DeviceKind::LvmLv { cache, .. } = &device.kind {
                found.cache.cached = Some(cache.is_some());
            }
        }

        found
    }

    fn apply_defaults(&mut self, raw: Option<DeviceId>) {
        let introspected = raw.map(|r| self.introspect(r)).unwrap_or_default();

        let mut spec = self.declared.clone();
        spec.merge_from(&introspected);
        spec.merge_from(&self.config.volume_defaults);
        spec.merge_from(&builtin_defaults());

        self.spec = spec;
        ops(self.kind).apply_defaults(self);
    }

    fn lookup(&self) -> Result<Option<DeviceId>, ReconcileError> {
        let ops = ops(self.kind);
        let Some(found) = ops.lookup(self)? else {
            return Ok(None);
        };

        let device = self.tree.get(found)?;
        if !ops.type_matches(device) {
            warn!(
                "device {} found for volume '{}' is a {}, not a {:?} volume; creating a new one",
                device.path,
                self.declared.name,
                device.type_name(),
                self.kind
            );

            return Ok(None);
        }

        Ok(Some(found))
    }

    pub fn reconcile(mut self) -> Result<VolumeResult, ReconcileError> {
        let ops = ops(self.kind);

        let raw = self.lookup()?;
        self.apply_defaults(raw);

        let prior = raw.map(|r| self.tree.luks_child(r).unwrap_or(r));
        let prior_format = match prior {
            Some(p) => Some(self.tree.get(p)?.format.clone()),
            None => None,
        };

        let mut result = VolumeResult {
            outcome: VolumeOutcome {
                spec: self.declared.clone(),
                ..Default::default()
            },
            device: None,
            prior,
            present: self.ultimately_present(),
            reformatted: false,
        };

        if !result.present {
            self.transition(VolumeState::Destroying);

            if let (Some(raw), Some(top)) = (raw, prior) {
                result.outcome.device = Some(self.tree.get(top)?.path.clone());
                result.outcome.raw_device = Some(self.tree.get(raw)?.path.clone());
                result.outcome.mount_id = self.tree.mount_id(top);

                let remove_device = !self.tree.get(raw)?.is_disk();
                info!("removing volume '{}'", self.spec.name);
                self.tree.recursive_remove(raw, remove_device)?;
                result.reformatted = true;
            }

            return Ok(result);
        }

        let raw = match raw {
            Some(raw) => raw,
            None => {
                self.transition(VolumeState::Creating);
                ops.create(&mut self)?
            }
        };

        let top = encryption::manage_encryption(
            self.tree,
            raw,
            &self.spec.encryption,
            self.config.safe_mode,
        )?;

        ops.manage_cache(&mut self, raw)?;

        self.transition(VolumeState::Reformatting);
        self.reformat(top)?;

        if let (Some(prior), Some(format)) = (prior, &prior_format) {
            let current = self.tree.contains(prior).then(|| self.tree.get(prior)).transpose()?;
            result.reformatted = match current {
                Some(device) => !device.format.exists || !policy::same_kind(&device.format.kind, &format.kind),
                None => true,
            };
        }

        if prior.is_some() && ops.resizable() {
            self.transition(VolumeState::Resizing);
            self.resize(raw)?;
        }

        self.transition(VolumeState::Done);

        let device = self.tree.get(top)?;
        result.outcome.device = Some(device.path.clone());
        result.outcome.raw_device = Some(self.tree.get(raw)?.path.clone());
        result.outcome.mount_id = self.tree.mount_id(top);
        result.outcome.spec = self.outcome_spec();
        result.device = Some(top);

        Ok(result)
    }

    /// The declared spec with the settings the volume was reconciled with
    fn outcome_spec(&self) -> VolumeSpec {
        let mut spec = self.declared.clone();
        spec.name = self.spec.name.clone();
        spec.fs_type = self.spec.fs_type.clone();
        spec.fs_label = self.spec.fs_label.clone();
        spec.mount_options = self.spec.mount_options.clone();
        spec.mount_check = self.spec.mount_check;
        spec.mount_passno = self.spec.mount_passno;
        spec.encryption.enabled = self.spec.encryption.enabled;
        spec
    }

    fn reformat(&mut self, top: DeviceId) -> Result<(), ReconcileError> {
        let desired = policy::resolve_format(self.tree, &self.spec)?;
        let device = self.tree.get(top)?.clone();
        let current = &device.format;

        if policy::same_kind(&current.kind, &desired.kind) {
            if current.exists && desired.label.is_some() && current.label != desired.label {
                info!("relabeling {} on {}", current.type_name().unwrap_or_default(), device.path);
                self.tree.relabel_format(top, desired.label.as_deref().unwrap_or_default())?;
            }

            return Ok(());
        }

        if self.config.safe_mode && self.tree.has_real_format(top) {
            return Err(ReconcileError::SafeMode(format!(
                "cannot remove existing formatting ({}) on device '{}' of volume '{}' in safe mode",
                current.type_name().unwrap_or("unknown signature"),
                device.path,
                self.spec.name
            )));
        }

        if !self.tree.is_leaf(top) {
            self.tree.recursive_remove(top, false)?;
        }

        self.tree.format_device(top, desired)
    }

    fn resize(&mut self, raw: DeviceId) -> Result<(), ReconcileError> {
        let Some(size) = self.spec.size.clone() else {
            return Ok(());
        };

        let ops = ops(self.kind);
        let (base, granularity) = ops.size_base(self)?;
        let requested = policy::resolve_size(&size, base, granularity)?;
        let current = self.tree.get(raw)?.size;

        if requested == current {
            return Ok(());
        }

        let (min, max) = self.tree.resize_bounds(raw)?;
        let target = match policy::trim_to_fit(requested, max, self.config.max_trim_percent) {
            Err(ReconcileError::InsufficientSpace(_)) => {
                return Err(ReconcileError::ResizeBounds(format!(
                    "volume '{}' can not be resized to {requested}: maximum size is {max}",
                    self.spec.name
                )))
            }
            target => target?,
        };

        if target == current {
            return Ok(());
        }

        if target < min {
            return Err(ReconcileError::ResizeBounds(format!(
                "volume '{}' can not be resized to {target}: minimum size is {min}",
                self.spec.name
            )));
        }

        info!("resizing volume '{}' from {current} to {target}", self.spec.name);
        self.tree.resize(raw, target)
    }

    /// Resolves the declared size for a new device, trimmed to `available`
    fn new_size(&self, available: Size) -> Result<Size, ReconcileError> {
        let size = self.spec.size.as_deref().ok_or(ReconcileError::InvalidSize(format!(
            "volume '{}' requires a size",
            self.spec.name
        )))?;

        let (base, granularity) = ops(self.kind).size_base(self)?;
        let requested = policy::resolve_size(size, base, granularity)?;
        let size = policy::trim_to_fit(requested, available.round_down(granularity), self.config.max_trim_percent)?;

        if size == Size::ZERO {
            return Err(ReconcileError::InsufficientSpace(format!(
                "no space left for volume '{}'",
                self.spec.name
            )));
        }

        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::constants::sizes::{GIB, MIB};
    use crate::devicetree::device::Format;
    use crate::devicetree::testing::TreeBuilder;

    fn disk_volume(fs_type: &str) -> VolumeSpec {
        VolumeSpec {
            name: "scratch".to_string(),
            volume_type: Some("disk".to_string()),
            disks: vec!["sdb".to_string()],
            fs_type: Some(fs_type.to_string()),
            mount_point: Some("/scratch".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_disk_volume() {
        let mut builder = TreeBuilder::new();
        builder.disk("sdb", 10 * GIB, Format::none());
        let mut tree = builder.build();

        let mut config = ReconcileConfig::default();
        config
            .diskvolume_mkfs_option_map
            .insert("ext4".to_string(), "-E nodiscard".to_string());

        let result = VolumeReconciler::new(&mut tree, &config, None, &disk_volume("ext4"), 0)
            .unwrap()
            .reconcile()
            .expect("failed to reconcile disk volume");

        assert_eq!(Some("/dev/sdb"), result.outcome.device.as_deref());
        assert_eq!(1, tree.pending_actions().len());
        assert_eq!(
            Some("-E nodiscard"),
            tree.pending_actions()[0].format.create_options.as_deref()
        );
    }

    #[test]
    fn test_safe_mode_reformat() {
        let mut builder = TreeBuilder::new();
        builder.disk("sdb", 10 * GIB, Format::fs("ext4").existing(Some("u1".to_string())));
        let mut tree = builder.build();
        let config = ReconcileConfig::default();

        let result = VolumeReconciler::new(&mut tree, &config, None, &disk_volume("xfs"), 0)
            .unwrap()
            .reconcile();

        assert_matches!(result, Err(ReconcileError::SafeMode(_)));
        assert!(tree.pending_actions().is_empty());

        // Unchanged format is left alone, even when introspected
        let mut volume = disk_volume("ext4");
        volume.fs_type = None;
        let result = VolumeReconciler::new(&mut tree, &config, None, &volume, 0)
            .unwrap()
            .reconcile()
            .expect("failed to reconcile unchanged volume");

        assert!(tree.pending_actions().is_empty());
        assert!(!result.reformatted);
        assert_eq!(Some("UUID=u1"), result.outcome.mount_id.as_deref());
    }

    #[test]
    fn test_relabel() {
        let mut builder = TreeBuilder::new();
        builder.disk("sdb", 10 * GIB, Format::fs("ext4").existing(None));
        let mut tree = builder.build();
        let config = ReconcileConfig::default();

        let mut volume = disk_volume("ext4");
        volume.fs_label = Some("scratch".to_string());

        VolumeReconciler::new(&mut tree, &config, None, &volume, 0)
            .unwrap()
            .reconcile()
            .expect("failed to relabel");

        let records: Vec<String> = tree
            .pending_actions()
            .iter()
            .filter_map(|a| a.record())
            .map(|r| r.action)
            .collect();
        assert_eq!(vec!["configure format"], records);
    }

    #[test]
    fn test_resize() {
        struct Test {
            size: &'static str,
            // Resulting size and records, None if out of bounds
            expected: Option<(u64, Vec<&'static str>)>,
        }

        let tests = vec![
            Test {
                size: "5 GiB",
                expected: Some((5 * GIB, vec![])),
            },
            // Trimmed to the free space
            Test {
                size: "10 GiB",
                expected: Some((
                    10 * GIB - 4 * MIB,
                    vec![
                        "resize device /dev/mapper/vg-data",
                        "resize format /dev/mapper/vg-data",
                    ],
                )),
            },
            Test {
                size: "4 GiB",
                expected: Some((
                    4 * GIB,
                    vec![
                        "resize format /dev/mapper/vg-data",
                        "resize device /dev/mapper/vg-data",
                    ],
                )),
            },
            Test {
                size: "20 GiB",
                expected: None,
            },
        ];

        for test in tests {
            let mut builder = TreeBuilder::new();
            let sdb = builder.disk("sdb", 10 * GIB, Format::none());
            let pv = builder.pv_on(sdb);
            let vg = builder.vg("vg", &[pv]);
            let lv = builder.lv(vg, "data", 5 * GIB, Format::fs("ext4").existing(Some("u1".to_string())));
            let mut tree = builder.build();

            let config = ReconcileConfig::default();
            let ctx = PoolContext {
                spec: PoolSpec {
                    name: "vg".to_string(),
                    ..Default::default()
                },
                kind: PoolType::Lvm,
                device: Some(vg),
                disks: vec![sdb],
                present: true,
                thin_pools: HashMap::new(),
            };

            let volume = VolumeSpec {
                name: "data".to_string(),
                size: Some(test.size.to_string()),
                fs_type: Some("ext4".to_string()),
                ..Default::default()
            };

            let result = VolumeReconciler::new(&mut tree, &config, Some(&ctx), &volume, 0)
                .unwrap()
                .reconcile();

            let Some((size, expected)) = test.expected else {
                assert_matches!(result, Err(ReconcileError::ResizeBounds(_)));
                continue;
            };

            assert!(result.is_ok(), "failed to resize to {}", test.size);
            assert_eq!(Size(size), tree.get(lv).unwrap().size);

            let records: Vec<String> = tree
                .pending_actions()
                .iter()
                .filter_map(|a| a.record())
                .map(|r| format!("{} {}", r.action, r.device))
                .collect();
            assert_eq!(expected, records);
        }
    }
}
