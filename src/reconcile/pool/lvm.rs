use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::info;

use super::{PoolKindOps, PoolReconciler};
use crate::constants::{defaults, sizes};
use crate::devicetree::device::{
    dm_escape, Device, DeviceId, DeviceKind, Format, FormatKind, LvKind, RaidLevel,
};
use crate::devicetree::ops::LvRequest;
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::manifest::gensym;
use crate::manifest::{PoolSpec, State, VolumeSpec};
use crate::reconcile::volume::PoolContext;
use crate::reconcile::{encryption, members, policy, raid};

/// An LVM volume group over whole disks, partitions, md arrays or LUKS mappings
pub(super) struct LvmPool;

impl LvmPool {
    /// Encryption and RAID level of the existing physical volumes
    fn member_layout(r: &PoolReconciler, vg: DeviceId) -> Result<(bool, Option<RaidLevel>), ReconcileError> {
        let mut encrypted = false;
        let mut level = None;

        for &pv in &r.tree.get(vg)?.parents {
            encrypted |= r.tree.get(pv)?.is_luks();

            if let DeviceKind::Md { level: l, .. } = r.tree.get(r.tree.raw_device(pv))?.kind {
                level = Some(l);
            }
        }

        Ok((encrypted, level))
    }

    fn raid_level(spec: &PoolSpec) -> Result<Option<RaidLevel>, ReconcileError> {
        spec.raid
            .raid_level
            .as_deref()
            .map(|level| level.parse::<RaidLevel>())
            .transpose()
    }

    /// Turns a prepared member into a physical volume, encrypting it first if asked
    fn make_pv(r: &mut PoolReconciler, member: DeviceId) -> Result<DeviceId, ReconcileError> {
        let mut pv = member;

        if r.spec.encryption.is_enabled() {
            let name = format!("luks-{}", r.tree.get(member)?.name);
            let params = encryption::luks_params(&r.spec.encryption, &name)?;

            r.tree.format_device(member, Format::new(FormatKind::Luks(params)))?;
            pv = r.tree.new_luks(member, Format::none())?;
        }

        r.tree.format_device(pv, Format::new(FormatKind::LvmPv))?;
        Ok(pv)
    }

    fn existing_lv<'t>(r: &'t PoolReconciler, vg_name: &str, name: &str) -> Option<&'t Device> {
        let path = format!("/dev/mapper/{}-{}", dm_escape(vg_name), dm_escape(name));
        r.tree.resolve(&path).filter(|d| d.lv_kind().is_some())
    }

    /// Picks the thin pool of every thin volume that names none: the one it
    /// already lives in, else the only pool existing or declared by a sibling
    fn assign_thin_pools(
        r: &PoolReconciler,
        vg_name: &str,
        existing: &BTreeMap<String, DeviceId>,
        volumes: &mut [VolumeSpec],
    ) -> Result<(), ReconcileError> {
        let mut candidates: BTreeSet<String> = existing.keys().cloned().collect();
        candidates.extend(
            volumes
                .iter()
                .filter(|v| v.is_thin() && v.state() == State::Present)
                .filter_map(|v| v.thin.thin_pool_name.clone()),
        );

        for volume in volumes.iter_mut().filter(|v| v.is_thin()) {
            if volume.thin.thin_pool_name.is_some() {
                continue;
            }

            let current = Self::existing_lv(r, vg_name, &volume.name)
                .filter(|d| matches!(d.lv_kind(), Some(LvKind::Thin)))
                .and_then(|d| d.parents.first())
                .and_then(|p| r.tree.get(*p).ok())
                .and_then(|p| match &p.kind {
                    DeviceKind::LvmLv { lv, .. } => Some(lv.clone()),
                    _ => None,
                });

            let name = match current {
                Some(name) => name,
                None => match candidates.len() {
                    0 => defaults::THIN_POOL_NAME.to_string(),
                    1 => candidates.iter().next().cloned().unwrap_or_default(),
                    n => {
                        return Err(ReconcileError::ThinPool(format!(
                            "volume '{}' must name its thin pool: '{vg_name}' has {n} thin pools ({})",
                            volume.name,
                            candidates.iter().cloned().collect::<Vec<_>>().join(", ")
                        )))
                    }
                },
            };

            volume.thin.thin_pool_name = Some(name);
        }

        Ok(())
    }

    /// Creates the thin pools named by volumes that do not exist yet. Explicit
    /// sizes are taken first, the rest of the space is split evenly.
    fn create_thin_pools(
        r: &mut PoolReconciler,
        vg: DeviceId,
        ctx: &mut PoolContext,
        volumes: &[VolumeSpec],
    ) -> Result<(), ReconcileError> {
        let vg_device = r.tree.get(vg)?.clone();
        let DeviceKind::LvmVg { pe_size: pe } = vg_device.kind else {
            return Ok(());
        };

        let mut requested: BTreeMap<String, Option<String>> = BTreeMap::new();
        for volume in volumes.iter().filter(|v| v.is_thin() && v.state() == State::Present) {
            let name = volume
                .thin
                .thin_pool_name
                .clone()
                .unwrap_or_else(|| defaults::THIN_POOL_NAME.to_string());

            if ctx.thin_pools.contains_key(&name) {
                continue;
            }

            let size = requested.entry(name).or_default();
            if size.is_none() {
                size.clone_from(&volume.thin.thin_pool_size);
            }
        }

        if requested.is_empty() {
            return Ok(());
        }

        let reserve = vg_device
            .size
            .percent_of(sizes::THIN_META_PERCENT as f64)
            .clamp(Size(sizes::THIN_META_MIN), Size(sizes::THIN_META_MAX))
            .round_up(pe);

        // Space of new regular volumes is not available to thin pools
        let mut planned = Size::ZERO;
        for volume in volumes.iter().filter(|v| !v.is_thin() && v.state() == State::Present) {
            let Some(size) = volume.size.as_deref() else {
                continue;
            };

            if Self::existing_lv(r, &vg_device.name, &volume.name).is_none() {
                planned = planned + policy::resolve_size(size, Some(vg_device.size), pe)?;
            }
        }

        let available = r.tree.free_space(vg)? - reserve * requested.len() as u64 - planned;

        let mut pool_sizes = BTreeMap::new();
        let mut allocated = Size::ZERO;
        for (name, size) in requested.iter() {
            let Some(size) = size else {
                continue;
            };

            let wanted = policy::resolve_size(size, Some(available), pe)?;
            let size = policy::trim_to_fit(wanted, available - allocated, r.config.max_trim_percent)?;

            allocated = allocated + size;
            pool_sizes.insert(name.clone(), size);
        }

        let auto_sized = requested.len() - pool_sizes.len();
        if auto_sized > 0 {
            let share = Size((available - allocated).bytes() / auto_sized as u64).round_down(pe);

            for name in requested.keys().filter(|n| !pool_sizes.contains_key(*n)).cloned().collect::<Vec<_>>() {
                pool_sizes.insert(name, share);
            }
        }

        for (name, size) in pool_sizes {
            if size == Size::ZERO {
                return Err(ReconcileError::ThinPool(format!(
                    "no space left in '{}' for thin pool '{name}'",
                    vg_device.name
                )));
            }

            info!("creating thin pool '{name}' of {size} in '{}'", vg_device.name);
            let id = r.tree.new_lv(
                vg,
                LvRequest {
                    name: name.clone(),
                    size,
                    kind: LvKind::ThinPool { metadata_size: reserve },
                    format: Format::none(),
                    cache: None,
                },
            )?;

            ctx.thin_pools.insert(name, id);
        }

        Ok(())
    }
}

impl PoolKindOps for LvmPool {
    fn lookup(&self, r: &PoolReconciler, _disks: &[DeviceId]) -> Result<Option<DeviceId>, ReconcileError> {
        Ok(r.tree.resolve_id(&format!("/dev/{}", r.spec.name)))
    }

    fn type_matches(&self, device: &Device) -> bool {
        device.is_vg()
    }

    fn introspect(&self, r: &PoolReconciler, device: DeviceId) -> PoolSpec {
        let mut found = PoolSpec::default();

        if let Ok((encrypted, level)) = Self::member_layout(r, device) {
            found.encryption.enabled = Some(encrypted);
            found.raid.raid_level = level.map(|l| l.as_str().to_string());
        }

        found
    }

    fn member_change(&self, r: &PoolReconciler, device: DeviceId) -> Result<bool, ReconcileError> {
        let (encrypted, level) = Self::member_layout(r, device)?;

        Ok(encrypted != r.spec.encryption.is_enabled() || level != Self::raid_level(&r.spec)?)
    }

    fn create(&self, r: &mut PoolReconciler, disks: &[DeviceId]) -> Result<DeviceId, ReconcileError> {
        let mut prepared = Vec::with_capacity(disks.len());
        for &disk in disks {
            prepared.push(members::prepare_member(r.tree, r.config, disk)?);
        }

        if Self::raid_level(&r.spec)?.is_some() {
            for &member in &prepared {
                r.tree.format_device(member, Format::new(FormatKind::MdMember))?;
            }

            let request = raid::md_request(&format!("{}-1", r.spec.name), &r.spec.raid, prepared)?;
            prepared = vec![r.tree.new_md(request)?];
        }

        let mut pvs = Vec::with_capacity(prepared.len());
        for member in prepared {
            pvs.push(Self::make_pv(r, member)?);
        }

        r.tree.new_vg(&r.spec.name, &pvs)
    }

    fn manage_members(
        &self,
        r: &mut PoolReconciler,
        device: DeviceId,
        disks: &[DeviceId],
    ) -> Result<(), ReconcileError> {
        // Array membership is fixed at creation
        if Self::raid_level(&r.spec)?.is_some() || r.spec.disks.is_empty() {
            return Ok(());
        }

        let attached: Vec<(DeviceId, Vec<DeviceId>)> = r
            .tree
            .get(device)?
            .parents
            .iter()
            .map(|pv| (*pv, r.member_disks(*pv)))
            .collect();

        for &disk in disks {
            if attached.iter().any(|(_, backing)| backing.contains(&disk)) {
                continue;
            }

            info!("adding disk {} to pool '{}'", r.tree.get(disk)?.path, r.spec.name);
            let member = members::prepare_member(r.tree, r.config, disk)?;
            let pv = Self::make_pv(r, member)?;
            r.tree.add_member(device, pv)?;
        }

        for (pv, backing) in attached {
            if backing.iter().any(|d| disks.contains(d)) {
                continue;
            }

            let path = r.tree.get(pv)?.path.clone();
            if r.config.safe_mode {
                return Err(ReconcileError::SafeMode(format!(
                    "cannot remove member '{path}' from pool '{}' in safe mode",
                    r.spec.name
                )));
            }

            info!("removing member {path} from pool '{}'", r.spec.name);
            r.tree.remove_member(device, pv)?;

            for disk in backing {
                r.tree.recursive_remove(disk, false)?;
            }
        }

        Ok(())
    }

    fn prepare_volumes(
        &self,
        r: &mut PoolReconciler,
        ctx: &mut PoolContext,
        volumes: &mut [VolumeSpec],
    ) -> Result<(), ReconcileError> {
        let Some(vg) = ctx.device else {
            return Ok(());
        };

        let mut used: HashSet<String> = volumes
            .iter()
            .filter(|v| !v.name.is_empty())
            .map(|v| v.name.clone())
            .collect();

        for volume in volumes.iter_mut().filter(|v| v.name.is_empty()) {
            let name = gensym::unique_name(&gensym::lv_name_base(volume), &used);
            info!("naming unnamed volume of pool '{}' '{name}'", r.spec.name);

            used.insert(name.clone());
            volume.name = name;
        }

        if !volumes.iter().any(|v| v.is_thin()) {
            return Ok(());
        }

        let vg_name = r.tree.get(vg)?.name.clone();
        let existing: BTreeMap<String, DeviceId> = r
            .tree
            .children(vg)
            .into_iter()
            .filter_map(|id| match &r.tree.get(id).ok()?.kind {
                DeviceKind::LvmLv {
                    lv,
                    kind: LvKind::ThinPool { .. },
                    ..
                } => Some((lv.clone(), id)),
                _ => None,
            })
            .collect();

        Self::assign_thin_pools(r, &vg_name, &existing, volumes)?;
        ctx.thin_pools.extend(existing);

        Self::create_thin_pools(r, vg, ctx, volumes)
    }

    fn removes_device(&self) -> bool {
        true
    }
}
