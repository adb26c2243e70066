use tracing::info;

use super::{VolumeKindOps, VolumeReconciler};
use crate::constants::defaults;
use crate::devicetree::device::{dm_escape, Device, DeviceId, DeviceKind, Format, LvCache, LvKind};
use crate::devicetree::ops::LvRequest;
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::reconcile::policy;

/// A logical volume in the pool's volume group, or in one of its thin pools
pub(super) struct LvmVolume;

impl LvmVolume {
    fn vg(r: &VolumeReconciler) -> Result<(DeviceId, Size), ReconcileError> {
        let vg = r.pool_device()?;
        match r.tree.get(vg)?.kind {
            DeviceKind::LvmVg { pe_size } => Ok((vg, pe_size)),
            _ => Err(ReconcileError::Bug(format!(
                "parent of volume '{}' is not a volume group",
                r.spec.name
            ))),
        }
    }

    fn thin_pool(r: &VolumeReconciler) -> Result<DeviceId, ReconcileError> {
        let name = r
            .spec
            .thin
            .thin_pool_name
            .as_deref()
            .unwrap_or(defaults::THIN_POOL_NAME);

        r.pool()?
            .thin_pools
            .get(name)
            .copied()
            .ok_or(ReconcileError::ThinPool(format!(
                "thin pool '{name}' of volume '{}' not found",
                r.spec.name
            )))
    }

    fn cache(r: &VolumeReconciler) -> Result<Option<LvCache>, ReconcileError> {
        if !r.spec.is_cached() {
            return Ok(None);
        }

        let (vg, pe) = Self::vg(r)?;
        let size = r.spec.cache.cache_size.as_deref().ok_or(ReconcileError::InvalidSize(format!(
            "cached volume '{}' requires cache_size",
            r.spec.name
        )))?;

        let devices = r
            .spec
            .cache
            .cache_devices
            .iter()
            .map(|name| {
                r.tree
                    .resolve(name)
                    .map(|d| d.path.clone())
                    .ok_or(ReconcileError::UnresolvedDisk(format!(
                        "unable to resolve cache device '{name}' of volume '{}'",
                        r.spec.name
                    )))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(LvCache {
            size: policy::resolve_size(size, Some(r.tree.get(vg)?.size), pe)?,
            mode: r
                .spec
                .cache
                .cache_mode
                .clone()
                .unwrap_or_else(|| defaults::CACHE_MODE.to_string()),
            devices,
        }))
    }

    fn create_vdo(r: &mut VolumeReconciler, vg: DeviceId, pe: Size) -> Result<DeviceId, ReconcileError> {
        let virtual_size = r.spec.size.as_deref().ok_or(ReconcileError::InvalidSize(format!(
            "vdo volume '{}' requires a size",
            r.spec.name
        )))?;
        let virtual_size = policy::resolve_size(virtual_size, Some(r.tree.get(vg)?.size), pe)?;

        let pool_size = match r.spec.vdo.vdo_pool_size.as_deref() {
            Some(size) => {
                let requested = policy::resolve_size(size, Some(r.tree.get(vg)?.size), pe)?;
                let free = r.tree.free_space(vg)?.round_down(pe);
                policy::trim_to_fit(requested, free, r.config.max_trim_percent)?
            }
            None => r.new_size(r.tree.free_space(vg)?)?,
        };

        let pool = r.tree.new_lv(
            vg,
            LvRequest {
                name: format!("{}_vdopool", r.spec.name),
                size: pool_size,
                kind: LvKind::VdoPool {
                    deduplication: r.spec.vdo.deduplication.unwrap_or(true),
                    compression: r.spec.vdo.compression.unwrap_or(true),
                },
                format: Format::none(),
                cache: None,
            },
        )?;

        r.tree.new_lv(
            pool,
            LvRequest {
                name: r.spec.name.clone(),
                size: virtual_size,
                kind: LvKind::Vdo,
                format: Format::none(),
                cache: None,
            },
        )
    }
}

impl VolumeKindOps for LvmVolume {
    fn lookup(&self, r: &VolumeReconciler) -> Result<Option<DeviceId>, ReconcileError> {
        let Some(vg) = r.pool()?.device else {
            return Ok(None);
        };

        let vg_name = &r.tree.get(vg)?.name;
        let dm_name = format!("{}-{}", dm_escape(vg_name), dm_escape(&r.declared.name));

        Ok(r.tree.resolve_id(&format!("/dev/mapper/{dm_name}")))
    }

    fn type_matches(&self, device: &Device) -> bool {
        !matches!(
            device.lv_kind(),
            None | Some(LvKind::ThinPool { .. }) | Some(LvKind::VdoPool { .. })
        )
    }

    fn create(&self, r: &mut VolumeReconciler) -> Result<DeviceId, ReconcileError> {
        let (vg, pe) = Self::vg(r)?;

        if r.spec.is_vdo() {
            info!("creating vdo volume '{}'", r.spec.name);
            return Self::create_vdo(r, vg, pe);
        }

        let cache = Self::cache(r)?;
        let (parent, kind, available) = match r.spec.is_thin() {
            true => {
                let pool = Self::thin_pool(r)?;
                (pool, LvKind::Thin, r.tree.free_space(pool)?)
            }
            false => {
                let kind = match r.spec.raid.raid_level.as_deref() {
                    Some(level) => LvKind::Raid { level: level.parse()? },
                    None => LvKind::Linear,
                };

                let reserved = cache.as_ref().map(|c| c.size).unwrap_or_default();
                (vg, kind, r.tree.free_space(vg)? - reserved)
            }
        };

        let request = LvRequest {
            name: r.spec.name.clone(),
            size: r.new_size(available)?,
            kind,
            format: Format::none(),
            cache,
        };

        info!("creating logical volume '{}' of {}", request.name, request.size);
        r.tree.new_lv(parent, request)
    }

    fn size_base(&self, r: &VolumeReconciler) -> Result<(Option<Size>, Size), ReconcileError> {
        let (vg, pe) = Self::vg(r)?;
        let base = match r.spec.is_thin() {
            true => r.tree.get(Self::thin_pool(r)?)?.size,
            false => r.tree.get(vg)?.size,
        };

        Ok((Some(base), pe))
    }

    fn manage_cache(&self, r: &mut VolumeReconciler, device: DeviceId) -> Result<(), ReconcileError> {
        let current = match &r.tree.get(device)?.kind {
            DeviceKind::LvmLv { cache, .. } => cache.is_some(),
            _ => return Ok(()),
        };

        match (r.spec.is_cached(), current) {
            (true, false) => {
                let Some(cache) = Self::cache(r)? else {
                    return Ok(());
                };

                info!("attaching {} cache to volume '{}'", cache.size, r.spec.name);
                r.tree.attach_cache(device, cache)
            }
            (false, true) => {
                info!("detaching cache from volume '{}'", r.spec.name);
                r.tree.detach_cache(device)
            }
            _ => Ok(()),
        }
    }
}
