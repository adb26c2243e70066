use std::collections::BTreeSet;

use super::config::ReconcileConfig;
use crate::constants::{defaults, packages, FS_PACKAGES};
use crate::manifest::{Manifest, PoolType, VolumeSpec, VolumeType};

fn volume_packages(
    volume: &VolumeSpec,
    pool_type: Option<PoolType>,
    config: &ReconcileConfig,
    required: &mut BTreeSet<String>,
) {
    let kind = volume
        .volume_type
        .as_deref()
        .and_then(|t| t.parse::<VolumeType>().ok())
        .or(pool_type.map(VolumeType::from));

    match kind {
        Some(VolumeType::Lvm) => {
            required.insert(packages::LVM.to_string());
        }
        Some(VolumeType::Raid) => {
            required.insert(packages::MDADM.to_string());
        }
        _ => {}
    }

    if volume.encryption.is_enabled() {
        required.insert(packages::CRYPTSETUP.to_string());
    }

    if volume.is_cached() {
        required.insert(packages::LVM.to_string());
    }

    if volume.is_thin() {
        required.insert(packages::THIN.to_string());
    }

    if volume.is_vdo() {
        required.extend(packages::VDO.iter().map(|p| p.to_string()));
    }

    let fs_type = volume
        .fs_type
        .as_deref()
        .or(config.volume_defaults.fs_type.as_deref())
        .unwrap_or(defaults::FS_TYPE);

    if let Some((_, package)) = FS_PACKAGES.iter().find(|(fs, _)| *fs == fs_type) {
        required.insert(package.to_string());
    }
}

/// Host packages needed to manage the declared layout, sorted and unique
pub fn required_packages(manifest: &Manifest, config: &ReconcileConfig) -> Vec<String> {
    let mut required = BTreeSet::new();

    for pool in &manifest.pools {
        let pool_type = pool
            .pool_type
            .as_deref()
            .or(config.pool_defaults.pool_type.as_deref())
            .and_then(|t| t.parse::<PoolType>().ok())
            .unwrap_or(PoolType::Lvm);

        if pool_type == PoolType::Lvm {
            required.insert(packages::LVM.to_string());
        }

        if pool.raid.raid_level.is_some() {
            required.insert(packages::MDADM.to_string());
        }

        if pool.encryption.is_enabled() {
            required.insert(packages::CRYPTSETUP.to_string());
        }

        for volume in &pool.volumes {
            volume_packages(volume, Some(pool_type), config, &mut required);
        }
    }

    for volume in &manifest.volumes {
        volume_packages(volume, None, config, &mut required);
    }

    required.into_iter().collect()
}
