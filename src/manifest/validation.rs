use std::collections::{BTreeSet, HashSet};

use super::{Manifest, PoolSpec, PoolType, VolumeSpec, VolumeType};
use crate::entity::size::SizeSpec;
use crate::errors::ReconcileError;

/// Moves top-level volumes that reference a declared pool into that pool
pub fn normalize(mut manifest: Manifest) -> Result<Manifest, ReconcileError> {
    let volumes = std::mem::take(&mut manifest.volumes);

    for volume in volumes {
        let Some(pool_name) = volume.pool.clone() else {
            manifest.volumes.push(volume);
            continue;
        };

        let pool = manifest
            .pools
            .iter_mut()
            .find(|p| p.name == pool_name)
            .ok_or(ReconcileError::PoolNotFound(format!(
                "failed to find pool '{pool_name}' for volume '{}'",
                volume.name
            )))?;

        pool.volumes.push(volume);
    }

    Ok(manifest)
}

pub fn validate(manifest: &Manifest) -> Result<(), ReconcileError> {
    check_duplicates(manifest)?;

    if let Some(percent) = manifest.max_trim_percent {
        if !(0.0..100.0).contains(&percent) {
            return Err(ReconcileError::BadManifest(format!(
                "max_trim_percent must be within [0, 100), got {percent}"
            )));
        }
    }

    for pool in &manifest.pools {
        validate_pool(pool)?;
    }

    for volume in &manifest.volumes {
        validate_volume(volume, None)?;
    }

    Ok(())
}

fn duplicates<'a, I>(names: I) -> BTreeSet<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| !name.is_empty())
        .filter(|name| !seen.insert(*name))
        .collect()
}

fn join(names: &BTreeSet<&str>) -> String {
    names.iter().copied().collect::<Vec<_>>().join(", ")
}

fn check_duplicates(manifest: &Manifest) -> Result<(), ReconcileError> {
    let pools = duplicates(manifest.pools.iter().map(|p| p.name.as_str()));
    if !pools.is_empty() {
        return Err(ReconcileError::DuplicateName(format!(
            "multiple pools with the same name: {}",
            join(&pools)
        )));
    }

    for pool in &manifest.pools {
        let volumes = duplicates(pool.volumes.iter().map(|v| v.name.as_str()));
        if !volumes.is_empty() {
            return Err(ReconcileError::DuplicateName(format!(
                "multiple volumes in pool '{}' with the same name: {}",
                pool.name,
                join(&volumes)
            )));
        }
    }

    let volumes = duplicates(manifest.volumes.iter().map(|v| v.name.as_str()));
    if !volumes.is_empty() {
        return Err(ReconcileError::DuplicateName(format!(
            "multiple volumes with the same name: {}",
            join(&volumes)
        )));
    }

    Ok(())
}

fn validate_pool(pool: &PoolSpec) -> Result<(), ReconcileError> {
    const MSG: &str = "pool validation failed";

    // Untyped pools are lvm pools
    let pool_type = match &pool.pool_type {
        Some(t) => Some(t.parse::<PoolType>()?),
        None => Some(PoolType::Lvm),
    };

    if let Some(version) = &pool.encryption.luks_version {
        check_luks_version(version)?;
    }

    if pool_type == Some(PoolType::Partition) && pool.raid.raid_level.is_some() {
        return Err(ReconcileError::BadManifest(format!(
            "{MSG}: raid_level is not supported for partition pool '{}'",
            pool.name
        )));
    }

    for volume in &pool.volumes {
        if let Some(owner) = &volume.pool {
            if owner != &pool.name {
                return Err(ReconcileError::BadManifest(format!(
                    "{MSG}: volume '{}' declared in pool '{}' references pool '{owner}'",
                    volume.name, pool.name
                )));
            }
        }

        validate_volume(volume, pool_type)?;
    }

    Ok(())
}

fn validate_volume(volume: &VolumeSpec, pool_type: Option<PoolType>) -> Result<(), ReconcileError> {
    const MSG: &str = "volume validation failed";

    let name = &volume.name;
    let volume_type = match &volume.volume_type {
        Some(t) => Some(t.parse::<VolumeType>()?),
        None => None,
    };

    if let Some(size) = &volume.size {
        SizeSpec::parse(size)?;
    }

    if let Some(version) = &volume.encryption.luks_version {
        check_luks_version(version)?;
    }

    if let Some(mode) = &volume.cache.cache_mode {
        if !matches!(mode.as_str(), "writethrough" | "writeback") {
            return Err(ReconcileError::BadManifest(format!(
                "{MSG}: unknown cache mode '{mode}' for volume '{name}'"
            )));
        }
    }

    if let Some(mnt) = &volume.mount_point {
        if !mnt.starts_with('/') && !matches!(mnt.as_str(), "none" | "swap") {
            return Err(ReconcileError::BadManifest(format!(
                "{MSG}: mount point '{mnt}' of volume '{name}' is not absolute"
            )));
        }
    }

    let lvm_only = volume.is_thin() || volume.is_cached() || volume.is_vdo();
    let in_lvm = pool_type.map_or(true, |t| t == PoolType::Lvm)
        && volume_type.map_or(true, |t| t == VolumeType::Lvm);

    if lvm_only && (!in_lvm || pool_type.is_none()) {
        return Err(ReconcileError::BadManifest(format!(
            "{MSG}: thin, cache and vdo options of volume '{name}' require an lvm pool"
        )));
    }

    if volume.is_thin() && volume.is_vdo() {
        return Err(ReconcileError::BadManifest(format!(
            "{MSG}: volume '{name}' can not be both thin and vdo"
        )));
    }

    if volume.is_thin() && volume.raid.raid_level.is_some() {
        return Err(ReconcileError::BadManifest(format!(
            "{MSG}: thin volume '{name}' can not have a raid level"
        )));
    }

    match (pool_type, volume_type) {
        (None, None) => Err(ReconcileError::BadManifest(format!(
            "{MSG}: standalone volume '{name}' must declare its type"
        ))),

        (None, Some(VolumeType::Disk)) | (None, Some(VolumeType::Raid))
            if volume.disks.is_empty() =>
        {
            Err(ReconcileError::NoDisks(format!(
                "{MSG}: volume '{name}' has no disks"
            )))
        }

        (None, Some(VolumeType::Raid)) if volume.raid.raid_level.is_none() => {
            Err(ReconcileError::BadManifest(format!(
                "{MSG}: raid volume '{name}' requires raid_level"
            )))
        }

        (None, Some(VolumeType::Lvm)) | (None, Some(VolumeType::Partition)) => {
            Err(ReconcileError::BadManifest(format!(
                "{MSG}: volume '{name}' of this type must belong to a pool"
            )))
        }

        (Some(pool_type), Some(volume_type)) if VolumeType::from(pool_type) != volume_type => {
            Err(ReconcileError::BadManifest(format!(
                "{MSG}: volume '{name}' of type {volume_type:?} can not live in a {pool_type:?} pool"
            )))
        }

        (Some(PoolType::Partition), _) if volume.raid.raid_level.is_some() => {
            Err(ReconcileError::BadManifest(format!(
                "{MSG}: partition volume '{name}' can not have a raid level"
            )))
        }

        _ => Ok(()),
    }
}

fn check_luks_version(version: &str) -> Result<(), ReconcileError> {
    match version {
        "luks1" | "luks2" => Ok(()),
        _ => Err(ReconcileError::BadManifest(format!(
            "unknown luks version '{version}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::manifest::{CacheSpec, ThinSpec, VdoSpec};

    fn volume(name: &str) -> VolumeSpec {
        VolumeSpec {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn pool(name: &str, volumes: Vec<VolumeSpec>) -> PoolSpec {
        PoolSpec {
            name: name.to_string(),
            pool_type: Some("lvm".to_string()),
            disks: vec!["sdb".to_string()],
            volumes,
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicates() {
        let manifest = Manifest {
            pools: vec![pool("a", vec![]), pool("b", vec![]), pool("a", vec![])],
            ..Default::default()
        };
        assert_matches!(
            validate(&manifest),
            Err(ReconcileError::DuplicateName(msg)) if msg.contains(": a")
        );

        let manifest = Manifest {
            pools: vec![pool("a", vec![volume("x"), volume("y"), volume("x")])],
            ..Default::default()
        };
        assert_matches!(validate(&manifest), Err(ReconcileError::DuplicateName(msg)) if msg.contains("'a'"));

        let mut standalone = volume("d");
        standalone.volume_type = Some("disk".to_string());
        standalone.disks = vec!["sdc".to_string()];
        let manifest = Manifest {
            volumes: vec![standalone.clone(), standalone],
            ..Default::default()
        };
        assert_matches!(validate(&manifest), Err(ReconcileError::DuplicateName(_)));

        // Same volume name in two pools is fine
        let manifest = Manifest {
            pools: vec![pool("a", vec![volume("x")]), pool("b", vec![volume("x")])],
            ..Default::default()
        };
        assert!(validate(&manifest).is_ok());
    }

    #[test]
    fn test_argument_combinations() {
        struct Test {
            case: &'static str,
            pool_type: Option<&'static str>,
            volume: VolumeSpec,
            ok: bool,
        }

        let mut thin = volume("thin");
        thin.thin = ThinSpec {
            thin: Some(true),
            ..Default::default()
        };

        let mut thin_vdo = thin.clone();
        thin_vdo.vdo = VdoSpec {
            compression: Some(true),
            ..Default::default()
        };

        let mut cached = volume("cached");
        cached.cache = CacheSpec {
            cached: Some(true),
            cache_mode: Some("writeback".to_string()),
            ..Default::default()
        };

        let mut bad_cache_mode = cached.clone();
        bad_cache_mode.cache.cache_mode = Some("writearound".to_string());

        let mut bad_size = volume("bad");
        bad_size.size = Some("ten gigs".to_string());

        let mut relative_mount = volume("rel");
        relative_mount.mount_point = Some("data".to_string());

        let mut raid_partition = volume("raidpart");
        raid_partition.raid.raid_level = Some("raid1".to_string());

        let mut raid_no_disks = volume("md");
        raid_no_disks.volume_type = Some("raid".to_string());
        raid_no_disks.raid.raid_level = Some("raid1".to_string());

        let mut unknown_type = volume("odd");
        unknown_type.volume_type = Some("stratis".to_string());

        let tests = vec![
            Test {
                case: "thin in lvm pool",
                pool_type: Some("lvm"),
                volume: thin.clone(),
                ok: true,
            },
            Test {
                case: "thin in partition pool",
                pool_type: Some("partition"),
                volume: thin,
                ok: false,
            },
            Test {
                case: "thin and vdo",
                pool_type: Some("lvm"),
                volume: thin_vdo,
                ok: false,
            },
            Test {
                case: "cached lvm volume",
                pool_type: Some("lvm"),
                volume: cached,
                ok: true,
            },
            Test {
                case: "bad cache mode",
                pool_type: Some("lvm"),
                volume: bad_cache_mode,
                ok: false,
            },
            Test {
                case: "bad size",
                pool_type: Some("lvm"),
                volume: bad_size,
                ok: false,
            },
            Test {
                case: "relative mount point",
                pool_type: Some("lvm"),
                volume: relative_mount,
                ok: false,
            },
            Test {
                case: "raid level on partition volume",
                pool_type: Some("partition"),
                volume: raid_partition,
                ok: false,
            },
            Test {
                case: "standalone raid without disks",
                pool_type: None,
                volume: raid_no_disks,
                ok: false,
            },
            Test {
                case: "unknown volume type",
                pool_type: Some("lvm"),
                volume: unknown_type,
                ok: false,
            },
        ];

        for test in tests {
            let manifest = match test.pool_type {
                Some(t) => {
                    let mut p = pool("p", vec![test.volume]);
                    p.pool_type = Some(t.to_string());
                    Manifest {
                        pools: vec![p],
                        ..Default::default()
                    }
                }
                None => Manifest {
                    volumes: vec![test.volume],
                    ..Default::default()
                },
            };

            let result = validate(&manifest);
            assert_eq!(test.ok, result.is_ok(), "case '{}': {result:?}", test.case);
        }
    }

    #[test]
    fn test_normalize() {
        let mut standalone = volume("data");
        standalone.pool = Some("apppool".to_string());

        let manifest = Manifest {
            pools: vec![pool("apppool", vec![])],
            volumes: vec![standalone.clone()],
            ..Default::default()
        };

        let manifest = normalize(manifest).expect("failed to normalize");
        assert!(manifest.volumes.is_empty());
        assert_eq!("data", manifest.pools[0].volumes[0].name);

        let manifest = Manifest {
            volumes: vec![standalone],
            ..Default::default()
        };
        assert_matches!(normalize(manifest), Err(ReconcileError::PoolNotFound(_)));
    }
}
