//! Reconciles a manifest against the device tree: plans the pool and
//! volume changes, commits them, and reports what happened

pub mod config;
pub mod encryption;
pub mod executor;
pub mod members;
pub mod mounts;
pub mod packages;
pub mod policy;
pub mod pool;
pub mod raid;
pub mod volume;

use tracing::{debug, info};

use self::config::ReconcileConfig;
use self::pool::PoolReconciler;
use self::volume::VolumeReconciler;
use crate::devicetree::fstab::FstabSnapshot;
use crate::devicetree::DeviceTree;
use crate::entity::report::ReconcileResult;
use crate::errors::ReconcileError;
use crate::manifest::{gensym, validation, Manifest};

/// Brings `tree` in line with `manifest`. Pools are reconciled in
/// declaration order, then standalone volumes.
pub fn reconcile(
    manifest: Manifest,
    tree: &mut DeviceTree,
    fstab: &FstabSnapshot,
    config: &ReconcileConfig,
) -> Result<ReconcileResult, ReconcileError> {
    let mut manifest = validation::normalize(manifest)?;

    let existing: Vec<String> = tree
        .devices()
        .filter(|d| d.is_vg())
        .map(|d| d.name.clone())
        .collect();

    gensym::fill_pool_names(&mut manifest, &config.pool_name_base, &existing);
    validation::validate(&manifest)?;

    let packages = packages::required_packages(&manifest, config);
    if config.packages_only {
        info!("packages only: {} required", packages.len());
        return Ok(ReconcileResult {
            packages,
            ..Default::default()
        });
    }

    tree.reset();

    let mut pools = Vec::with_capacity(manifest.pools.len());
    for pool in &manifest.pools {
        debug!("reconciling pool '{}'", pool.name);
        pools.push(PoolReconciler::new(tree, config, pool)?.reconcile()?);
    }

    let mut volumes = Vec::with_capacity(manifest.volumes.len());
    for (index, volume) in manifest.volumes.iter().enumerate() {
        debug!("reconciling volume '{}'", volume.name);
        volumes.push(VolumeReconciler::new(tree, config, None, volume, index)?.reconcile()?);
    }

    info!("{} actions planned", tree.pending_actions().len());
    executor::execute(tree, fstab, config, pools, volumes, packages)
}
