use std::collections::BTreeSet;

use tracing::{debug, info};

use super::config::ReconcileConfig;
use super::mounts;
use super::pool::PoolResult;
use super::volume::VolumeResult;
use crate::devicetree::actions::{ActionKind, PendingAction};
use crate::devicetree::device::DeviceId;
use crate::devicetree::fstab::FstabSnapshot;
use crate::devicetree::DeviceTree;
use crate::entity::report::{CryptEntry, CryptState, ReconcileResult};
use crate::errors::ReconcileError;

/// Unmounts or deactivates existing formats that scheduled destroy
/// and resize actions are about to touch, returning the torn down devices
fn teardown(tree: &mut DeviceTree) -> Result<BTreeSet<DeviceId>, ReconcileError> {
    let mut torn_down = BTreeSet::new();

    let targets: Vec<_> = tree
        .pending_actions()
        .iter()
        .filter(|a| a.kind.is_destroy() || a.kind.is_resize())
        .filter(|a| a.format.exists && (a.format.is_mountable() || a.format.is_swap()))
        .map(|a| {
            let mut device = a.device.clone();
            device.format = a.format.clone();
            device
        })
        .collect();

    for device in targets {
        if !torn_down.insert(device.id) {
            continue;
        }

        debug!("tearing down {} on {}", device.format.type_name().unwrap_or_default(), device.path);
        tree.engine_mut().teardown_format(&device)?;
    }

    Ok(torn_down)
}

fn crypt_entries(actions: &[PendingAction]) -> Vec<CryptEntry> {
    actions
        .iter()
        .filter_map(|action| {
            let params = action.format.luks()?;
            let state = match action.kind {
                ActionKind::CreateFormat => CryptState::Present,
                ActionKind::DestroyFormat => CryptState::Absent,
                _ => return None,
            };

            Some(CryptEntry {
                backing_device: action.device.path.clone(),
                name: params.map_name.clone(),
                password: params.key_file.clone().unwrap_or_else(|| "-".to_string()),
                state,
            })
        })
        .collect()
}

/// Commits the planned actions and assembles the run's result
pub fn execute(
    tree: &mut DeviceTree,
    fstab: &FstabSnapshot,
    config: &ReconcileConfig,
    pools: Vec<PoolResult>,
    mut volumes: Vec<VolumeResult>,
    packages: Vec<String>,
) -> Result<ReconcileResult, ReconcileError> {
    let torn_down = match config.dry_run {
        true => BTreeSet::new(),
        false => teardown(tree)?,
    };

    let mut executed: Vec<PendingAction> = Vec::new();
    let committed = tree.commit(config.dry_run, |action| executed.push(action.clone()));

    let mut pool_results = pools;
    let mut result = ReconcileResult {
        actions: executed.iter().filter_map(PendingAction::record).collect(),
        packages,
        ..Default::default()
    };

    if let Err(err) = committed {
        result.changed = true;
        result.pools = pool_results.into_iter().map(|p| p.outcome).collect();
        result.volumes = volumes.into_iter().map(|v| v.outcome).collect();

        return Err(ReconcileError::CommitFailed {
            error: Box::new(err),
            result: Box::new(result),
        });
    }

    let created_swaps: BTreeSet<DeviceId> = executed
        .iter()
        .filter(|a| a.kind == ActionKind::CreateFormat && a.format.is_swap())
        .map(|a| a.device.id)
        .collect();

    // New formats only have their UUIDs after the commit
    let all_volumes = pool_results
        .iter_mut()
        .flat_map(|p| p.volumes.iter_mut())
        .chain(volumes.iter_mut());

    for volume in all_volumes {
        let Some(id) = volume.device.filter(|_| volume.present) else {
            continue;
        };

        volume.outcome.mount_id = tree.mount_id(id);

        let is_swap = tree.get(id)?.format.is_swap();
        if !config.dry_run && is_swap && (torn_down.contains(&id) || created_swaps.contains(&id)) {
            info!("activating swap on {}", tree.get(id)?.path);
            let device = tree.get(id)?.clone();
            tree.engine_mut().activate_swap(&device)?;
        }
    }

    for pool in pool_results.iter_mut() {
        pool.outcome.volumes = pool.volumes.iter().map(|v| v.outcome.clone()).collect();
    }

    let reconciled: Vec<&VolumeResult> = pool_results
        .iter()
        .flat_map(|p| p.volumes.iter())
        .chain(volumes.iter())
        .collect();

    // Formats gone for good, including those of volumes rebuilt under a new device
    let destroyed: BTreeSet<DeviceId> = executed
        .iter()
        .filter(|a| a.kind.is_destroy() && a.format.exists)
        .filter(|a| a.format.is_mountable() || a.format.is_swap())
        .map(|a| a.device.id)
        .collect();

    result.mounts = mounts::mount_changes(fstab, &reconciled, &destroyed);
    result.crypts = crypt_entries(&executed);
    result.leaves = tree.leaves().iter().map(|d| d.path.clone()).collect();
    result.changed = !result.actions.is_empty() || !result.mounts.is_empty();
    result.pools = pool_results.into_iter().map(|p| p.outcome).collect();
    result.volumes = volumes.into_iter().map(|v| v.outcome).collect();

    Ok(result)
}
