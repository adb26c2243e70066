//! Per-pool reconciliation: pool device lookup, teardown, member
//! (re)creation and membership changes, then the pool's volumes

mod lvm;
mod partition;

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::config::ReconcileConfig;
use super::volume::{PoolContext, VolumeReconciler, VolumeResult};
use crate::devicetree::device::{Device, DeviceId};
use crate::devicetree::DeviceTree;
use crate::entity::outcome::PoolOutcome;
use crate::errors::ReconcileError;
use crate::manifest::defaults::Merge;
use crate::manifest::{PoolSpec, PoolType, State, VolumeSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Unresolved,
    Destroying,
    Recreating,
    Creating,
    ManagingMembers,
    ManagingVolumes,
    Done,
}

#[derive(Debug, Clone)]
pub struct PoolResult {
    pub outcome: PoolOutcome,
    pub volumes: Vec<VolumeResult>,
}

/// Behavior that differs between pool kinds
trait PoolKindOps {
    fn lookup(&self, r: &PoolReconciler, disks: &[DeviceId]) -> Result<Option<DeviceId>, ReconcileError>;

    fn type_matches(&self, device: &Device) -> bool;

    /// Settings read back from the existing pool device
    fn introspect(&self, _r: &PoolReconciler, _device: DeviceId) -> PoolSpec {
        PoolSpec::default()
    }

    /// Whether the existing members can not be turned into the declared ones in place
    fn member_change(&self, _r: &PoolReconciler, _device: DeviceId) -> Result<bool, ReconcileError> {
        Ok(false)
    }

    fn create(&self, r: &mut PoolReconciler, disks: &[DeviceId]) -> Result<DeviceId, ReconcileError>;

    fn manage_members(
        &self,
        _r: &mut PoolReconciler,
        _device: DeviceId,
        _disks: &[DeviceId],
    ) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Names and allocates what the pool's volumes need before they are reconciled
    fn prepare_volumes(
        &self,
        _r: &mut PoolReconciler,
        _ctx: &mut PoolContext,
        _volumes: &mut [VolumeSpec],
    ) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Whether destroying the pool removes the pool device itself
    fn removes_device(&self) -> bool;
}

fn ops(kind: PoolType) -> &'static dyn PoolKindOps {
    match kind {
        PoolType::Partition => &partition::PartitionPool,
        PoolType::Lvm => &lvm::LvmPool,
    }
}

pub struct PoolReconciler<'a> {
    tree: &'a mut DeviceTree,
    config: &'a ReconcileConfig,
    kind: PoolType,
    /// Declared settings with all defaults applied
    spec: PoolSpec,
    declared: PoolSpec,
    state: PoolState,
}

impl<'a> PoolReconciler<'a> {
    pub fn new(
        tree: &'a mut DeviceTree,
        config: &'a ReconcileConfig,
        declared: &PoolSpec,
    ) -> Result<Self, ReconcileError> {
        let spec = declared.clone().merged(&config.pool_defaults);
        let kind = match &spec.pool_type {
            Some(t) => t.parse()?,
            None => PoolType::Lvm,
        };

        Ok(Self {
            tree,
            config,
            kind,
            spec,
            declared: declared.clone(),
            state: PoolState::Unresolved,
        })
    }

    fn transition(&mut self, next: PoolState) {
        debug!("pool '{}': {:?} -> {next:?}", self.spec.name, self.state);
        self.state = next;
    }

    /// Resolves declared disks, skipping unknown ones. Present pools need at least one.
    fn resolve_disks(&self) -> Result<Vec<DeviceId>, ReconcileError> {
        let mut disks = Vec::new();

        for name in &self.spec.disks {
            match self.tree.resolve_id(name) {
                Some(id) if !disks.contains(&id) => disks.push(id),
                Some(_) => {}
                None => warn!("unable to resolve disk '{name}' of pool '{}'", self.spec.name),
            }
        }

        if disks.is_empty() && !self.spec.disks.is_empty() && self.spec.state() == State::Present {
            return Err(ReconcileError::UnresolvedDisk(format!(
                "unable to resolve any disk of pool '{}': {}",
                self.spec.name,
                self.spec.disks.join(", ")
            )));
        }

        Ok(disks)
    }

    fn lookup(&self, disks: &[DeviceId]) -> Result<Option<DeviceId>, ReconcileError> {
        let ops = ops(self.kind);
        let Some(found) = ops.lookup(self, disks)? else {
            return Ok(None);
        };

        let device = self.tree.get(found)?;
        if !ops.type_matches(device) {
            warn!(
                "device {} found for pool '{}' is a {}, not a {:?} pool; creating a new one",
                device.path,
                self.spec.name,
                device.type_name(),
                self.kind
            );

            return Ok(None);
        }

        Ok(Some(found))
    }

    pub fn reconcile(mut self) -> Result<PoolResult, ReconcileError> {
        let ops = ops(self.kind);

        let mut disks = self.resolve_disks()?;
        let mut device = self.lookup(&disks)?;

        if let Some(device) = device {
            let introspected = ops.introspect(&self, device);
            self.spec = self
                .declared
                .clone()
                .merged(&introspected)
                .merged(&self.config.pool_defaults);

            if self.spec.disks.is_empty() {
                disks = self.tree.backing_disks(device);
            }
        }

        let mut volumes = self.declared.volumes.clone();
        let present = self.spec.state() == State::Present;

        if !present {
            self.transition(PoolState::Destroying);
            let results = self.destroy(device, &volumes, disks)?;
            return Ok(self.finish(results));
        }

        if device.is_none() && disks.is_empty() {
            return Err(ReconcileError::NoDisks(format!(
                "no disks specified for pool '{}'",
                self.spec.name
            )));
        }

        if let Some(existing) = device {
            if ops.member_change(&self, existing)? {
                if self.config.safe_mode {
                    return Err(ReconcileError::SafeMode(format!(
                        "cannot remove and recreate existing pool '{}' in safe mode",
                        self.spec.name
                    )));
                }

                self.transition(PoolState::Recreating);
                info!("recreating pool '{}' to change its members", self.spec.name);
                self.tree.recursive_remove(existing, ops.removes_device())?;
                device = None;
            }
        }

        let device = match device {
            Some(device) => {
                self.transition(PoolState::ManagingMembers);
                ops.manage_members(&mut self, device, &disks)?;
                device
            }
            None => {
                self.transition(PoolState::Creating);
                info!("creating {:?} pool '{}'", self.kind, self.spec.name);
                ops.create(&mut self, &disks)?
            }
        };

        let mut ctx = PoolContext {
            spec: self.spec.clone(),
            kind: self.kind,
            device: Some(device),
            disks,
            present: true,
            thin_pools: HashMap::new(),
        };

        ops.prepare_volumes(&mut self, &mut ctx, &mut volumes)?;

        self.transition(PoolState::ManagingVolumes);
        let results = self.reconcile_volumes(&ctx, &volumes)?;

        self.transition(PoolState::Done);
        Ok(self.finish(results))
    }

    fn reconcile_volumes(
        &mut self,
        ctx: &PoolContext,
        volumes: &[VolumeSpec],
    ) -> Result<Vec<VolumeResult>, ReconcileError> {
        volumes
            .iter()
            .enumerate()
            .map(|(index, volume)| {
                VolumeReconciler::new(self.tree, self.config, Some(ctx), volume, index)?.reconcile()
            })
            .collect()
    }

    /// Removes the pool's volumes, the pool device, and every backing
    /// device the removal leaves unused
    fn destroy(
        &mut self,
        device: Option<DeviceId>,
        volumes: &[VolumeSpec],
        disks: Vec<DeviceId>,
    ) -> Result<Vec<VolumeResult>, ReconcileError> {
        let ctx = PoolContext {
            spec: self.spec.clone(),
            kind: self.kind,
            device,
            disks,
            present: false,
            thin_pools: HashMap::new(),
        };

        let results = self.reconcile_volumes(&ctx, volumes)?;

        let Some(device) = device else {
            return Ok(results);
        };

        info!("removing pool '{}'", self.spec.name);
        let mut pending = self.tree.ancestors(device);
        self.tree.recursive_remove(device, ops(self.kind).removes_device())?;

        // Removing one backing device may leave the next one unused
        loop {
            let leaves: Vec<DeviceId> = pending
                .iter()
                .copied()
                .filter(|id| self.tree.contains(*id) && self.tree.is_leaf(*id))
                .collect();

            if leaves.is_empty() {
                break;
            }

            for leaf in leaves {
                match self.tree.get(leaf)?.is_disk() {
                    true => self.tree.destroy_format(leaf)?,
                    false => self.tree.recursive_remove(leaf, true)?,
                }

                pending.retain(|id| *id != leaf);
            }
        }

        Ok(results)
    }

    fn finish(&self, volumes: Vec<VolumeResult>) -> PoolResult {
        let outcomes = volumes.iter().map(|v| v.outcome.clone()).collect();

        PoolResult {
            outcome: PoolOutcome::new(self.declared.clone(), outcomes),
            volumes,
        }
    }

    /// Disks backing the members of an existing pool device
    fn member_disks(&self, member: DeviceId) -> Vec<DeviceId> {
        self.tree.backing_disks(member)
    }
}
