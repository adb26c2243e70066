use std::collections::BTreeMap;

use crate::constants::defaults;
use crate::manifest::{Manifest, PartitionTable, PoolSpec, VolumeSpec};

/// Run-wide policy, frozen before reconciliation starts
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Refuse any action that would discard existing data
    pub safe_mode: bool,
    /// Put pool members on a partition instead of the whole disk
    pub use_partitions: bool,
    pub disklabel_type: Option<PartitionTable>,
    pub packages_only: bool,
    pub dry_run: bool,
    pub pool_defaults: PoolSpec,
    pub volume_defaults: VolumeSpec,
    pub diskvolume_mkfs_option_map: BTreeMap<String, String>,
    /// How far a requested size may exceed available space and still be clamped
    pub max_trim_percent: f64,
    /// Base for names of unnamed pools
    pub pool_name_base: String,
}

impl ReconcileConfig {
    pub fn from_manifest(manifest: &Manifest, dry_run: bool) -> Self {
        Self {
            safe_mode: manifest.safe_mode.unwrap_or(true),
            use_partitions: manifest.use_partitions.unwrap_or(false),
            disklabel_type: manifest.disklabel_type,
            packages_only: manifest.packages_only,
            dry_run,
            pool_defaults: manifest.pool_defaults.clone(),
            volume_defaults: manifest.volume_defaults.clone(),
            diskvolume_mkfs_option_map: manifest.diskvolume_mkfs_option_map.clone(),
            max_trim_percent: manifest
                .max_trim_percent
                .unwrap_or(defaults::MAX_TRIM_PERCENT),
            pool_name_base: "vg".to_string(),
        }
    }

    pub fn with_pool_name_base(mut self, base: String) -> Self {
        self.pool_name_base = base;
        self
    }

    /// Partition table type for new labels
    pub fn disklabel(&self) -> PartitionTable {
        self.disklabel_type.unwrap_or(PartitionTable::Gpt)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::from_manifest(&Manifest::default(), false)
    }
}
