use tracing::info;

use super::{PoolKindOps, PoolReconciler};
use crate::devicetree::device::{Device, DeviceId, Format, FormatKind};
use crate::errors::ReconcileError;

/// A partition table on a single disk
pub(super) struct PartitionPool;

impl PartitionPool {
    fn label(r: &mut PoolReconciler, disk: DeviceId) -> Result<(), ReconcileError> {
        if r.config.safe_mode && r.tree.carries_data(disk) {
            return Err(ReconcileError::SafeMode(format!(
                "cannot remove existing formatting and/or devices on disk '{}' in safe mode",
                r.tree.get(disk)?.path
            )));
        }

        let table = r.config.disklabel();
        info!("creating {} partition table on {}", table.as_str(), r.tree.get(disk)?.path);

        r.tree.recursive_remove(disk, false)?;
        r.tree.format_device(disk, Format::new(FormatKind::DiskLabel(table)))
    }
}

impl PoolKindOps for PartitionPool {
    fn lookup(&self, r: &PoolReconciler, disks: &[DeviceId]) -> Result<Option<DeviceId>, ReconcileError> {
        let Some(&disk) = disks.first() else {
            return Ok(None);
        };

        let labelled = matches!(r.tree.get(disk)?.format.kind, FormatKind::DiskLabel(_));
        Ok(labelled.then_some(disk))
    }

    fn type_matches(&self, device: &Device) -> bool {
        matches!(device.format.kind, FormatKind::DiskLabel(_))
    }

    fn create(&self, r: &mut PoolReconciler, disks: &[DeviceId]) -> Result<DeviceId, ReconcileError> {
        let Some(&disk) = disks.first() else {
            return Err(ReconcileError::NoDisks(format!(
                "no disks specified for pool '{}'",
                r.spec.name
            )));
        };

        Self::label(r, disk)?;
        Ok(disk)
    }

    // An existing label is kept unless a different type is requested
    fn manage_members(
        &self,
        r: &mut PoolReconciler,
        device: DeviceId,
        _disks: &[DeviceId],
    ) -> Result<(), ReconcileError> {
        let Some(requested) = r.config.disklabel_type else {
            return Ok(());
        };

        let current = match r.tree.get(device)?.format.kind {
            FormatKind::DiskLabel(table) => Some(table),
            _ => None,
        };

        if current == Some(requested) {
            return Ok(());
        }

        Self::label(r, device)
    }

    fn removes_device(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::constants::sizes::GIB;
    use crate::devicetree::testing::TreeBuilder;
    use crate::manifest::{PartitionTable, PoolSpec};
    use crate::reconcile::config::ReconcileConfig;

    #[test]
    fn test_disklabel() {
        struct Test {
            current: Option<PartitionTable>,
            requested: Option<PartitionTable>,
            safe_mode: bool,
            // None if refused in safe mode
            expected: Option<Vec<&'static str>>,
            table: PartitionTable,
        }

        let tests = vec![
            Test {
                current: Some(PartitionTable::Gpt),
                requested: None,
                safe_mode: true,
                expected: Some(vec![]),
                table: PartitionTable::Gpt,
            },
            Test {
                current: Some(PartitionTable::Gpt),
                requested: Some(PartitionTable::Gpt),
                safe_mode: true,
                expected: Some(vec![]),
                table: PartitionTable::Gpt,
            },
            Test {
                current: Some(PartitionTable::Gpt),
                requested: Some(PartitionTable::Msdos),
                safe_mode: true,
                expected: None,
                table: PartitionTable::Gpt,
            },
            Test {
                current: Some(PartitionTable::Gpt),
                requested: Some(PartitionTable::Msdos),
                safe_mode: false,
                expected: Some(vec!["destroy format /dev/sdb", "create format /dev/sdb"]),
                table: PartitionTable::Msdos,
            },
            // Blank disk gets the default label
            Test {
                current: None,
                requested: None,
                safe_mode: true,
                expected: Some(vec!["create format /dev/sdb"]),
                table: PartitionTable::Gpt,
            },
        ];

        for test in tests {
            let mut builder = TreeBuilder::new();
            let format = match test.current {
                Some(table) => Format::new(FormatKind::DiskLabel(table)).existing(None),
                None => Format::none(),
            };
            let sdb = builder.disk("sdb", 10 * GIB, format);
            let mut tree = builder.build();

            let mut config = ReconcileConfig::default();
            config.safe_mode = test.safe_mode;
            config.disklabel_type = test.requested;

            let spec = PoolSpec {
                name: "parts".to_string(),
                pool_type: Some("partition".to_string()),
                disks: vec!["sdb".to_string()],
                ..Default::default()
            };

            let result = PoolReconciler::new(&mut tree, &config, &spec).unwrap().reconcile();

            let Some(expected) = test.expected else {
                assert_matches!(result, Err(ReconcileError::SafeMode(_)));
                continue;
            };

            assert!(result.is_ok(), "failed to label for {:?}", test.requested);

            let records: Vec<String> = tree
                .pending_actions()
                .iter()
                .filter_map(|a| a.record())
                .map(|r| format!("{} {}", r.action, r.device))
                .collect();
            assert_eq!(expected, records);

            assert_eq!(FormatKind::DiskLabel(test.table), tree.get(sdb).unwrap().format.kind);
        }
    }
}
