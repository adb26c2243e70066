use std::collections::BTreeSet;

use super::volume::VolumeResult;
use crate::devicetree::device::DeviceId;
use crate::devicetree::fstab::{FstabEntry, FstabSnapshot};
use crate::entity::report::{MountDirective, MountState};

const SWAP_MOUNT_POINT: &str = "none";

/// Where the volume wants to be mounted, if anywhere
fn mount_point(volume: &VolumeResult) -> Option<String> {
    let spec = &volume.outcome.spec;

    if spec.fs_type.as_deref() == Some("swap") {
        return Some(SWAP_MOUNT_POINT.to_string());
    }

    spec.mount_point
        .clone()
        .filter(|m| m.starts_with('/'))
}

fn removal(entry: &FstabEntry) -> MountDirective {
    MountDirective {
        src: Some(entry.spec.clone()),
        path: entry.mount_point.clone(),
        fstype: None,
        opts: None,
        dump: None,
        passno: None,
        state: MountState::Absent,
    }
}

fn is_current(entry: &FstabEntry, volume: &VolumeResult, path: &str) -> bool {
    let spec = &volume.outcome.spec;

    entry.device_id.is_some()
        && entry.device_id == volume.device
        && entry.mount_point == path
        && Some(entry.fs_type.as_str()) == spec.fs_type.as_deref()
        && Some(entry.options.as_str()) == spec.mount_options.as_deref()
}

/// Mount table changes for the reconciled volumes: every removal first, then additions.
/// Entries of destroyed or reformatted devices are removed, as are entries
/// whose mount point moved. `destroyed` holds devices whose existing format
/// went away during the run, whether or not a volume still claims them.
pub fn mount_changes(
    fstab: &FstabSnapshot,
    volumes: &[&VolumeResult],
    destroyed: &BTreeSet<DeviceId>,
) -> Vec<MountDirective> {
    let mut removals = Vec::new();
    let mut removed = BTreeSet::new();
    let mut additions = Vec::new();

    for volume in volumes {
        let Some(prior) = volume.prior else {
            continue;
        };

        let wanted = mount_point(volume);
        for entry in fstab.by_device(prior) {
            let keep = volume.present
                && !volume.reformatted
                && wanted.as_deref() == Some(entry.mount_point.as_str());

            if keep || !removed.insert(entry.mount_point.clone()) {
                continue;
            }

            removals.push(removal(entry));
        }
    }

    for &id in destroyed {
        for entry in fstab.by_device(id) {
            if removed.insert(entry.mount_point.clone()) {
                removals.push(removal(entry));
            }
        }
    }

    for volume in volumes.iter().filter(|v| v.present) {
        let Some(path) = mount_point(volume) else {
            continue;
        };

        let current = !volume.reformatted
            && fstab
                .by_mount_point(&path)
                .into_iter()
                .any(|entry| is_current(entry, volume, &path));

        if current {
            continue;
        }

        let spec = &volume.outcome.spec;
        additions.push(MountDirective {
            src: volume.outcome.mount_id.clone(),
            path,
            fstype: spec.fs_type.clone(),
            opts: spec.mount_options.clone(),
            dump: spec.mount_check,
            passno: spec.mount_passno,
            state: MountState::Mounted,
        });
    }

    removals.extend(additions);
    removals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::sizes::GIB;
    use crate::devicetree::device::Format;
    use crate::devicetree::testing::TreeBuilder;
    use crate::entity::outcome::VolumeOutcome;
    use crate::manifest::VolumeSpec;

    fn volume(mount_point: &str, fs_type: &str) -> VolumeSpec {
        VolumeSpec {
            name: "data".to_string(),
            fs_type: Some(fs_type.to_string()),
            mount_point: Some(mount_point.to_string()),
            mount_options: Some("defaults".to_string()),
            mount_check: Some(0),
            mount_passno: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn test_mount_changes() {
        let mut builder = TreeBuilder::new();
        let sdb = builder.disk("sdb", 10 * GIB, Format::fs("ext4").existing(Some("u1".to_string())));
        let tree = builder.build();

        let fstab = FstabSnapshot::parse("UUID=u1 /data ext4 defaults 0 0\n", &tree);

        struct Test {
            spec: VolumeSpec,
            present: bool,
            reformatted: bool,
            expected: Vec<(&'static str, MountState)>,
        }

        let tests = vec![
            // Unchanged
            Test {
                spec: volume("/data", "ext4"),
                present: true,
                reformatted: false,
                expected: vec![],
            },
            // Moved
            Test {
                spec: volume("/srv", "ext4"),
                present: true,
                reformatted: false,
                expected: vec![("/data", MountState::Absent), ("/srv", MountState::Mounted)],
            },
            // Reformatted in place
            Test {
                spec: volume("/data", "xfs"),
                present: true,
                reformatted: true,
                expected: vec![("/data", MountState::Absent), ("/data", MountState::Mounted)],
            },
            // Removed
            Test {
                spec: volume("/data", "ext4"),
                present: false,
                reformatted: true,
                expected: vec![("/data", MountState::Absent)],
            },
            // Now swap
            Test {
                spec: volume("/data", "swap"),
                present: true,
                reformatted: true,
                expected: vec![("/data", MountState::Absent), ("none", MountState::Mounted)],
            },
        ];

        for test in tests {
            let result = VolumeResult {
                outcome: VolumeOutcome {
                    spec: test.spec,
                    mount_id: Some("UUID=u1".to_string()),
                    ..Default::default()
                },
                device: Some(sdb),
                prior: Some(sdb),
                present: test.present,
                reformatted: test.reformatted,
            };

            let changes: Vec<(String, MountState)> = mount_changes(&fstab, &[&result], &BTreeSet::new())
                .into_iter()
                .map(|m| (m.path, m.state))
                .collect();

            let expected: Vec<(String, MountState)> = test
                .expected
                .into_iter()
                .map(|(path, state)| (path.to_string(), state))
                .collect();

            assert_eq!(expected, changes);
        }
    }

    #[test]
    fn test_destroyed_without_volume() {
        let mut builder = TreeBuilder::new();
        let sdb = builder.disk("sdb", 10 * GIB, Format::fs("ext4").existing(Some("u1".to_string())));
        let tree = builder.build();

        let fstab = FstabSnapshot::parse("UUID=u1 /data ext4 defaults 0 0\n", &tree);

        // A rebuilt pool hides the old device from its volume
        let result = VolumeResult {
            outcome: VolumeOutcome {
                spec: volume("/srv", "ext4"),
                mount_id: Some("UUID=uuid-3".to_string()),
                ..Default::default()
            },
            device: None,
            prior: None,
            present: true,
            reformatted: true,
        };

        let changes: Vec<(String, MountState)> = mount_changes(&fstab, &[&result], &BTreeSet::from([sdb]))
            .into_iter()
            .map(|m| (m.path, m.state))
            .collect();

        assert_eq!(
            vec![
                ("/data".to_string(), MountState::Absent),
                ("/srv".to_string(), MountState::Mounted),
            ],
            changes
        );

        assert!(mount_changes(&fstab, &[&result], &BTreeSet::new())
            .iter()
            .all(|m| m.state == MountState::Mounted));
    }
}
