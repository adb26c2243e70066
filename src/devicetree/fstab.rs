use std::io::ErrorKind;

use serde::Serialize;

use super::device::DeviceId;
use super::DeviceTree;
use crate::errors::ReconcileError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FstabEntry {
    /// First column as written, e.g. `UUID=...` or `/dev/sdb1`
    pub spec: String,
    /// Device path the spec resolved to at snapshot time
    pub device: Option<String>,
    #[serde(skip)]
    pub device_id: Option<DeviceId>,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
    pub dump: String,
    pub passno: String,
}

/// The mount table as it was when reconciliation started
#[derive(Debug, Clone, Default)]
pub struct FstabSnapshot {
    pub entries: Vec<FstabEntry>,
}

impl FstabSnapshot {
    pub fn parse(content: &str, tree: &DeviceTree) -> Self {
        let entries = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 6 {
                    return None;
                }

                let resolved = tree.resolve(fields[0]);

                Some(FstabEntry {
                    spec: fields[0].to_string(),
                    device: resolved.map(|d| d.path.clone()),
                    device_id: resolved.map(|d| d.id),
                    mount_point: fields[1].to_string(),
                    fs_type: fields[2].to_string(),
                    options: fields[3].to_string(),
                    dump: fields[4].to_string(),
                    passno: fields[5].to_string(),
                })
            })
            .collect();

        Self { entries }
    }

    /// Reads the mount table at `path`. A missing file is an empty table.
    pub fn read(path: &str, tree: &DeviceTree) -> Result<Self, ReconcileError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content, tree)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ReconcileError::FileError {
                error: err,
                context: format!("failed to read mount table {path}"),
            }),
        }
    }

    /// Entries whose spec resolved to device `id`
    pub fn by_device(&self, id: DeviceId) -> Vec<&FstabEntry> {
        self.entries
            .iter()
            .filter(|e| e.device_id == Some(id))
            .collect()
    }

    pub fn by_mount_point(&self, mount_point: &str) -> Vec<&FstabEntry> {
        self.entries
            .iter()
            .filter(|e| e.mount_point == mount_point)
            .collect()
    }
}
