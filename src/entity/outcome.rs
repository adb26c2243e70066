use serde::Serialize;

use crate::manifest::{PoolSpec, VolumeSpec};

/// A volume as declared, plus the devices it ended up on
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumeOutcome {
    #[serde(flatten)]
    pub spec: VolumeSpec,

    /// Top of the stack, i.e. the LUKS mapping for encrypted volumes
    #[serde(rename = "_device")]
    pub device: Option<String>,

    /// The device under any encryption
    #[serde(rename = "_raw_device")]
    pub raw_device: Option<String>,

    /// `UUID=...` or the device path, for use in fstab
    #[serde(rename = "_mount_id")]
    pub mount_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolOutcome {
    #[serde(flatten)]
    pub spec: PoolSpec,

    pub volumes: Vec<VolumeOutcome>,
}

impl PoolOutcome {
    pub fn new(mut spec: PoolSpec, volumes: Vec<VolumeOutcome>) -> Self {
        spec.volumes.clear();
        Self { spec, volumes }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_outcome_json() {
        let volume = VolumeOutcome {
            spec: VolumeSpec {
                name: "data".to_string(),
                fs_type: Some("xfs".to_string()),
                ..Default::default()
            },
            device: Some("/dev/mapper/luks-vg-data".to_string()),
            raw_device: Some("/dev/mapper/vg-data".to_string()),
            mount_id: Some("UUID=abcd".to_string()),
        };

        let spec = PoolSpec {
            name: "vg".to_string(),
            volumes: vec![VolumeSpec::default()],
            ..Default::default()
        };
        let pool = PoolOutcome::new(spec, vec![volume]);

        let value = json!(pool);
        assert_eq!(json!("vg"), value["name"]);
        assert_eq!(1, value["volumes"].as_array().map(Vec::len).unwrap_or_default());
        assert_eq!(json!("xfs"), value["volumes"][0]["fs_type"]);
        assert_eq!(json!("/dev/mapper/vg-data"), value["volumes"][0]["_raw_device"]);
    }
}
