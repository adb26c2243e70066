use serde::{Deserialize, Serialize};
use serde_json::json;

use super::outcome::{PoolOutcome, VolumeOutcome};

/// The structured result of one reconciliation run
#[derive(Debug, Default, Serialize)]
pub struct ReconcileResult {
    pub changed: bool,
    pub actions: Vec<ActionRecord>,
    pub leaves: Vec<String>,
    pub mounts: Vec<MountDirective>,
    pub crypts: Vec<CryptEntry>,
    pub pools: Vec<PoolOutcome>,
    pub volumes: Vec<VolumeOutcome>,
    pub packages: Vec<String>,
}

/// One executed (or simulated) action as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,

    pub device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountState {
    #[serde(rename = "mounted")]
    Mounted,

    #[serde(rename = "absent")]
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountDirective {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fstype: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub opts: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub passno: Option<u32>,

    pub state: MountState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CryptState {
    #[serde(rename = "present")]
    Present,

    #[serde(rename = "absent")]
    Absent,
}

/// A crypttab-style entry for setting up or tearing down a LUKS mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptEntry {
    pub backing_device: String,
    pub name: String,
    pub password: String,
    pub state: CryptState,
}

#[derive(Debug)]
pub struct Report {
    pub manifest: String,
    pub result: ReconcileResult,
    pub dry_run: bool,
    pub duration: std::time::Duration,
}

impl Report {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "manifest": self.manifest,
            "check_mode": self.dry_run,
            "result": self.result,
            "elapsedTime": self.duration.as_secs_f64(),
        })
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }
}

impl ReconcileResult {
    /// JSON body printed when a run fails, keeping whatever was collected
    pub fn to_failure_json(&self, msg: &str) -> serde_json::Value {
        let mut value = json!(self);
        if let Some(obj) = value.as_object_mut() {
            obj.insert("msg".to_string(), json!(msg));
        }

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_json() {
        let result = ReconcileResult {
            changed: true,
            actions: vec![
                ActionRecord {
                    action: "create format".to_string(),
                    fs_type: Some("lvmpv".to_string()),
                    device: "/dev/sdb".to_string(),
                },
                ActionRecord {
                    action: "create device".to_string(),
                    fs_type: None,
                    device: "/dev/apppool".to_string(),
                },
            ],
            mounts: vec![MountDirective {
                src: Some("UUID=abcd".to_string()),
                path: "/data".to_string(),
                fstype: Some("ext4".to_string()),
                opts: Some("defaults".to_string()),
                dump: Some(0),
                passno: Some(0),
                state: MountState::Mounted,
            }],
            packages: vec!["e2fsprogs".to_string(), "lvm2".to_string()],
            ..Default::default()
        };

        let value = json!(result);
        assert_eq!(value["changed"], json!(true));
        assert_eq!(value["actions"][0]["fs_type"], json!("lvmpv"));
        assert!(value["actions"][1].get("fs_type").is_none());
        assert_eq!(value["mounts"][0]["state"], json!("mounted"));

        let failure = result.to_failure_json("boom");
        assert_eq!(failure["msg"], json!("boom"));
        assert_eq!(failure["changed"], json!(true));
    }
}
