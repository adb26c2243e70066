use serde::Serialize;
use serde_json::json;

use crate::devicetree::device::Device;
use crate::devicetree::{discovery, unused, DeviceTree};
use crate::entity::size::{self, Size};
use crate::errors::ReconcileError;
use crate::linux::engine::ShellEngine;

#[derive(Debug, Serialize)]
struct DeviceInfo {
    name: String,
    path: String,
    #[serde(rename = "type")]
    device_type: String,
    fstype: String,
    label: String,
    uuid: String,
    size: Size,
}

impl From<&Device> for DeviceInfo {
    fn from(device: &Device) -> Self {
        Self {
            name: device.name.clone(),
            path: device.path.clone(),
            device_type: device.type_name().to_string(),
            fstype: device.format.type_name().unwrap_or_default().to_string(),
            label: device.format.label.clone().unwrap_or_default(),
            uuid: device.format.uuid.clone().unwrap_or_default(),
            size: device.size,
        }
    }
}

fn discover() -> Result<DeviceTree, ReconcileError> {
    super::sanity::check_commands()?;
    discovery::discover(Box::new(ShellEngine))
}

pub(super) fn info() -> Result<(), ReconcileError> {
    let tree = discover()?;
    let devices: Vec<DeviceInfo> = tree.devices().map(DeviceInfo::from).collect();

    println!("{}", json!({ "info": devices }));
    Ok(())
}

pub(super) fn resolve(spec: &str) -> Result<(), ReconcileError> {
    let tree = discover()?;
    let device = tree
        .resolve(spec)
        .ok_or(ReconcileError::DeviceLookup(format!("no device matches '{spec}'")))?;

    println!("{}", json!({ "device": device.path }));
    Ok(())
}

pub(super) fn unused_disks(min_size: &str, max_return: Option<usize>) -> Result<(), ReconcileError> {
    let min_size = size::parse_human_bytes(min_size)?;
    let tree = discover()?;
    let disks = unused::find_unused_disks(&tree, min_size, max_return);

    println!("{}", json!({ "disks": disks }));
    Ok(())
}
