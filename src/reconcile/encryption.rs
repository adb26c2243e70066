use tracing::info;

use crate::constants::defaults;
use crate::devicetree::device::{DeviceId, Format, FormatKind, LuksParams};
use crate::devicetree::DeviceTree;
use crate::errors::ReconcileError;
use crate::manifest::EncryptionSpec;

pub fn luks_params(spec: &EncryptionSpec, map_name: &str) -> Result<LuksParams, ReconcileError> {
    let password = spec.password.clone().filter(|p| !p.is_empty());
    let key_file = spec.key_file.clone().filter(|k| !k.is_empty());

    if password.is_none() && key_file.is_none() {
        return Err(ReconcileError::MissingKey(format!(
            "encrypted device '{map_name}' requires encryption_password or encryption_key"
        )));
    }

    Ok(LuksParams {
        version: spec
            .luks_version
            .clone()
            .unwrap_or_else(|| defaults::LUKS_VERSION.to_string()),
        cipher: spec.cipher.clone(),
        key_size: spec.key_size,
        password,
        key_file,
        map_name: map_name.to_string(),
    })
}

/// Wraps `raw` in a LUKS layer or unwraps it to match `spec`,
/// returning the device the payload format now belongs on
pub fn manage_encryption(
    tree: &mut DeviceTree,
    raw: DeviceId,
    spec: &EncryptionSpec,
    safe_mode: bool,
) -> Result<DeviceId, ReconcileError> {
    let current = tree.luks_child(raw);
    let device = tree.get(raw)?.clone();

    match (spec.is_enabled(), current) {
        (true, None) => {
            if safe_mode && tree.has_real_format(raw) {
                return Err(ReconcileError::SafeMode(format!(
                    "cannot encrypt device '{}' with existing {} formatting in safe mode",
                    device.path,
                    device.format.type_name().unwrap_or("unknown")
                )));
            }

            let params = luks_params(spec, &format!("luks-{}", device.name))?;
            let payload = device.format.clone();
            info!("encrypting device {}", device.path);

            if !tree.is_leaf(raw) {
                tree.recursive_remove(raw, false)?;
            }

            tree.format_device(raw, Format::new(FormatKind::Luks(params)))?;
            tree.new_luks(raw, payload)
        }

        (false, Some(luks)) => {
            if safe_mode && tree.has_real_format(luks) {
                return Err(ReconcileError::SafeMode(format!(
                    "cannot remove encryption of device '{}' with existing data in safe mode",
                    device.path
                )));
            }

            let payload = tree.get(luks)?.format.clone();
            info!("removing encryption from device {}", device.path);

            tree.recursive_remove(luks, true)?;
            tree.format_device(raw, payload)?;

            Ok(raw)
        }

        (_, current) => Ok(current.unwrap_or(raw)),
    }
}
