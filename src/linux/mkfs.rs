use tracing::debug;

use crate::errors::ReconcileError;
use crate::utils::shell;

fn force_flag(fs_type: &str) -> Option<&'static str> {
    match fs_type {
        "xfs" | "btrfs" => Some("-f"),
        "ext2" | "ext3" | "ext4" => Some("-F"),
        _ => None,
    }
}

fn label_flag(fs_type: &str) -> &'static str {
    match fs_type {
        "vfat" | "fat" | "msdos" => "-n",
        _ => "-L",
    }
}

/// Arguments to `mkfs.{fs_type}`
pub fn mkfs_args(
    fs_type: &str,
    device: &str,
    label: Option<&str>,
    options: Option<&str>,
) -> Result<Vec<String>, ReconcileError> {
    let mut args = Vec::new();

    if let Some(flag) = force_flag(fs_type) {
        args.push(flag.to_string());
    }

    if let Some(label) = label {
        args.push(label_flag(fs_type).to_string());
        args.push(label.to_string());
    }

    if let Some(options) = options {
        let split = shlex::split(options).ok_or(ReconcileError::BadManifest(format!(
            "bad fs_create_options for {device}: '{options}'"
        )))?;

        args.extend(split);
    }

    args.push(device.to_string());
    Ok(args)
}

/// Executes:
/// ```shell
/// mkfs.${{ fs_type }} [-f|-F] [-L ${{ label }}] ${{ options }} ${{ device }}
/// ```
pub fn create_fs(
    fs_type: &str,
    device: &str,
    label: Option<&str>,
    options: Option<&str>,
) -> Result<(), ReconcileError> {
    let args = mkfs_args(fs_type, device, label, options)?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    shell::exec(&format!("mkfs.{fs_type}"), &args)
}

pub fn create_swap(device: &str, label: Option<&str>) -> Result<(), ReconcileError> {
    let mut args = vec!["-f"];
    if let Some(label) = label {
        args.extend(["-L", label]);
    }
    args.push(device);

    shell::exec("mkswap", &args)
}

pub fn relabel(fs_type: &str, device: &str, label: &str) -> Result<(), ReconcileError> {
    match fs_type {
        "ext2" | "ext3" | "ext4" => shell::exec("e2label", &[device, label]),
        "xfs" => shell::exec("xfs_admin", &["-L", label, device]),
        "swap" => shell::exec("swaplabel", &["-L", label, device]),
        "btrfs" => shell::exec("btrfs", &["filesystem", "label", device, label]),
        "vfat" | "fat" => shell::exec("fatlabel", &[device, label]),
        _ => Err(ReconcileError::UnsupportedFormat(format!(
            "relabeling {fs_type} filesystems is not supported"
        ))),
    }
}

/// Resizes the filesystem on `device` to fill it. Filesystems that
/// only grow online are mounted on a temporary directory first.
pub fn resize_fs(fs_type: &str, device: &str, uuid: Option<&str>) -> Result<(), ReconcileError> {
    match fs_type {
        "ext2" | "ext3" | "ext4" => shell::exec("resize2fs", &[device]),
        "swap" => {
            let mut args = vec!["-f"];
            if let Some(uuid) = uuid {
                args.extend(["-U", uuid]);
            }
            args.push(device);

            shell::exec("mkswap", &args)
        }
        "xfs" | "btrfs" => {
            let dir = tempfile::Builder::new()
                .prefix("blkstack-resize-")
                .tempdir()
                .map_err(|err| ReconcileError::FileError {
                    error: err,
                    context: "failed to create temporary mountpoint".to_string(),
                })?;

            let mountpoint = dir.path().to_string_lossy().to_string();
            debug!("growing {fs_type} on {device} via {mountpoint}");

            shell::exec("mount", &[device, &mountpoint])?;
            let result = match fs_type {
                "xfs" => shell::exec("xfs_growfs", &[&mountpoint]),
                _ => shell::exec("btrfs", &["filesystem", "resize", "max", &mountpoint]),
            };
            shell::exec("umount", &[&mountpoint])?;

            result
        }
        _ => Err(ReconcileError::UnsupportedFormat(format!(
            "resizing {fs_type} filesystems is not supported"
        ))),
    }
}

/// Whether the host carries the tool to create filesystems of `fs_type`
pub fn supported(fs_type: &str) -> bool {
    match fs_type {
        "swap" => shell::in_path("mkswap"),
        t => shell::in_path(&format!("mkfs.{t}")),
    }
}
