use crate::errors::ReconcileError;
use crate::utils::shell;

pub fn umount(target: &str) -> Result<(), ReconcileError> {
    shell::exec("umount", &[target])
}

pub fn swapon(device: &str) -> Result<(), ReconcileError> {
    shell::exec("swapon", &[device])
}

pub fn swapoff(device: &str) -> Result<(), ReconcileError> {
    shell::exec("swapoff", &[device])
}
