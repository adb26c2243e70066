use super::actions::PendingAction;
use super::device::{Device, FormatKind};
use crate::errors::ReconcileError;

/// The storage engine that carries out scheduled actions on the host.
/// The device tree only ever plans; implementors do the actual work.
pub trait Engine {
    /// Executes one action, returning the UUID of a newly created format if any
    fn execute(&mut self, action: &PendingAction) -> Result<Option<String>, ReconcileError>;

    /// Unmounts or deactivates the device's current format
    fn teardown_format(&mut self, device: &Device) -> Result<(), ReconcileError>;

    fn activate_swap(&mut self, device: &Device) -> Result<(), ReconcileError>;

    /// Whether the host has the tools to create this format
    fn format_supported(&self, kind: &FormatKind) -> bool;

    /// Whether a signature probe finds anything on the device
    fn has_signature(&self, device: &Device) -> bool;
}
