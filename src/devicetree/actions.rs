use tracing::{debug, info};

use super::device::{Device, DeviceId, Format};
use super::DeviceTree;
use crate::entity::report::ActionRecord;
use crate::entity::size::Size;
use crate::errors::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    CreateDevice,
    DestroyDevice,
    CreateFormat,
    DestroyFormat,
    ConfigureFormat,
    ResizeDevice,
    ResizeFormat,
    AddMember,
    RemoveMember,
    AttachCache,
    DetachCache,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDevice => "create device",
            Self::DestroyDevice => "destroy device",
            Self::CreateFormat => "create format",
            Self::DestroyFormat => "destroy format",
            Self::ConfigureFormat => "configure format",
            Self::ResizeDevice => "resize device",
            Self::ResizeFormat => "resize format",
            Self::AddMember => "add container member",
            Self::RemoveMember => "remove container member",
            Self::AttachCache => "attach cache",
            Self::DetachCache => "detach cache",
        }
    }

    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Self::CreateFormat | Self::DestroyFormat | Self::ConfigureFormat | Self::ResizeFormat
        )
    }

    pub fn is_destroy(&self) -> bool {
        matches!(self, Self::DestroyDevice | Self::DestroyFormat)
    }

    pub fn is_resize(&self) -> bool {
        matches!(self, Self::ResizeDevice | Self::ResizeFormat)
    }
}

/// One scheduled mutation, carrying snapshots of everything
/// the storage engine needs to carry it out
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub device: Device,
    pub parents: Vec<Device>,
    /// The format created, destroyed or changed; for device actions the device's format
    pub format: Format,
    /// Target size of resize actions
    pub size: Option<Size>,
    /// Member added or removed by container actions
    pub member: Option<Device>,
}

impl PendingAction {
    pub fn record(&self) -> Option<ActionRecord> {
        if self.kind.is_format() && self.format.is_none() {
            return None;
        }

        let fs_type = match self.kind.is_format() {
            true => self.format.type_name().map(String::from),
            false => None,
        };

        Some(ActionRecord {
            action: self.kind.as_str().to_string(),
            fs_type,
            device: self.device.path.clone(),
        })
    }
}

impl DeviceTree {
    pub fn pending_actions(&self) -> &[PendingAction] {
        &self.queue
    }

    pub(super) fn schedule(&mut self, kind: ActionKind, id: DeviceId) -> Result<(), ReconcileError> {
        let device = self.get(id)?.clone();
        let format = device.format.clone();

        self.schedule_with(kind, device, format, None, None)
    }

    pub(super) fn schedule_with(
        &mut self,
        kind: ActionKind,
        device: Device,
        format: Format,
        size: Option<Size>,
        member: Option<Device>,
    ) -> Result<(), ReconcileError> {
        let parents = device
            .parents
            .iter()
            .map(|p| self.get(*p).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "scheduling {} {} on {}",
            kind.as_str(),
            format.type_name().unwrap_or_default(),
            device.path
        );

        self.queue.push(PendingAction {
            kind,
            device,
            parents,
            format,
            size,
            member,
        });

        Ok(())
    }

    /// Drops scheduled actions on `id` matching `pred`
    pub(super) fn cancel<F>(&mut self, id: DeviceId, pred: F)
    where
        F: Fn(&PendingAction) -> bool,
    {
        self.queue.retain(|action| {
            let on_device = action.device.id == id
                || action.member.as_ref().map(|m| m.id) == Some(id);

            !(on_device && pred(action))
        });
    }

    /// Executes the action queue in order, reporting every executed action to
    /// `on_executed`. In dry-run mode the actions are only reported.
    pub fn commit<F>(&mut self, dry_run: bool, mut on_executed: F) -> Result<(), ReconcileError>
    where
        F: FnMut(&PendingAction),
    {
        let actions = std::mem::take(&mut self.queue);

        for action in &actions {
            if dry_run {
                on_executed(action);
                continue;
            }

            info!(
                "{} {} on {}",
                action.kind.as_str(),
                action.format.type_name().unwrap_or_default(),
                action.device.path
            );

            let uuid = self.engine.execute(action)?;
            self.mark_executed(action, uuid);

            on_executed(action);
        }

        if !dry_run {
            self.committed = self.devices.clone();
        }

        Ok(())
    }

    fn mark_executed(&mut self, action: &PendingAction, uuid: Option<String>) {
        let Some(device) = self.devices.get_mut(&action.device.id) else {
            return;
        };

        match action.kind {
            ActionKind::CreateDevice => device.exists = true,
            ActionKind::CreateFormat if device.format.kind == action.format.kind => {
                device.format.exists = true;
                if uuid.is_some() {
                    device.format.uuid = uuid;
                }
            }
            _ => {}
        }
    }

    /// Discards every scheduled change, returning to the last committed state
    pub fn reset(&mut self) {
        self.devices = self.committed.clone();
        self.queue.clear();
    }
}
