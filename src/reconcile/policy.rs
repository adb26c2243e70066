use tracing::info;

use crate::devicetree::device::{Format, FormatKind};
use crate::devicetree::DeviceTree;
use crate::entity::size::{Size, SizeSpec};
use crate::errors::ReconcileError;
use crate::manifest::VolumeSpec;

/// The format a volume should carry, with its tooling checked on the host
pub fn resolve_format(tree: &DeviceTree, volume: &VolumeSpec) -> Result<Format, ReconcileError> {
    let fs_type = volume.fs_type.as_deref().unwrap_or_default();
    let mut format = Format::fs(fs_type);

    if format.is_none() {
        return Ok(format);
    }

    if !matches!(format.kind, FormatKind::Fs(_) | FormatKind::Swap) {
        return Err(ReconcileError::UnsupportedFormat(format!(
            "format {fs_type} of volume '{}' can not be used on a volume",
            volume.name
        )));
    }

    if !tree.engine().format_supported(&format.kind) {
        return Err(ReconcileError::UnsupportedFormat(format!(
            "no tools to create {fs_type} format of volume '{}'",
            volume.name
        )));
    }

    format.label = volume.fs_label.clone();
    format.create_options = volume.fs_create_options.clone();

    Ok(format)
}

/// Parses a declared size. Percentages are of `base`, rounded up to `granularity`.
pub fn resolve_size(size: &str, base: Option<Size>, granularity: Size) -> Result<Size, ReconcileError> {
    SizeSpec::parse(size)?.resolve(base, granularity)
}

/// Clamps `requested` to `available` if it overshoots by at most
/// `max_trim_percent`, failing otherwise
pub fn trim_to_fit(requested: Size, available: Size, max_trim_percent: f64) -> Result<Size, ReconcileError> {
    if requested <= available {
        return Ok(requested);
    }

    let shrink = requested.shrink_percent(available);
    if shrink > max_trim_percent {
        return Err(ReconcileError::InsufficientSpace(format!(
            "requested size {requested} exceeds available space {available} by {shrink:.2}%"
        )));
    }

    info!("trimming requested size {requested} to available space {available}");
    Ok(available)
}

/// Whether two formats are of the same kind, ignoring parameters
pub fn same_kind(a: &FormatKind, b: &FormatKind) -> bool {
    match (a, b) {
        (FormatKind::Fs(x), FormatKind::Fs(y)) => x == y,
        (FormatKind::DiskLabel(x), FormatKind::DiskLabel(y)) => x == y,
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}
