use super::device::FormatKind;
use super::DeviceTree;
use crate::entity::size::Size;

/// Disks safe to hand out to new pools: nothing on top of them, no
/// format other than an empty partition table, and no stray signature.
/// Results are sorted by name.
pub fn find_unused_disks(tree: &DeviceTree, min_size: Size, max_return: Option<usize>) -> Vec<String> {
    let mut unused: Vec<String> = tree
        .devices()
        .filter(|d| d.is_disk() && d.exists)
        .filter(|d| tree.is_leaf(d.id))
        .filter(|d| matches!(d.format.kind, FormatKind::None | FormatKind::DiskLabel(_)))
        .filter(|d| d.size >= min_size)
        .filter(|d| !(d.format.is_none() && tree.engine().has_signature(d)))
        .map(|d| d.path.clone())
        .collect();

    unused.sort();
    if let Some(max) = max_return {
        unused.truncate(max);
    }

    unused
}
