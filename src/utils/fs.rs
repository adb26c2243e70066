use std::fs;
use std::path::Path;

use crate::errors::ReconcileError;

pub fn file_exists<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref().exists()
}

pub fn read_file(path: &str) -> Result<String, ReconcileError> {
    fs::read_to_string(path).map_err(|err| ReconcileError::FileError {
        error: err,
        context: format!("failed to read {path}"),
    })
}

/// Maps every symlink in `dir` to `(link path, canonical target)`,
/// e.g. `/dev/md/data -> /dev/md127`
pub fn symlink_targets(dir: &str) -> Vec<(String, String)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_symlink()).unwrap_or(false))
        .filter_map(|entry| {
            let link = entry.path();
            let target = fs::canonicalize(&link).ok()?;

            Some((
                link.to_string_lossy().to_string(),
                target.to_string_lossy().to_string(),
            ))
        })
        .collect()
}
