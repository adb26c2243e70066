use tracing::{debug, info};

use crate::devicetree::discovery;
use crate::devicetree::fstab::FstabSnapshot;
use crate::entity::report::Report;
use crate::errors::ReconcileError;
use crate::linux::engine::ShellEngine;
use crate::linux::user;
use crate::manifest::gensym;
use crate::reconcile::config::ReconcileConfig;
use crate::reconcile::{self, packages};

use super::sanity;

pub(super) fn run(manifest_file: &str, dry_run: bool, fstab_file: &str) -> Result<Report, ReconcileError> {
    let start = std::time::Instant::now();

    let manifest = super::read_manifest(manifest_file)?;
    sanity::check_disks(&manifest);

    let pool_name_base = gensym::vg_name_base(user::os_id().as_deref(), user::hostname().as_deref());
    let config = ReconcileConfig::from_manifest(&manifest, dry_run).with_pool_name_base(pool_name_base);
    debug!("reconciling with {config:?}");

    sanity::check_commands()?;
    let mut tree = discovery::discover(Box::new(ShellEngine))?;
    let fstab = FstabSnapshot::read(fstab_file, &tree)?;

    let result = reconcile::reconcile(manifest, &mut tree, &fstab, &config)?;
    info!("reconciled {manifest_file} in {:?}", start.elapsed());

    Ok(Report {
        manifest: manifest_file.to_string(),
        result,
        dry_run,
        duration: start.elapsed(),
    })
}

/// Host packages required by the manifest, without looking at the system
pub(super) fn packages(manifest_file: &str) -> Result<Vec<String>, ReconcileError> {
    let manifest = super::read_manifest(manifest_file)?;
    let config = ReconcileConfig::from_manifest(&manifest, true);

    Ok(packages::required_packages(&manifest, &config))
}
