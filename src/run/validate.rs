use crate::errors::ReconcileError;
use crate::manifest::{gensym, validation};

pub(super) fn run(manifest_file: &str) -> Result<(), ReconcileError> {
    let start = std::time::Instant::now();

    let manifest = super::read_manifest(manifest_file)?;
    let mut manifest = validation::normalize(manifest)?;

    // Generated names only need to be distinct from each other here
    gensym::fill_pool_names(&mut manifest, "vg", &[]);
    validation::validate(&manifest)?;

    println!(
        "{}",
        serde_json::json!({
            "manifest": manifest_file,
            "valid": true,
            "elapsedTime": start.elapsed().as_secs_f64(),
        })
    );

    Ok(())
}
