use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::utils::shell;

/// LVM size argument in bytes
fn size_arg(size: Size) -> String {
    format!("{}b", size.bytes())
}

/// Executes:
/// ```shell
/// pvcreate -y ${{ pv }}
/// ```
pub fn create_pv(pv: &str) -> Result<(), ReconcileError> {
    shell::exec("pvcreate", &["-y", pv])
}

pub fn remove_pv(pv: &str) -> Result<(), ReconcileError> {
    shell::exec("pvremove", &["-y", pv])
}

/// Executes:
/// ```shell
/// vgcreate -s ${{ pe_size }} ${{ vg }} ${{ pvs }}
/// ```
pub fn create_vg(vg: &str, pe_size: Size, pvs: &[&str]) -> Result<(), ReconcileError> {
    let pe = size_arg(pe_size);
    let mut args = vec!["-s", pe.as_str(), vg];
    args.extend(pvs);

    shell::exec("vgcreate", &args)
}

pub fn remove_vg(vg: &str) -> Result<(), ReconcileError> {
    shell::exec("vgremove", &["-y", vg])
}

pub fn extend_vg(vg: &str, pv: &str) -> Result<(), ReconcileError> {
    shell::exec("vgextend", &[vg, pv])
}

/// Moves extents off `pv` before dropping it from `vg`
pub fn reduce_vg(vg: &str, pv: &str) -> Result<(), ReconcileError> {
    shell::exec("pvmove", &[pv])?;
    shell::exec("vgreduce", &[vg, pv])
}

/// Executes:
/// ```shell
/// lvcreate -y [--type ${{ seg }}] -L ${{ size }}b -n ${{ lv }} ${{ vg }}
/// ```
pub fn create_lv(vg: &str, lv: &str, size: Size, segment: Option<&str>) -> Result<(), ReconcileError> {
    let size = size_arg(size);
    let mut args = vec!["-y"];
    if let Some(segment) = segment {
        args.extend(["--type", segment]);
    }
    args.extend(["-L", size.as_str(), "-n", lv, vg]);

    shell::exec("lvcreate", &args)
}

/// Executes:
/// ```shell
/// lvcreate -y -T ${{ vg }}/${{ pool }} -L ${{ size }}b --poolmetadatasize ${{ meta }}b
/// ```
pub fn create_thin_pool(vg: &str, pool: &str, size: Size, metadata: Size) -> Result<(), ReconcileError> {
    let target = format!("{vg}/{pool}");
    let size = size_arg(size);
    let metadata = size_arg(metadata);

    shell::exec(
        "lvcreate",
        &["-y", "-T", &target, "-L", &size, "--poolmetadatasize", &metadata],
    )
}

/// Executes:
/// ```shell
/// lvcreate -y -T ${{ vg }}/${{ pool }} -V ${{ size }}b -n ${{ lv }}
/// ```
pub fn create_thin_lv(vg: &str, pool: &str, lv: &str, size: Size) -> Result<(), ReconcileError> {
    let target = format!("{vg}/{pool}");
    let size = size_arg(size);

    shell::exec("lvcreate", &["-y", "-T", &target, "-V", &size, "-n", lv])
}

pub struct VdoArgs<'a> {
    pub vg: &'a str,
    pub pool: &'a str,
    pub lv: &'a str,
    pub pool_size: Size,
    pub virtual_size: Size,
    pub deduplication: bool,
    pub compression: bool,
}

/// Executes:
/// ```shell
/// lvcreate -y --type vdo -n ${{ lv }} -L ${{ pool_size }}b -V ${{ virtual_size }}b \
///     --deduplication y|n --compression y|n ${{ vg }}/${{ pool }}
/// ```
pub fn create_vdo(args: &VdoArgs) -> Result<(), ReconcileError> {
    let yes_no = |b: bool| if b { "y" } else { "n" };
    let target = format!("{}/{}", args.vg, args.pool);
    let pool_size = size_arg(args.pool_size);
    let virtual_size = size_arg(args.virtual_size);

    shell::exec(
        "lvcreate",
        &[
            "-y",
            "--type",
            "vdo",
            "-n",
            args.lv,
            "-L",
            &pool_size,
            "-V",
            &virtual_size,
            "--deduplication",
            yes_no(args.deduplication),
            "--compression",
            yes_no(args.compression),
            &target,
        ],
    )
}

pub fn remove_lv(vg: &str, lv: &str) -> Result<(), ReconcileError> {
    shell::exec("lvremove", &["-y", &format!("{vg}/{lv}")])
}

pub fn resize_lv(vg: &str, lv: &str, size: Size) -> Result<(), ReconcileError> {
    let size = size_arg(size);
    shell::exec("lvresize", &["-y", "-L", &size, &format!("{vg}/{lv}")])
}

/// Creates a cache pool named `<lv>_cache` on `devices` and attaches it to `lv`
pub fn attach_cache(
    vg: &str,
    lv: &str,
    size: Size,
    mode: &str,
    devices: &[String],
) -> Result<(), ReconcileError> {
    let cache_name = format!("{lv}_cache");
    let size = size_arg(size);

    let mut args = vec!["-y", "--type", "cache-pool", "-L", size.as_str(), "-n", &cache_name, vg];
    args.extend(devices.iter().map(|d| d.as_str()));
    shell::exec("lvcreate", &args)?;

    shell::exec(
        "lvconvert",
        &[
            "-y",
            "--type",
            "cache",
            "--cachepool",
            &format!("{vg}/{cache_name}"),
            "--cachemode",
            mode,
            &format!("{vg}/{lv}"),
        ],
    )
}

pub fn detach_cache(vg: &str, lv: &str) -> Result<(), ReconcileError> {
    shell::exec("lvconvert", &["-y", "--uncache", &format!("{vg}/{lv}")])
}

const REPORT_ARGS: [&str; 5] = ["--noheadings", "--units", "b", "--nosuffix", "--separator=:"];

/// `pv_name:vg_name:pv_size` per line
pub fn report_pvs() -> Result<String, ReconcileError> {
    let mut args = REPORT_ARGS.to_vec();
    args.extend(["-o", "pv_name,vg_name,pv_size"]);

    shell::output("pvs", &args)
}

/// `vg_name:vg_size:vg_extent_size` per line
pub fn report_vgs() -> Result<String, ReconcileError> {
    let mut args = REPORT_ARGS.to_vec();
    args.extend(["-o", "vg_name,vg_size,vg_extent_size"]);

    shell::output("vgs", &args)
}

/// `lv_name:vg_name:lv_size:segtype:pool_lv:lv_dm_path:lv_metadata_size:cache_mode` per line
pub fn report_lvs() -> Result<String, ReconcileError> {
    let mut args = REPORT_ARGS.to_vec();
    args.extend([
        "-o",
        "lv_name,vg_name,lv_size,segtype,pool_lv,lv_dm_path,lv_metadata_size,cache_mode",
    ]);

    shell::output("lvs", &args)
}
