//! Builds a `DeviceTree` out of what the host reports about its block devices

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use super::device::{Device, DeviceId, DeviceKind, Format, FormatKind, LuksParams, LvCache, LvKind, RaidLevel};
use super::engine::Engine;
use super::DeviceTree;
use crate::constants::defaults;
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::linux::lsblk::{self, EntryLsblk};
use crate::linux::{lvm, partition_number};
use crate::manifest::PartitionTable;
use crate::utils::{fs, shell};

/// Raw discovery output, kept apart from parsing for testability
#[derive(Debug, Default, Clone)]
pub struct Sources {
    pub lsblk: Vec<EntryLsblk>,
    pub pvs: String,
    pub vgs: String,
    pub lvs: String,
    /// `(link, target)` pairs from /dev/md
    pub md_links: Vec<(String, String)>,
}

impl Sources {
    pub fn collect() -> Result<Self, ReconcileError> {
        let lsblk = lsblk::run_lsblk()?;

        let report = |name: &str, f: fn() -> Result<String, ReconcileError>| {
            if !shell::in_path(name) {
                debug!("{name} not in path, assuming no lvm devices");
                return String::new();
            }

            f().unwrap_or_else(|err| {
                warn!("failed to get lvm report from {name}: {err}");
                String::new()
            })
        };

        Ok(Self {
            lsblk,
            pvs: report("pvs", lvm::report_pvs),
            vgs: report("vgs", lvm::report_vgs),
            lvs: report("lvs", lvm::report_lvs),
            md_links: fs::symlink_targets("/dev/md"),
        })
    }
}

pub fn discover(engine: Box<dyn Engine>) -> Result<DeviceTree, ReconcileError> {
    let sources = Sources::collect()?;
    build_tree(engine, &sources)
}

#[derive(Debug)]
struct Node {
    key: String,
    device: Device,
    parents: Vec<String>,
}

#[derive(Debug, Clone)]
struct LvReport {
    name: String,
    vg: String,
    size: Size,
    segtype: String,
    pool: String,
    dm_path: String,
    metadata_size: Size,
    cache_mode: String,
}

fn report_fields(report: &str, count: usize) -> Result<Vec<Vec<String>>, ReconcileError> {
    report
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let fields: Vec<String> = line.split(':').map(|f| f.trim().to_string()).collect();
            match fields.len() >= count {
                true => Ok(fields),
                false => Err(ReconcileError::CmdFailed {
                    error: None,
                    context: format!("unexpected lvm report line: {line}"),
                }),
            }
        })
        .collect()
}

fn parse_bytes(s: &str) -> Result<Size, ReconcileError> {
    if s.is_empty() {
        return Ok(Size::ZERO);
    }

    s.parse::<u64>().map(Size).map_err(|err| ReconcileError::CmdFailed {
        error: None,
        context: format!("bad size '{s}' in device report: {err}"),
    })
}

fn parse_lvs(report: &str) -> Result<Vec<LvReport>, ReconcileError> {
    report_fields(report, 8)?
        .into_iter()
        .map(|f| {
            Ok(LvReport {
                name: f[0].clone(),
                vg: f[1].clone(),
                size: parse_bytes(&f[2])?,
                segtype: f[3].clone(),
                pool: f[4].clone(),
                dm_path: f[5].clone(),
                metadata_size: parse_bytes(&f[6])?,
                cache_mode: f[7].clone(),
            })
        })
        .collect()
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn some(s: &str) -> Option<String> {
    match s.is_empty() {
        true => None,
        false => Some(s.to_string()),
    }
}

fn format_of(entry: &EntryLsblk, luks_name: Option<String>) -> Format {
    let kind = match entry.fstype.as_str() {
        "LVM2_member" => FormatKind::LvmPv,
        "linux_raid_member" => FormatKind::MdMember,
        "swap" => FormatKind::Swap,
        "crypto_LUKS" => FormatKind::Luks(LuksParams {
            version: defaults::LUKS_VERSION.to_string(),
            map_name: luks_name.unwrap_or_else(|| format!("luks-{}", entry.uuid)),
            ..Default::default()
        }),
        "" if entry.dev_type == "disk" => match entry.pttype.as_str() {
            "gpt" => FormatKind::DiskLabel(PartitionTable::Gpt),
            "dos" => FormatKind::DiskLabel(PartitionTable::Msdos),
            _ => FormatKind::None,
        },
        "" => FormatKind::None,
        fs_type => FormatKind::Fs(fs_type.to_string()),
    };

    if kind == FormatKind::None {
        return Format::none();
    }

    let mut format = Format::new(kind).existing(some(&entry.uuid));
    format.label = some(&entry.label);
    format.mountpoint = some(&entry.mountpoint);
    format
}

fn lv_kind(lv: &LvReport) -> LvKind {
    let segtype = lv.segtype.as_str();

    match segtype {
        "thin-pool" => LvKind::ThinPool {
            metadata_size: lv.metadata_size,
        },
        "thin" => LvKind::Thin,
        "vdo-pool" => LvKind::VdoPool {
            deduplication: true,
            compression: true,
        },
        "vdo" => LvKind::Vdo,
        _ if segtype.starts_with("raid") => {
            let level = segtype.split('_').next().unwrap_or(segtype);
            match level.parse::<RaidLevel>() {
                Ok(level) => LvKind::Raid { level },
                Err(_) => LvKind::Linear,
            }
        }
        _ => LvKind::Linear,
    }
}

/// Assembles discovered devices into a tree. Devices are added
/// once all their parents are present.
pub fn build_tree(engine: Box<dyn Engine>, sources: &Sources) -> Result<DeviceTree, ReconcileError> {
    // lsblk repeats a device once per parent
    let mut entries: BTreeMap<String, (EntryLsblk, Vec<String>)> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut knames: HashMap<String, String> = HashMap::new();

    for entry in &sources.lsblk {
        knames.insert(entry.kname.clone(), entry.name.clone());

        let (_, parents) = entries.entry(entry.name.clone()).or_insert_with(|| {
            order.push(entry.name.clone());
            (entry.clone(), Vec::new())
        });

        if !entry.pkname.is_empty() && !parents.contains(&entry.pkname) {
            parents.push(entry.pkname.clone());
        }
    }

    let to_name = |path: &str| knames.get(path).cloned().unwrap_or_else(|| path.to_string());

    // Name of the crypt mapping opened on top of each LUKS device
    let mut luks_names: HashMap<String, String> = HashMap::new();
    for (entry, parents) in entries.values() {
        if entry.dev_type == "crypt" {
            for parent in parents {
                luks_names.insert(to_name(parent), basename(&entry.name));
            }
        }
    }

    let mut nodes: Vec<Node> = Vec::new();

    for name in &order {
        let (entry, parents) = &entries[name];

        let kind = match entry.dev_type.as_str() {
            "disk" => DeviceKind::Disk,
            "part" => DeviceKind::Partition {
                number: partition_number(&entry.name).unwrap_or_default(),
            },
            "crypt" => DeviceKind::Luks,
            "lvm" | "rom" => continue,
            t if t.starts_with("raid") || t == "linear" || t == "md" => DeviceKind::Md {
                level: t.parse().unwrap_or(RaidLevel::Linear),
                active: parents.len() as u32,
                spare: 0,
                chunk_size: None,
                metadata: None,
            },
            t => DeviceKind::Other(t.to_string()),
        };

        let aliases = sources
            .md_links
            .iter()
            .filter(|(_, target)| *target == entry.name || *target == entry.kname)
            .map(|(link, _)| link.clone())
            .collect();

        nodes.push(Node {
            key: entry.name.clone(),
            device: Device {
                id: DeviceId(0),
                name: basename(&entry.name),
                path: entry.name.clone(),
                aliases,
                kind,
                parents: Vec::new(),
                size: parse_bytes(&entry.size)?,
                format: format_of(entry, luks_names.get(&entry.name).cloned()),
                exists: true,
            },
            parents: parents.iter().map(|p| to_name(p)).collect(),
        });
    }

    let mut vg_members: HashMap<String, Vec<String>> = HashMap::new();
    for fields in report_fields(&sources.pvs, 2)? {
        if !fields[1].is_empty() {
            vg_members
                .entry(fields[1].clone())
                .or_default()
                .push(to_name(&fields[0]));
        }
    }

    for fields in report_fields(&sources.vgs, 3)? {
        let name = fields[0].clone();

        nodes.push(Node {
            key: format!("vg:{name}"),
            device: Device {
                id: DeviceId(0),
                name: name.clone(),
                path: format!("/dev/{name}"),
                aliases: Vec::new(),
                kind: DeviceKind::LvmVg {
                    pe_size: parse_bytes(&fields[2])?,
                },
                parents: Vec::new(),
                size: parse_bytes(&fields[1])?,
                format: Format::none(),
                exists: true,
            },
            parents: vg_members.remove(&name).unwrap_or_default(),
        });
    }

    let lvs = parse_lvs(&sources.lvs)?;
    for lv in &lvs {
        let kind = lv_kind(lv);

        let parent = match kind {
            LvKind::Thin | LvKind::Vdo => lvs
                .iter()
                .find(|p| p.vg == lv.vg && p.name == lv.pool)
                .map(|p| p.dm_path.clone())
                .unwrap_or_else(|| format!("vg:{}", lv.vg)),
            _ => format!("vg:{}", lv.vg),
        };

        let cache = match lv.segtype.as_str() {
            "cache" => Some(LvCache {
                size: Size::ZERO,
                mode: lv.cache_mode.clone(),
                devices: Vec::new(),
            }),
            _ => None,
        };

        let format = entries
            .get(&lv.dm_path)
            .map(|(entry, _)| format_of(entry, luks_names.get(&lv.dm_path).cloned()))
            .unwrap_or_default();

        nodes.push(Node {
            key: lv.dm_path.clone(),
            device: Device {
                id: DeviceId(0),
                name: basename(&lv.dm_path),
                path: lv.dm_path.clone(),
                aliases: Vec::new(),
                kind: DeviceKind::LvmLv {
                    vg: lv.vg.clone(),
                    lv: lv.name.clone(),
                    kind,
                    cache,
                },
                parents: Vec::new(),
                size: lv.size,
                format,
                exists: true,
            },
            parents: vec![parent],
        });
    }

    let mut tree = DeviceTree::new(engine);
    let mut ids: HashMap<String, DeviceId> = HashMap::new();

    while !nodes.is_empty() {
        let (ready, waiting): (Vec<Node>, Vec<Node>) = nodes
            .into_iter()
            .partition(|node| node.parents.iter().all(|p| ids.contains_key(p)));

        if ready.is_empty() {
            for node in &waiting {
                warn!("skipping device {} with unknown parents {:?}", node.key, node.parents);
            }
            break;
        }

        for mut node in ready {
            node.device.parents = node.parents.iter().map(|p| ids[p]).collect();
            let id = tree.add_existing(node.device);
            ids.insert(node.key, id);
        }

        nodes = waiting;
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::sizes::{GIB, MIB};
    use crate::devicetree::testing::MemoryEngine;

    const LSBLK: &str = r#"NAME="/dev/sda" KNAME="/dev/sda" PKNAME="" TYPE="disk" SIZE="107374182400" FSTYPE="" LABEL="" UUID="" MOUNTPOINT="" PTTYPE="gpt"
NAME="/dev/sda1" KNAME="/dev/sda1" PKNAME="/dev/sda" TYPE="part" SIZE="536870912" FSTYPE="vfat" LABEL="EFI" UUID="4B1F-22AA" MOUNTPOINT="/boot/efi" PTTYPE="gpt"
NAME="/dev/sda2" KNAME="/dev/sda2" PKNAME="/dev/sda" TYPE="part" SIZE="106836262912" FSTYPE="LVM2_member" LABEL="" UUID="pv-uuid" MOUNTPOINT="" PTTYPE="gpt"
NAME="/dev/mapper/sys-root" KNAME="/dev/dm-0" PKNAME="/dev/sda2" TYPE="lvm" SIZE="21474836480" FSTYPE="xfs" LABEL="" UUID="root-uuid" MOUNTPOINT="/" PTTYPE=""
NAME="/dev/sdb" KNAME="/dev/sdb" PKNAME="" TYPE="disk" SIZE="10737418240" FSTYPE="crypto_LUKS" LABEL="" UUID="luks-uuid" MOUNTPOINT="" PTTYPE=""
NAME="/dev/mapper/secret" KNAME="/dev/dm-1" PKNAME="/dev/sdb" TYPE="crypt" SIZE="10720641024" FSTYPE="ext4" LABEL="" UUID="ext4-uuid" MOUNTPOINT="" PTTYPE=""
NAME="/dev/sdc" KNAME="/dev/sdc" PKNAME="" TYPE="disk" SIZE="10737418240" FSTYPE="linux_raid_member" LABEL="" UUID="md-uuid" MOUNTPOINT="" PTTYPE=""
NAME="/dev/md127" KNAME="/dev/md127" PKNAME="/dev/sdc" TYPE="raid1" SIZE="10735321088" FSTYPE="" LABEL="" UUID="" MOUNTPOINT="" PTTYPE=""
NAME="/dev/sdd" KNAME="/dev/sdd" PKNAME="" TYPE="disk" SIZE="10737418240" FSTYPE="linux_raid_member" LABEL="" UUID="md-uuid" MOUNTPOINT="" PTTYPE=""
NAME="/dev/md127" KNAME="/dev/md127" PKNAME="/dev/sdd" TYPE="raid1" SIZE="10735321088" FSTYPE="" LABEL="" UUID="" MOUNTPOINT="" PTTYPE=""
NAME="/dev/sr0" KNAME="/dev/sr0" PKNAME="" TYPE="rom" SIZE="1073741312" FSTYPE="" LABEL="" UUID="" MOUNTPOINT="" PTTYPE=""
"#;

    fn sources() -> Sources {
        Sources {
            lsblk: lsblk::parse_lsblk(LSBLK).expect("bad lsblk fixture"),
            pvs: "  /dev/sda2:sys:106836262912\n".to_string(),
            vgs: "  sys:106833117184:4194304\n".to_string(),
            lvs: [
                "  root:sys:21474836480:linear::/dev/mapper/sys-root:0:",
                "  pool:sys:10737418240:thin-pool::/dev/mapper/sys-pool:12582912:",
                "  scratch:sys:53687091200:thin:pool:/dev/mapper/sys-scratch:0:",
            ]
            .join("\n"),
            md_links: vec![("/dev/md/data".to_string(), "/dev/md127".to_string())],
        }
    }

    #[test]
    fn test_build_tree() {
        let tree = build_tree(Box::<MemoryEngine>::default(), &sources()).expect("failed to build tree");

        assert!(tree.resolve("/dev/sr0").is_none());

        let sda = tree.resolve("sda").expect("no sda");
        assert_eq!(FormatKind::DiskLabel(PartitionTable::Gpt), sda.format.kind);
        assert_eq!(Size(100 * GIB), sda.size);

        let efi = tree.resolve("LABEL=EFI").expect("no efi partition");
        assert_eq!("/dev/sda1", efi.path);
        assert_eq!(DeviceKind::Partition { number: 1 }, efi.kind);
        assert_eq!(Some("/boot/efi"), efi.format.mountpoint.as_deref());

        let vg = tree.resolve("sys").expect("no vg");
        assert!(vg.is_vg());
        assert_eq!(vec![tree.resolve_id("/dev/sda2").unwrap()], vg.parents);

        let root = tree.resolve("/dev/sys/root").expect("no root lv");
        assert_eq!(Some("xfs"), root.format.type_name());
        assert_eq!(Some("root-uuid".to_string()), root.format.uuid);
        assert_eq!(vec![vg.id], root.parents);

        let pool = tree.resolve("sys-pool").expect("no thin pool");
        assert_eq!(
            Some(&LvKind::ThinPool {
                metadata_size: Size(12 * MIB)
            }),
            pool.lv_kind()
        );

        let scratch = tree.resolve("/dev/mapper/sys-scratch").expect("no thin lv");
        assert_eq!(vec![pool.id], scratch.parents);

        let sdb = tree.resolve("sdb").expect("no sdb");
        assert_eq!(Some("secret"), sdb.format.luks().map(|p| p.map_name.as_str()));
        let secret = tree.luks_child(sdb.id).expect("luks mapping not linked");
        assert_eq!("/dev/mapper/secret", tree.get(secret).unwrap().path);

        let md = tree.resolve("/dev/md/data").expect("md alias not resolved");
        assert_eq!("/dev/md127", md.path);
        assert_eq!(2, md.parents.len());
        assert!(matches!(
            md.kind,
            DeviceKind::Md {
                level: RaidLevel::Raid1,
                active: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_bad_reports() {
        let mut sources = sources();
        sources.vgs = "sys\n".to_string();

        assert!(build_tree(Box::<MemoryEngine>::default(), &sources).is_err());
        assert_eq!(Size::ZERO, parse_bytes("").unwrap());
        assert!(parse_bytes("12x").is_err());
    }
}
