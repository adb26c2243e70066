use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::constants::sizes;
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::manifest::PartitionTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub path: String,
    /// Extra paths resolving to this device, e.g. /dev/md/<name> links
    pub aliases: Vec<String>,
    pub kind: DeviceKind,
    /// Devices this one is built on top of
    pub parents: Vec<DeviceId>,
    pub size: Size,
    pub format: Format,
    /// Whether the device is already on the system or only scheduled
    pub exists: bool,
}

impl Device {
    pub fn is_disk(&self) -> bool {
        matches!(self.kind, DeviceKind::Disk)
    }

    pub fn is_luks(&self) -> bool {
        matches!(self.kind, DeviceKind::Luks)
    }

    pub fn is_vg(&self) -> bool {
        matches!(self.kind, DeviceKind::LvmVg { .. })
    }

    pub fn lv_kind(&self) -> Option<&LvKind> {
        match &self.kind {
            DeviceKind::LvmLv { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            DeviceKind::Disk => "disk",
            DeviceKind::Partition { .. } => "partition",
            DeviceKind::Md { .. } => "mdarray",
            DeviceKind::LvmVg { .. } => "lvmvg",
            DeviceKind::LvmLv { kind, .. } => match kind {
                LvKind::ThinPool { .. } => "lvmthinpool",
                LvKind::Thin => "lvmthinlv",
                LvKind::VdoPool { .. } => "lvmvdopool",
                LvKind::Vdo => "lvmvdolv",
                _ => "lvmlv",
            },
            DeviceKind::Luks => "luks/dm-crypt",
            DeviceKind::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceKind {
    Disk,

    Partition {
        number: u32,
    },

    Md {
        level: RaidLevel,
        active: u32,
        spare: u32,
        chunk_size: Option<Size>,
        metadata: Option<String>,
    },

    LvmVg {
        pe_size: Size,
    },

    LvmLv {
        vg: String,
        lv: String,
        kind: LvKind,
        cache: Option<LvCache>,
    },

    /// An open dm-crypt mapping on top of a LUKS-formatted device
    Luks,

    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LvKind {
    Linear,
    Raid { level: RaidLevel },
    ThinPool { metadata_size: Size },
    Thin,
    VdoPool { deduplication: bool, compression: bool },
    Vdo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LvCache {
    pub size: Size,
    pub mode: String,
    /// Paths of the fast PVs holding the cache
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Format {
    pub kind: FormatKind,
    pub exists: bool,
    pub uuid: Option<String>,
    pub label: Option<String>,
    pub create_options: Option<String>,
    /// Where the format is currently mounted, if anywhere
    pub mountpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FormatKind {
    #[default]
    None,
    Fs(String),
    Swap,
    LvmPv,
    Luks(LuksParams),
    MdMember,
    DiskLabel(PartitionTable),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LuksParams {
    pub version: String,
    pub cipher: Option<String>,
    pub key_size: Option<u32>,
    pub password: Option<String>,
    pub key_file: Option<String>,
    /// dm-crypt mapping name
    pub map_name: String,
}

impl Format {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(kind: FormatKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn fs(fs_type: &str) -> Self {
        match fs_type {
            "swap" => Self::new(FormatKind::Swap),
            "lvmpv" => Self::new(FormatKind::LvmPv),
            "mdmember" => Self::new(FormatKind::MdMember),
            "" | "none" => Self::none(),
            t => Self::new(FormatKind::Fs(t.to_string())),
        }
    }

    pub fn existing(mut self, uuid: Option<String>) -> Self {
        self.exists = true;
        self.uuid = uuid;
        self
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, FormatKind::None)
    }

    pub fn type_name(&self) -> Option<&str> {
        match &self.kind {
            FormatKind::None => None,
            FormatKind::Fs(t) => Some(t.as_str()),
            FormatKind::Swap => Some("swap"),
            FormatKind::LvmPv => Some("lvmpv"),
            FormatKind::Luks(_) => Some("luks"),
            FormatKind::MdMember => Some("mdmember"),
            FormatKind::DiskLabel(_) => Some("disklabel"),
        }
    }

    pub fn is_mountable(&self) -> bool {
        matches!(self.kind, FormatKind::Fs(_))
    }

    pub fn is_swap(&self) -> bool {
        matches!(self.kind, FormatKind::Swap)
    }

    pub fn luks(&self) -> Option<&LuksParams> {
        match &self.kind {
            FormatKind::Luks(params) => Some(params),
            _ => None,
        }
    }

    /// Whether the format can follow its device when it shrinks
    pub fn can_shrink(&self) -> bool {
        match &self.kind {
            FormatKind::Fs(t) => matches!(t.as_str(), "ext2" | "ext3" | "ext4" | "btrfs" | "ntfs"),
            FormatKind::None | FormatKind::Swap => true,
            _ => false,
        }
    }
}

impl LuksParams {
    pub fn header_size(&self) -> Size {
        match self.version.as_str() {
            "luks1" => Size(sizes::LUKS1_HEADER),
            _ => Size(sizes::LUKS2_HEADER),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidLevel {
    Linear,
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid4 => "raid4",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
        }
    }

    pub fn min_members(&self) -> u32 {
        match self {
            Self::Linear => 1,
            Self::Raid0 | Self::Raid1 | Self::Raid10 => 2,
            Self::Raid4 | Self::Raid5 => 3,
            Self::Raid6 => 4,
        }
    }

    pub fn uses_chunks(&self) -> bool {
        !matches!(self, Self::Linear | Self::Raid1)
    }

    /// Usable size of an array of `active` members of `member` size each
    pub fn data_size(&self, member: Size, active: u32) -> Size {
        let n = u64::from(active);
        match self {
            Self::Linear | Self::Raid0 => member * n,
            Self::Raid1 => member,
            Self::Raid4 | Self::Raid5 => member * n.saturating_sub(1),
            Self::Raid6 => member * n.saturating_sub(2),
            Self::Raid10 => Size(member.bytes() * n / 2),
        }
    }

    /// Space taken in a volume group by an LV of `size` with this segment type
    pub fn lvm_footprint(&self, size: Size, pvs: u32) -> Size {
        let n = u64::from(pvs.max(1));
        match self {
            Self::Linear | Self::Raid0 => size,
            Self::Raid1 | Self::Raid10 => size * 2,
            Self::Raid4 | Self::Raid5 if n > 1 => Size((size.bytes() * n).div_ceil(n - 1)),
            Self::Raid6 if n > 2 => Size((size.bytes() * n).div_ceil(n - 2)),
            _ => size,
        }
    }
}

impl FromStr for RaidLevel {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "raid0" | "0" | "stripe" | "striped" => Ok(Self::Raid0),
            "raid1" | "1" | "mirror" => Ok(Self::Raid1),
            "raid4" | "4" => Ok(Self::Raid4),
            "raid5" | "5" => Ok(Self::Raid5),
            "raid6" | "6" => Ok(Self::Raid6),
            "raid10" | "10" => Ok(Self::Raid10),
            _ => Err(ReconcileError::UnknownType(format!("unknown raid level '{s}'"))),
        }
    }
}

/// Escapes a name for use in a device-mapper name, e.g. `my-vg` -> `my--vg`
pub fn dm_escape(name: &str) -> String {
    name.replace('-', "--")
}
