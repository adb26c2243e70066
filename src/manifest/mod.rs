pub mod defaults;
pub mod gensym;
pub mod validation;

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::ReconcileError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub pools: Vec<PoolSpec>,

    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    #[serde(alias = "disklabel", alias = "partition_table")]
    pub disklabel_type: Option<PartitionTable>,

    pub safe_mode: Option<bool>,

    pub use_partitions: Option<bool>,

    #[serde(default)]
    pub packages_only: bool,

    #[serde(default)]
    pub pool_defaults: PoolSpec,

    #[serde(default)]
    pub volume_defaults: VolumeSpec,

    #[serde(default)]
    pub diskvolume_mkfs_option_map: BTreeMap<String, String>,

    #[serde(alias = "trim_percent")]
    pub max_trim_percent: Option<f64>,
}

impl Manifest {
    #[inline]
    pub fn from_yaml(manifest_yaml: &str) -> Result<Self, ReconcileError> {
        parse(manifest_yaml)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionTable {
    #[serde(rename = "gpt")]
    Gpt,

    #[serde(rename = "msdos", alias = "mbr", alias = "dos", alias = "mbr-dos")]
    Msdos,
}

impl PartitionTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Msdos => "msdos",
        }
    }
}

impl FromStr for PartitionTable {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gpt" => Ok(Self::Gpt),
            "msdos" | "dos" | "mbr" => Ok(Self::Msdos),
            _ => Err(ReconcileError::UnknownType(format!("unknown disklabel type '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    #[default]
    #[serde(rename = "present")]
    Present,

    #[serde(rename = "absent")]
    Absent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub pool_type: Option<String>,

    #[serde(default)]
    pub disks: Vec<String>,

    pub state: Option<State>,

    #[serde(flatten)]
    pub encryption: EncryptionSpec,

    #[serde(flatten)]
    pub raid: RaidSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub volume_type: Option<String>,

    pub pool: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<String>,

    pub size: Option<String>,

    #[serde(alias = "fstype")]
    pub fs_type: Option<String>,

    pub fs_label: Option<String>,

    pub fs_create_options: Option<String>,

    #[serde(alias = "mount", alias = "mountpoint")]
    pub mount_point: Option<String>,

    #[serde(alias = "mntopts")]
    pub mount_options: Option<String>,

    pub mount_check: Option<u32>,

    pub mount_passno: Option<u32>,

    pub state: Option<State>,

    #[serde(flatten)]
    pub encryption: EncryptionSpec,

    #[serde(flatten)]
    pub raid: RaidSpec,

    #[serde(flatten)]
    pub cache: CacheSpec,

    #[serde(flatten)]
    pub thin: ThinSpec,

    #[serde(flatten)]
    pub vdo: VdoSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionSpec {
    #[serde(rename = "encryption")]
    pub enabled: Option<bool>,

    #[serde(rename = "encryption_cipher")]
    pub cipher: Option<String>,

    #[serde(rename = "encryption_key_size")]
    pub key_size: Option<u32>,

    #[serde(rename = "encryption_luks_version")]
    pub luks_version: Option<String>,

    #[serde(rename = "encryption_password", skip_serializing)]
    pub password: Option<String>,

    #[serde(rename = "encryption_key")]
    pub key_file: Option<String>,
}

impl EncryptionSpec {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaidSpec {
    pub raid_level: Option<String>,
    pub raid_chunk_size: Option<String>,
    pub raid_device_count: Option<u32>,
    pub raid_spare_count: Option<u32>,
    pub raid_metadata_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSpec {
    pub cached: Option<bool>,
    pub cache_size: Option<String>,
    pub cache_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_devices: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinSpec {
    pub thin: Option<bool>,
    pub thin_pool_name: Option<String>,
    pub thin_pool_size: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VdoSpec {
    pub deduplication: Option<bool>,
    pub compression: Option<bool>,
    pub vdo_pool_size: Option<String>,
}

impl VolumeSpec {
    pub fn is_thin(&self) -> bool {
        self.thin.thin.unwrap_or(false)
    }

    pub fn is_cached(&self) -> bool {
        self.cache.cached.unwrap_or(false)
    }

    pub fn is_vdo(&self) -> bool {
        self.vdo.deduplication.unwrap_or(false) || self.vdo.compression.unwrap_or(false)
    }

    pub fn state(&self) -> State {
        self.state.unwrap_or_default()
    }
}

impl PoolSpec {
    pub fn state(&self) -> State {
        self.state.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
    Partition,
    Lvm,
}

impl FromStr for PoolType {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lvm" => Ok(Self::Lvm),
            "partition" | "partition-table" => Ok(Self::Partition),
            _ => Err(ReconcileError::UnknownType(format!("unknown pool type '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    Disk,
    Partition,
    Lvm,
    Raid,
}

impl FromStr for VolumeType {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disk" => Ok(Self::Disk),
            "partition" => Ok(Self::Partition),
            "lvm" => Ok(Self::Lvm),
            "raid" => Ok(Self::Raid),
            _ => Err(ReconcileError::UnknownType(format!("unknown volume type '{s}'"))),
        }
    }
}

impl From<PoolType> for VolumeType {
    fn from(pool_type: PoolType) -> Self {
        match pool_type {
            PoolType::Lvm => Self::Lvm,
            PoolType::Partition => Self::Partition,
        }
    }
}

pub fn parse(manifest_yaml: &str) -> Result<Manifest, ReconcileError> {
    serde_yaml::from_str(manifest_yaml)
        .map_err(|err| ReconcileError::BadManifest(format!("bad manifest yaml: {err}")))
}
