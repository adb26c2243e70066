pub mod defaults {
    pub const MANIFEST: &str = "./manifest.yaml";
    pub const FSTAB: &str = "/etc/fstab";

    pub const FS_TYPE: &str = "xfs";
    pub const MOUNT_OPTIONS: &str = "defaults";
    pub const MOUNT_CHECK: u32 = 0;
    pub const MOUNT_PASSNO: u32 = 0;

    pub const LUKS_VERSION: &str = "luks2";
    pub const CACHE_MODE: &str = "writethrough";
    pub const THIN_POOL_NAME: &str = "thinpool";

    pub const MAX_TRIM_PERCENT: f64 = 2.0;

    pub const LOG_FILTER: &str = "info";
}

pub mod sizes {
    pub const KIB: u64 = 1024;
    pub const MIB: u64 = 1024 * KIB;
    pub const GIB: u64 = 1024 * MIB;

    /// Initial size of grow-to-fit partitions
    pub const PARTITION_INITIAL: u64 = 256 * MIB;
    /// Alignment and reserved head of partitioned disks
    pub const PARTITION_ALIGN: u64 = MIB;

    pub const LVM_PE_SIZE: u64 = 4 * MIB;
    /// Space taken by LVM metadata at the start of every PV
    pub const LVM_PV_METADATA: u64 = MIB;

    pub const THIN_META_PERCENT: u64 = 1;
    pub const THIN_META_MIN: u64 = 4 * MIB;
    pub const THIN_META_MAX: u64 = 16 * GIB;

    pub const LUKS1_HEADER: u64 = 2 * MIB;
    pub const LUKS2_HEADER: u64 = 16 * MIB;

    pub const MD_CHUNK_ALIGN: u64 = 4 * KIB;
    pub const MD_DEFAULT_CHUNK: u64 = 512 * KIB;
    pub const MD_SUPERBLOCK: u64 = 2 * MIB;
}

pub const ENV_FSTAB: &str = "BLKSTACK_FSTAB";

pub const DEVICE_SEARCH_DIRS: [&str; 3] = ["/dev", "/dev/mapper", "/dev/md"];

// Use programs instead of bindings to avoid API dependencies
pub const REQUIRED_COMMANDS: [&str; 8] = [
    "lsblk",
    "blkid",
    "pvs",
    "lvs",
    "wipefs",
    "sfdisk",
    "mount",
    "umount",
];

/// Host packages providing the tooling for each filesystem type
pub const FS_PACKAGES: [(&str, &str); 7] = [
    ("xfs", "xfsprogs"),
    ("ext2", "e2fsprogs"),
    ("ext3", "e2fsprogs"),
    ("ext4", "e2fsprogs"),
    ("vfat", "dosfstools"),
    ("btrfs", "btrfs-progs"),
    ("ntfs", "ntfs-3g"),
];

pub mod packages {
    pub const LVM: &str = "lvm2";
    pub const MDADM: &str = "mdadm";
    pub const CRYPTSETUP: &str = "cryptsetup";
    pub const THIN: &str = "device-mapper-persistent-data";
    pub const VDO: [&str; 2] = ["vdo", "kmod-kvdo"];
}
