use super::{
    CacheSpec,
    EncryptionSpec,
    PoolSpec,
    RaidSpec,
    ThinSpec,
    VdoSpec,
    VolumeSpec,
};

/// Fills every unset field of `self` from `other`.
/// Explicitly set fields always win, so merges are applied
/// from the most specific source to the least specific one.
pub trait Merge {
    fn merge_from(&mut self, other: &Self);

    fn merged(mut self, other: &Self) -> Self
    where
        Self: Sized,
    {
        self.merge_from(other);
        self
    }
}

macro_rules! merge_options {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $dst.$field.is_none() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

impl Merge for EncryptionSpec {
    fn merge_from(&mut self, other: &Self) {
        merge_options!(self, other, enabled, cipher, key_size, luks_version, password, key_file);
    }
}

impl Merge for RaidSpec {
    fn merge_from(&mut self, other: &Self) {
        merge_options!(
            self,
            other,
            raid_level,
            raid_chunk_size,
            raid_device_count,
            raid_spare_count,
            raid_metadata_version,
        );
    }
}

impl Merge for CacheSpec {
    fn merge_from(&mut self, other: &Self) {
        merge_options!(self, other, cached, cache_size, cache_mode);

        if self.cache_devices.is_empty() {
            self.cache_devices = other.cache_devices.clone();
        }
    }
}

impl Merge for ThinSpec {
    fn merge_from(&mut self, other: &Self) {
        merge_options!(self, other, thin, thin_pool_name, thin_pool_size);
    }
}

impl Merge for VdoSpec {
    fn merge_from(&mut self, other: &Self) {
        merge_options!(self, other, deduplication, compression, vdo_pool_size);
    }
}

// Names and nested volumes are identity, never defaulted
impl Merge for PoolSpec {
    fn merge_from(&mut self, other: &Self) {
        merge_options!(self, other, pool_type, state);

        if self.disks.is_empty() {
            self.disks = other.disks.clone();
        }

        self.encryption.merge_from(&other.encryption);
        self.raid.merge_from(&other.raid);
    }
}

impl Merge for VolumeSpec {
    fn merge_from(&mut self, other: &Self) {
        merge_options!(
            self,
            other,
            volume_type,
            pool,
            size,
            fs_type,
            fs_label,
            fs_create_options,
            mount_point,
            mount_options,
            mount_check,
            mount_passno,
            state,
        );

        if self.disks.is_empty() {
            self.disks = other.disks.clone();
        }

        self.encryption.merge_from(&other.encryption);
        self.raid.merge_from(&other.raid);
        self.cache.merge_from(&other.cache);
        self.thin.merge_from(&other.thin);
        self.vdo.merge_from(&other.vdo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_precedence() {
        let declared = VolumeSpec {
            name: "data".to_string(),
            fs_type: Some("ext4".to_string()),
            ..Default::default()
        };

        let introspected = VolumeSpec {
            fs_type: Some("xfs".to_string()),
            size: Some("10 GiB".to_string()),
            ..Default::default()
        };

        let defaults = VolumeSpec {
            name: "ignored".to_string(),
            size: Some("1 GiB".to_string()),
            mount_options: Some("defaults".to_string()),
            encryption: EncryptionSpec {
                luks_version: Some("luks2".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = declared.merged(&introspected).merged(&defaults);

        assert_eq!("data", merged.name);
        assert_eq!(Some("ext4".to_string()), merged.fs_type);
        assert_eq!(Some("10 GiB".to_string()), merged.size);
        assert_eq!(Some("defaults".to_string()), merged.mount_options);
        assert_eq!(Some("luks2".to_string()), merged.encryption.luks_version);
    }

    #[test]
    fn test_merge_pool_disks() {
        let pool = PoolSpec {
            name: "vg".to_string(),
            ..Default::default()
        };

        let existing = PoolSpec {
            disks: vec!["sdb".to_string()],
            pool_type: Some("lvm".to_string()),
            ..Default::default()
        };

        let merged = pool.merged(&existing);
        assert_eq!(vec!["sdb"], merged.disks);
        assert_eq!(Some("lvm".to_string()), merged.pool_type);
        assert_eq!("vg", merged.name);
    }
}
