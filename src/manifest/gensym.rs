use std::collections::HashSet;

use super::{Manifest, VolumeSpec};

/// Base name for an unnamed LVM volume, derived from where it is mounted
pub fn lv_name_base(volume: &VolumeSpec) -> String {
    if volume.fs_type.as_deref() == Some("swap") {
        return "swap".to_string();
    }

    match volume.mount_point.as_deref() {
        Some("/") => "root".to_string(),
        Some(mnt) if mnt.starts_with('/') => mnt.trim_matches('/').replace('/', "_"),
        _ => "lv".to_string(),
    }
}

/// Base name for an unnamed pool, `<os-id>_<hostname>`
pub fn vg_name_base(os_id: Option<&str>, hostname: Option<&str>) -> String {
    let host = hostname
        .and_then(|h| h.split('.').next())
        .filter(|h| !h.is_empty());

    match (os_id.filter(|id| !id.is_empty()), host) {
        (Some(os), Some(host)) => format!("{os}_{host}"),
        (Some(os), None) => os.to_string(),
        (None, Some(host)) => host.to_string(),
        (None, None) => "vg".to_string(),
    }
}

/// Returns `base` if unused, otherwise the first free `base_<n>`
pub fn unique_name(base: &str, used: &HashSet<String>) -> String {
    if !used.contains(base) {
        return base.to_string();
    }

    (0..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Names every unnamed pool, avoiding `existing` and the other pool names
pub fn fill_pool_names(manifest: &mut Manifest, base: &str, existing: &[String]) {
    let mut used: HashSet<String> = existing.iter().cloned().collect();
    used.extend(
        manifest
            .pools
            .iter()
            .filter(|p| !p.name.is_empty())
            .map(|p| p.name.clone()),
    );

    for pool in manifest.pools.iter_mut().filter(|p| p.name.is_empty()) {
        let name = unique_name(base, &used);
        tracing::info!("naming unnamed pool '{name}'");

        used.insert(name.clone());
        pool.name = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PoolSpec;

    #[test]
    fn test_lv_name_base() {
        struct Test {
            fs_type: Option<&'static str>,
            mount_point: Option<&'static str>,
            expected: &'static str,
        }

        let tests = vec![
            Test {
                fs_type: Some("xfs"),
                mount_point: Some("/"),
                expected: "root",
            },
            Test {
                fs_type: Some("ext4"),
                mount_point: Some("/var/log/"),
                expected: "var_log",
            },
            Test {
                fs_type: Some("swap"),
                mount_point: None,
                expected: "swap",
            },
            Test {
                fs_type: None,
                mount_point: None,
                expected: "lv",
            },
        ];

        for test in tests {
            let volume = VolumeSpec {
                fs_type: test.fs_type.map(String::from),
                mount_point: test.mount_point.map(String::from),
                ..Default::default()
            };

            assert_eq!(test.expected, lv_name_base(&volume));
        }
    }

    #[test]
    fn test_unique_name() {
        let used: HashSet<String> = ["root", "root_0"].iter().map(|s| s.to_string()).collect();

        assert_eq!("home", unique_name("home", &used));
        assert_eq!("root_1", unique_name("root", &used));
    }

    #[test]
    fn test_vg_name_base() {
        assert_eq!("fedora_host1", vg_name_base(Some("fedora"), Some("host1.example.com")));
        assert_eq!("host1", vg_name_base(None, Some("host1")));
        assert_eq!("vg", vg_name_base(Some(""), None));
    }

    #[test]
    fn test_fill_pool_names() {
        let mut manifest = Manifest {
            pools: vec![
                PoolSpec::default(),
                PoolSpec {
                    name: "fedora_host1".to_string(),
                    ..Default::default()
                },
                PoolSpec::default(),
            ],
            ..Default::default()
        };

        fill_pool_names(&mut manifest, "fedora_host1", &["fedora_host1_0".to_string()]);

        let names: Vec<&str> = manifest.pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(vec!["fedora_host1_1", "fedora_host1", "fedora_host1_2"], names);
    }
}
