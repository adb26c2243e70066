use serde::Deserialize;

use crate::errors::ReconcileError;
use crate::utils::shell;

pub const LSBLK_COLUMNS: &str = "NAME,KNAME,PKNAME,TYPE,SIZE,FSTYPE,LABEL,UUID,MOUNTPOINT,PTTYPE";

/// One line of `lsblk -P` output. Devices with several parents
/// (RAID arrays, spanning LVs) appear once per parent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "UPPERCASE", default)]
pub struct EntryLsblk {
    pub name: String,
    pub kname: String,
    pub pkname: String,
    #[serde(rename = "TYPE")]
    pub dev_type: String,
    pub size: String,
    pub fstype: String,
    pub label: String,
    pub uuid: String,
    pub mountpoint: String,
    pub pttype: String,
}

/// Executes:
/// ```shell
/// lsblk -p -P -a -b -o ${{ LSBLK_COLUMNS }}
/// ```
pub fn run_lsblk() -> Result<Vec<EntryLsblk>, ReconcileError> {
    let out = shell::output("lsblk", &["-p", "-P", "-a", "-b", "-o", LSBLK_COLUMNS])?;

    parse_lsblk(&out)
}

pub fn parse_lsblk(output: &str) -> Result<Vec<EntryLsblk>, ReconcileError> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

// Lines look like `NAME="/dev/sda" KNAME="/dev/sda" PKNAME="" TYPE="disk" ...`
fn parse_line(line: &str) -> Result<EntryLsblk, ReconcileError> {
    let bad_line = || ReconcileError::CmdFailed {
        error: None,
        context: format!("unexpected lsblk output line: {line}"),
    };

    let tokens = shlex::split(line).ok_or_else(bad_line)?;
    let mut table = toml::map::Map::new();

    for token in tokens {
        let (key, value) = token.split_once('=').ok_or_else(bad_line)?;
        table.insert(key.to_string(), toml::Value::String(value.to_string()));
    }

    toml::Value::Table(table)
        .try_into::<EntryLsblk>()
        .map_err(|err| ReconcileError::CmdFailed {
            error: None,
            context: format!("failed to parse lsblk line '{line}': {err}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsblk() {
        let output = r#"NAME="/dev/sda" KNAME="/dev/sda" PKNAME="" TYPE="disk" SIZE="107374182400" FSTYPE="" LABEL="" UUID="" MOUNTPOINT="" PTTYPE="gpt"
NAME="/dev/sda1" KNAME="/dev/sda1" PKNAME="/dev/sda" TYPE="part" SIZE="536870912" FSTYPE="vfat" LABEL="EFI SYSTEM" UUID="4B1F-22AA" MOUNTPOINT="/boot" PTTYPE="gpt"

NAME="/dev/mapper/vg-root" KNAME="/dev/dm-0" PKNAME="/dev/sda2" TYPE="lvm" SIZE="21474836480" FSTYPE="xfs" LABEL="" UUID="a1b2" MOUNTPOINT="/" PTTYPE=""
"#;

        let entries = parse_lsblk(output).expect("failed to parse lsblk output");
        assert_eq!(3, entries.len());

        assert_eq!(
            EntryLsblk {
                name: "/dev/sda1".to_string(),
                kname: "/dev/sda1".to_string(),
                pkname: "/dev/sda".to_string(),
                dev_type: "part".to_string(),
                size: "536870912".to_string(),
                fstype: "vfat".to_string(),
                label: "EFI SYSTEM".to_string(),
                uuid: "4B1F-22AA".to_string(),
                mountpoint: "/boot".to_string(),
                pttype: "gpt".to_string(),
            },
            entries[1]
        );

        assert_eq!("/dev/dm-0", entries[2].kname);
        assert_eq!("lvm", entries[2].dev_type);
        assert!(parse_lsblk("NAME=\"/dev/sda\" garbage").is_err());
    }
}
