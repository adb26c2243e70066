use crate::devicetree::device::RaidLevel;
use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::utils::shell;

pub struct ArrayArgs<'a> {
    pub name: &'a str,
    pub level: RaidLevel,
    pub active: u32,
    pub spare: u32,
    pub chunk_size: Option<Size>,
    pub metadata: Option<&'a str>,
    pub members: Vec<&'a str>,
}

/// Arguments to `mdadm` for creating the array
pub fn create_args(array: &ArrayArgs) -> Vec<String> {
    let mut args = vec![
        "--create".to_string(),
        format!("/dev/md/{}", array.name),
        "--run".to_string(),
        format!("--level={}", array.level.as_str()),
        format!("--raid-devices={}", array.active),
        format!("--spare-devices={}", array.spare),
    ];

    // mdadm takes chunk sizes in KiB
    if let Some(chunk) = array.chunk_size {
        args.push(format!("--chunk={}", chunk.bytes() / crate::constants::sizes::KIB));
    }
    if let Some(metadata) = array.metadata {
        args.push(format!("--metadata={metadata}"));
    }

    args.extend(array.members.iter().map(|m| m.to_string()));
    args
}

/// Executes:
/// ```shell
/// mdadm --create /dev/md/${{ name }} --run --level=${{ level }} \
///     --raid-devices=${{ active }} --spare-devices=${{ spare }} \
///     [--chunk=${{ chunk }}] [--metadata=${{ metadata }}] ${{ members }}
/// ```
pub fn create(array: &ArrayArgs) -> Result<(), ReconcileError> {
    let args = create_args(array);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    shell::exec("mdadm", &args)
}

pub fn stop(device: &str) -> Result<(), ReconcileError> {
    shell::exec("mdadm", &["--stop", device])
}

pub fn zero_superblock(member: &str) -> Result<(), ReconcileError> {
    shell::exec("mdadm", &["--zero-superblock", member])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::sizes::KIB;

    #[test]
    fn test_create_args() {
        let array = ArrayArgs {
            name: "data-1",
            level: RaidLevel::Raid5,
            active: 3,
            spare: 1,
            chunk_size: Some(Size(512 * KIB)),
            metadata: Some("1.2"),
            members: vec!["/dev/sdb", "/dev/sdc", "/dev/sdd", "/dev/sde"],
        };

        assert_eq!(
            vec![
                "--create",
                "/dev/md/data-1",
                "--run",
                "--level=raid5",
                "--raid-devices=3",
                "--spare-devices=1",
                "--chunk=512",
                "--metadata=1.2",
                "/dev/sdb",
                "/dev/sdc",
                "/dev/sdd",
                "/dev/sde",
            ],
            create_args(&array)
        );
    }
}
