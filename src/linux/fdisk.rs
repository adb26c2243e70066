use crate::entity::size::Size;
use crate::errors::ReconcileError;
use crate::manifest::PartitionTable;
use crate::utils::shell;

/// sfdisk script writing an empty partition table
pub fn create_table_cmd(table: &PartitionTable) -> String {
    let label = match table {
        PartitionTable::Gpt => "gpt",
        PartitionTable::Msdos => "dos",
    };

    format!("label: {label}\n")
}

/// sfdisk script for one partition of `size`, or the rest of the disk
pub fn partition_cmd(size: Option<Size>) -> String {
    match size {
        Some(size) => format!(",{}MiB\n", size.bytes() / crate::constants::sizes::MIB),
        None => ",+\n".to_string(),
    }
}

/// Executes:
/// ```shell
/// echo 'label: gpt' | sfdisk --wipe always ${{ device }}
/// ```
pub fn create_table(device: &str, table: &PartitionTable) -> Result<(), ReconcileError> {
    shell::exec_stdin(
        "sfdisk",
        &["--wipe", "always", device],
        &create_table_cmd(table),
    )
}

/// Executes:
/// ```shell
/// echo ',${{ size }}MiB' | sfdisk --append ${{ device }}
/// ```
pub fn create_partition(device: &str, size: Size) -> Result<(), ReconcileError> {
    shell::exec_stdin("sfdisk", &["--append", device], &partition_cmd(Some(size)))
}

pub fn delete_partition(device: &str, number: u32) -> Result<(), ReconcileError> {
    shell::exec("sfdisk", &["--delete", device, &number.to_string()])
}

/// Moves the end of partition `number` so that it is `size` long
pub fn resize_partition(device: &str, number: u32, size: Size) -> Result<(), ReconcileError> {
    shell::exec_stdin(
        "sfdisk",
        &["--no-reread", "-N", &number.to_string(), device],
        &partition_cmd(Some(size)),
    )?;

    shell::exec("partx", &["-u", device])
}
