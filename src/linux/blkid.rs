use crate::errors::ReconcileError;
use crate::utils::shell;

/// Executes:
/// ```shell
/// blkid -s UUID -o value ${{ device }}
/// ```
pub fn uuid(device: &str) -> Result<Option<String>, ReconcileError> {
    let out = shell::output("blkid", &["-s", "UUID", "-o", "value", device])?;

    Ok(parse_value(&out))
}

/// Low-level probe for any known signature on `device`.
/// Probe failures count as no signature.
pub fn has_signature(device: &str) -> bool {
    shell::output("blkid", &["-p", device])
        .map(|out| !out.trim().is_empty())
        .unwrap_or(false)
}

/// Executes:
/// ```shell
/// wipefs -a ${{ device }}
/// ```
pub fn wipe(device: &str) -> Result<(), ReconcileError> {
    shell::exec("wipefs", &["-a", device])
}

fn parse_value(out: &str) -> Option<String> {
    out.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(
            Some("4b1f-22aa".to_string()),
            parse_value("\n4b1f-22aa\n")
        );
        assert_eq!(None, parse_value("  \n"));
    }
}
