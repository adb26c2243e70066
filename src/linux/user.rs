use nix::unistd::{self, Uid};

use crate::utils::fs;

const OS_RELEASE: &str = "/etc/os-release";

/// Returns whether the current user is privileged
pub fn is_root() -> bool {
    Uid::effective().is_root()
}

pub fn hostname() -> Option<String> {
    unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
}

/// `ID` of the running distribution, e.g. `fedora`
pub fn os_id() -> Option<String> {
    let content = fs::read_file(OS_RELEASE).ok()?;
    parse_os_id(&content)
}

fn parse_os_id(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.trim().strip_prefix("ID="))
        .and_then(|value| shlex::split(value))
        .and_then(|words| words.into_iter().next())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_id() {
        struct Test {
            content: &'static str,
            expected: Option<&'static str>,
        }

        let tests = vec![
            Test {
                content: "NAME=\"Arch Linux\"\nID=arch\nBUILD_ID=rolling\n",
                expected: Some("arch"),
            },
            Test {
                content: "NAME=\"Fedora Linux\"\nID_LIKE=rhel\nID=\"fedora\"\n",
                expected: Some("fedora"),
            },
            Test {
                content: "NAME=Unknown\n",
                expected: None,
            },
        ];

        for test in tests {
            assert_eq!(test.expected.map(String::from), parse_os_id(test.content));
        }
    }
}
