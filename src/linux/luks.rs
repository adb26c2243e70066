use crate::devicetree::device::LuksParams;
use crate::errors::ReconcileError;
use crate::utils::shell;

/// Executes:
/// ```shell
/// cryptsetup luksFormat --batch-mode --type ${{ version }} \
///     [--cipher ${{ cipher }}] [--key-size ${{ key_size }}] \
///     ${{ device }} ${{ key_file | - }}
/// ```
///
/// Passphrases are written to stdin, never passed as arguments.
pub fn format(device: &str, params: &LuksParams) -> Result<(), ReconcileError> {
    let key_size = params.key_size.map(|k| k.to_string());
    let mut args = vec!["luksFormat", "--batch-mode", "--type", params.version.as_str()];

    if let Some(cipher) = &params.cipher {
        args.extend(["--cipher", cipher.as_str()]);
    }
    if let Some(key_size) = &key_size {
        args.extend(["--key-size", key_size.as_str()]);
    }

    args.push(device);

    with_key(params, args)
}

/// Executes:
/// ```shell
/// cryptsetup luksOpen ${{ device }} ${{ name }} --key-file ${{ key_file | - }}
/// ```
pub fn open(device: &str, params: &LuksParams) -> Result<(), ReconcileError> {
    with_key(params, vec!["luksOpen", device, params.map_name.as_str()])
}

pub fn close(name: &str) -> Result<(), ReconcileError> {
    shell::exec("cryptsetup", &["luksClose", name])
}

/// Resizes an open mapping to fill its backing device
pub fn resize(name: &str) -> Result<(), ReconcileError> {
    shell::exec("cryptsetup", &["resize", name])
}

fn with_key<'a>(params: &'a LuksParams, mut args: Vec<&'a str>) -> Result<(), ReconcileError> {
    match key_args(params, &mut args)? {
        Some(passphrase) => shell::exec_stdin("cryptsetup", &args, passphrase),
        None => shell::exec("cryptsetup", &args),
    }
}

/// Appends the key file arguments, returning the passphrase to write to stdin
fn key_args<'a>(params: &'a LuksParams, args: &mut Vec<&'a str>) -> Result<Option<&'a str>, ReconcileError> {
    if let Some(key_file) = &params.key_file {
        args.extend(["--key-file", key_file.as_str()]);
        return Ok(None);
    }

    let passphrase = check_passphrase(params.password.as_deref())?;
    args.extend(["--key-file", "-"]);

    Ok(Some(passphrase))
}

fn check_passphrase(pass: Option<&str>) -> Result<&str, ReconcileError> {
    match pass {
        None | Some("") => Err(ReconcileError::MissingKey(
            "empty luks passphrase and no key file".to_string(),
        )),
        Some(pass) => Ok(pass),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_check_passphrase() {
        assert_matches!(check_passphrase(None), Err(ReconcileError::MissingKey(_)));
        assert_matches!(check_passphrase(Some("")), Err(ReconcileError::MissingKey(_)));
        assert_matches!(check_passphrase(Some("pass1234")), Ok("pass1234"));
    }

    #[test]
    fn test_key_args() {
        struct Test {
            password: Option<&'static str>,
            key_file: Option<&'static str>,
            expected: Option<(Vec<&'static str>, Option<&'static str>)>,
        }

        let tests = vec![
            Test {
                password: Some("pass1234"),
                key_file: None,
                expected: Some((vec!["luksOpen", "/dev/sdb", "--key-file", "-"], Some("pass1234"))),
            },
            // Key file wins over a passphrase
            Test {
                password: Some("pass1234"),
                key_file: Some("/etc/keys/sdb"),
                expected: Some((vec!["luksOpen", "/dev/sdb", "--key-file", "/etc/keys/sdb"], None)),
            },
            Test {
                password: None,
                key_file: None,
                expected: None,
            },
        ];

        for test in tests {
            let params = LuksParams {
                password: test.password.map(String::from),
                key_file: test.key_file.map(String::from),
                ..Default::default()
            };

            // Arguments borrowed from a shorter-lived owner than the params
            let device = String::from("/dev/sdb");
            let mut args = vec!["luksOpen", device.as_str()];
            let result = key_args(&params, &mut args);

            match test.expected {
                Some((expected_args, expected_stdin)) => {
                    assert_eq!(expected_stdin, result.expect("failed to build key args"));
                    assert_eq!(expected_args, args);
                }
                None => assert_matches!(result, Err(ReconcileError::MissingKey(_))),
            }
        }
    }
}
