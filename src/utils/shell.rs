use std::env;
use std::fs;
use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

use crate::errors::ReconcileError;

fn check_status(cmd: &str, status: ExitStatus, stderr: &[u8]) -> Result<(), ReconcileError> {
    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ReconcileError::CmdFailed {
            error: None,
            context: format!(
                "command {cmd} exited with non-zero status {code}: {}",
                String::from_utf8_lossy(stderr).trim()
            ),
        }),
        None => Err(ReconcileError::CmdFailed {
            error: None,
            context: format!("command {cmd} terminated by signal"),
        }),
    }
}

pub fn exec(cmd: &str, args: &[&str]) -> Result<(), ReconcileError> {
    output(cmd, args).map(|_| ())
}

/// Runs `cmd` and returns its stdout
pub fn output(cmd: &str, args: &[&str]) -> Result<String, ReconcileError> {
    debug!("exec: {cmd} {}", args.join(" "));

    let out = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|err| ReconcileError::CmdFailed {
            error: Some(err),
            context: format!("command {cmd} failed to spawn"),
        })?;

    check_status(cmd, out.status, &out.stderr)?;

    String::from_utf8(out.stdout)
        .map_err(|err| ReconcileError::Bug(format!("{cmd} output not string: {err}")))
}

/// Runs `cmd` with `input` written to its stdin, e.g. a passphrase
pub fn exec_stdin(cmd: &str, args: &[&str], input: &str) -> Result<(), ReconcileError> {
    debug!("exec: {cmd} {} (with stdin)", args.join(" "));

    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| ReconcileError::CmdFailed {
            error: Some(err),
            context: format!("command {cmd} failed to spawn"),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .map_err(|err| ReconcileError::CmdFailed {
                error: Some(err),
                context: format!("failed to write to stdin of {cmd}"),
            })?;
    }

    let out = child
        .wait_with_output()
        .map_err(|err| ReconcileError::CmdFailed {
            error: Some(err),
            context: format!("command {cmd} failed to run"),
        })?;

    check_status(cmd, out.status, &out.stderr)
}

pub fn in_path(program: &str) -> bool {
    if let Ok(path) = env::var("PATH") {
        for p in path.split(':') {
            let p_str = format!("{}/{}", p, program);
            if fs::metadata(p_str).is_ok() {
                return true;
            }
        }
    }

    false
}
