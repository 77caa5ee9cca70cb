//! Busybox command-equivalence rewrites
//!
//! Hardened base images ship busybox userland, where `useradd` and
//! `groupadd` do not exist (busybox provides `adduser`/`addgroup`) and
//! `tar` lacks several GNU-only flags. These rewrites translate the
//! common invocations. They are suppressed for user/group commands when
//! the stage installs the `shadow` package, which carries the GNU tools.

use crate::packages::PACKAGE_SHADOW;
use crate::shell::{ShellCommand, ShellPart};

/// User management commands
pub const COMMAND_USERADD: &str = "useradd";
pub const COMMAND_ADDUSER: &str = "adduser";
pub const COMMAND_GROUPADD: &str = "groupadd";
pub const COMMAND_ADDGROUP: &str = "addgroup";
pub const COMMAND_GNU_TAR: &str = "tar";

/// GNU tar flags busybox tar does not accept
const GNU_TAR_FLAGS: [&str; 2] = ["--no-same-owner", "--no-same-permissions"];

/// Rewrite busybox-incompatible commands within one RUN.
///
/// `stage_packages` is the set of packages installed so far in the
/// surrounding build stage; when it contains `shadow`, the GNU user and
/// group tools exist and `useradd`/`groupadd` are left alone. Returns
/// `None` when nothing changed.
pub fn convert_busybox_commands(
    shell: &ShellCommand,
    stage_packages: &[String],
) -> Option<ShellCommand> {
    if shell.parts.is_empty() {
        return None;
    }

    let has_shadow = stage_packages.iter().any(|pkg| pkg == PACKAGE_SHADOW);

    let mut modified = false;
    let mut parts: Vec<ShellPart> = Vec::with_capacity(shell.parts.len());
    for part in &shell.parts {
        let converted = match part.command.as_str() {
            COMMAND_USERADD if !has_shadow => Some(convert_useradd(part)),
            COMMAND_GROUPADD if !has_shadow => Some(convert_groupadd(part)),
            COMMAND_GNU_TAR => Some(convert_tar(part)),
            _ => None,
        };
        match converted {
            Some(new_part) if new_part != *part => {
                modified = true;
                parts.push(new_part);
            }
            _ => parts.push(part.clone()),
        }
    }

    modified.then_some(ShellCommand { parts })
}

/// `useradd [flags] NAME` becomes `adduser [flags] -D NAME`.
///
/// `-D` (don't assign a password) is inserted ahead of the trailing
/// username operand; flag arguments such as `-u`, `-g`, and `-s` carry
/// over unchanged.
fn convert_useradd(part: &ShellPart) -> ShellPart {
    let mut args = part.args.clone();
    let insert_at = match args.last() {
        Some(last) if !last.starts_with('-') => Some(args.len() - 1),
        _ => None,
    };
    if let Some(at) = insert_at {
        if !args.iter().any(|arg| arg == "-D") {
            args.insert(at, "-D".to_string());
        }
    }
    ShellPart {
        extra_pre: part.extra_pre.clone(),
        command: COMMAND_ADDUSER.to_string(),
        args,
        delimiter: part.delimiter.clone(),
    }
}

/// `groupadd` maps onto `addgroup` with identical arguments.
fn convert_groupadd(part: &ShellPart) -> ShellPart {
    ShellPart {
        extra_pre: part.extra_pre.clone(),
        command: COMMAND_ADDGROUP.to_string(),
        args: part.args.clone(),
        delimiter: part.delimiter.clone(),
    }
}

/// Drop GNU-only flags busybox tar rejects.
fn convert_tar(part: &ShellPart) -> ShellPart {
    ShellPart {
        extra_pre: part.extra_pre.clone(),
        command: part.command.clone(),
        args: part
            .args
            .iter()
            .filter(|arg| !GNU_TAR_FLAGS.contains(&arg.as_str()))
            .cloned()
            .collect(),
        delimiter: part.delimiter.clone(),
    }
}
