use std::process::{Command, Output};
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};

/// Something that can run a system command in a network context: the root
/// namespace ([`HostNamespace`]) or a named one ([`crate::Namespace`]).
pub trait Exec {
    /// Run `cmd args...`, returning raw output regardless of exit status.
    fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output>;

    /// Human-readable name used in error context and logs.
    fn context_name(&self) -> &str;

    /// Run `cmd args...`, failing with stderr if it exits non-zero.
    fn exec_checked(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let output = self.exec(cmd, args)?;
        if !output.status.success() {
            bail!(
                "command failed in {}: {cmd} {}\n{}",
                self.context_name(),
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output)
    }
}

/// The default (root) network namespace, where bridges and controller
/// processes live.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostNamespace;

impl Exec for HostNamespace {
    fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(cmd);
        full.extend_from_slice(args);
        privileged(&full)
    }

    fn context_name(&self) -> &str {
        "root namespace"
    }
}

/// True when the current process already runs as uid 0, in which case
/// commands are executed directly instead of through `sudo -n`.
pub fn running_as_root() -> bool {
    static IS_ROOT: OnceLock<bool> = OnceLock::new();
    *IS_ROOT.get_or_init(|| {
        Command::new("id")
            .arg("-u")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .is_some_and(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
    })
}

/// Run `args` with root privileges, returning raw output.
pub(crate) fn privileged(args: &[&str]) -> Result<Output> {
    let Some((program, rest)) = args.split_first() else {
        bail!("empty command");
    };

    let output = if running_as_root() {
        Command::new(program).args(rest).output()
    } else {
        Command::new("sudo").arg("-n").args(args).output()
    };
    output.with_context(|| format!("run {}", args.join(" ")))
}

/// Run `args` with root privileges, bailing with stderr on failure.
pub(crate) fn privileged_checked(args: &[&str]) -> Result<Output> {
    let output = privileged(args)?;
    if !output.status.success() {
        bail!(
            "command failed: {}\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}
