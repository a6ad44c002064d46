//! Managed child processes (controllers) and dependency probing.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::command::running_as_root;

// ---------------------------------------------------------------------------
// Dependency checking
// ---------------------------------------------------------------------------

/// Check if a binary exists in PATH.
pub fn check_binary(name: &str) -> Option<PathBuf> {
    Command::new("sh")
        .args(["-c", &format!("command -v {name}")])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| PathBuf::from(String::from_utf8_lossy(&o.stdout).trim().to_string()))
}

/// Reason why the namespace engine cannot run here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotRoot,
    MissingTool(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotRoot => write!(f, "requires root / passwordless sudo"),
            SkipReason::MissingTool(t) => write!(f, "system tool '{t}' not found"),
        }
    }
}

/// Check the tools the namespace engine shells out to.
pub fn check_engine_deps() -> std::result::Result<(), SkipReason> {
    if !crate::test_util::check_privileges() {
        return Err(SkipReason::NotRoot);
    }

    for tool in ["ip", "tc", "ovs-vsctl"] {
        if check_binary(tool).is_none() {
            return Err(SkipReason::MissingTool(tool.to_string()));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// ManagedProcess
// ---------------------------------------------------------------------------

/// A long-running child process (e.g. an OpenFlow controller).
///
/// Output goes to a log file. The process group is killed on drop.
pub struct ManagedProcess {
    child: Child,
    label: String,
    log_path: PathBuf,
}

impl ManagedProcess {
    /// Spawn `binary args...` in the root namespace, logging to `log_path`.
    pub fn spawn(label: &str, binary: &str, args: &[&str], log_path: &Path) -> Result<Self> {
        let log = File::create(log_path)
            .with_context(|| format!("create log file {}", log_path.display()))?;
        let log_err = log.try_clone().context("clone log handle")?;

        let mut cmd = if running_as_root() {
            Command::new(binary)
        } else {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(binary);
            c
        };
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so kill reaches children of sudo/wrappers
            cmd.process_group(0);
        }

        let child = cmd.spawn().with_context(|| format!("spawn {label} ({binary})"))?;

        tracing::debug!(%label, pid = child.id(), log = %log_path.display(), "spawned process");
        Ok(Self {
            child,
            label: label.to_string(),
            log_path: log_path.to_path_buf(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Check if the process is still running.
    pub fn is_alive(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// If the process has exited, return its exit code and the tail of its
    /// log. Returns `None` if still running.
    pub fn check_exit(&mut self) -> Option<(Option<i32>, String)> {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                let log = std::fs::read_to_string(&self.log_path).unwrap_or_default();
                let tail: Vec<&str> = log.lines().rev().take(20).collect();
                let tail = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
                Some((status.code(), tail))
            }
            _ => None,
        }
    }

    /// Send SIGTERM to the process group, wait up to `grace`, then SIGKILL.
    pub fn kill(&mut self, grace: Duration) {
        let group = format!("-{}", self.pid());
        let _ = signal_group("-TERM", &group);

        let deadline = std::time::Instant::now() + grace;
        while std::time::Instant::now() < deadline {
            if self.child.try_wait().ok().flatten().is_some() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        let _ = signal_group("-9", &group);
        let _ = self.child.wait();
    }
}

fn signal_group(signal: &str, group: &str) -> std::io::Result<std::process::Output> {
    if running_as_root() {
        Command::new("kill").args([signal, "--", group]).output()
    } else {
        Command::new("sudo")
            .args(["-n", "kill", signal, "--", group])
            .output()
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            self.kill(Duration::from_secs(2));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_binary_finds_sh() {
        assert!(check_binary("sh").is_some());
        assert!(check_binary("definitely-not-a-real-binary-xyz").is_none());
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::MissingTool("tc".into()).to_string(),
            "system tool 'tc' not found"
        );
    }

    #[test]
    fn test_spawn_and_kill() {
        if !crate::test_util::check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("sleep.log");
        let mut proc = ManagedProcess::spawn("sleeper", "sleep", &["30"], &log).expect("spawn");
        assert!(proc.is_alive());

        proc.kill(Duration::from_millis(500));
        assert!(!proc.is_alive());
        assert!(proc.check_exit().is_some());
    }
}
