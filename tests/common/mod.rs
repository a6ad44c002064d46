//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use network_sim::{Exec, HostNamespace, check_engine_deps};
use topoctl::engine::NetnsEngine;
use topoctl::{ControlPlane, Timeouts};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Check the namespace engine's dependencies. Returns `true` if tests should
/// be skipped (prints the reason to stderr). Use at the top of every test.
pub fn skip_without_deps() -> bool {
    match check_engine_deps() {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

/// Node id unique across parallel tests and short enough for interface
/// names (`<id>-eth<N>` must fit in 15 chars).
pub fn node_id(prefix: char) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() % 0xffff;
    format!("{prefix}{pid:04x}{seq}")
}

/// A control plane over the namespace engine, logging into a temp dir.
pub fn netns_plane(log_dir: &std::path::Path) -> ControlPlane {
    ControlPlane::new(
        Arc::new(NetnsEngine::new(log_dir)),
        Timeouts {
            build: Duration::from_secs(20),
            stop: Duration::from_secs(10),
        },
    )
}

pub fn namespace_exists(name: &str) -> bool {
    HostNamespace
        .exec("ip", &["netns", "list"])
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .any(|l| l.split_whitespace().next() == Some(name))
        })
        .unwrap_or(false)
}

/// Ping `dst` once from inside namespace `src`, returning the RTT in ms.
pub fn ping(src: &str, dst: &str) -> anyhow::Result<f64> {
    let out = HostNamespace.exec_checked(
        "ip",
        &["netns", "exec", src, "ping", "-c", "3", "-W", "2", dst],
    )?;
    let text = String::from_utf8_lossy(&out.stdout);
    // rtt min/avg/max/mdev = 0.041/0.050/0.062/0.008 ms
    text.lines()
        .find(|l| l.contains("min/avg/max"))
        .and_then(|l| l.split('=').nth(1))
        .and_then(|v| v.trim().split('/').nth(1))
        .and_then(|avg| avg.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("no rtt summary in ping output:\n{text}"))
}
