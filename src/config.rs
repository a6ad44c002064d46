//! Runtime settings for the control plane.
//!
//! Built once from the command line; nothing here changes after startup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::engine::{EngineFactory, EngineKind, NetnsEngine, SimulatedEngine};
use crate::lifecycle::Timeouts;

/// How long `stop` waits for the engine to tear down before moving on.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// How long `start` waits for the engine to build the network.
pub const DEFAULT_BUILD_TIMEOUT_MS: u64 = 10_000;

/// Where controller processes write their logs.
pub const DEFAULT_LOG_DIR: &str = "/tmp/topoctl";

#[derive(Clone, Debug)]
pub struct Settings {
    pub engine: EngineKind,
    /// Unix socket for the command console; stdin is used when unset.
    pub control_socket: Option<PathBuf>,
    /// Topology document loaded at startup.
    pub topology: Option<PathBuf>,
    /// Start the network right after loading `topology`.
    pub autostart: bool,
    pub log_dir: PathBuf,
    pub timeouts: Timeouts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            control_socket: None,
            topology: None,
            autostart: false,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            timeouts: Timeouts::default(),
        }
    }
}

impl Settings {
    /// Create settings from CLI arguments.
    #[allow(clippy::too_many_arguments)]
    pub fn from_cli(
        engine: EngineKind,
        control_socket: Option<String>,
        topology: Option<String>,
        autostart: bool,
        log_dir: Option<String>,
        stop_timeout_ms: u64,
        build_timeout_ms: u64,
    ) -> Self {
        Self {
            engine,
            control_socket: control_socket.map(PathBuf::from),
            topology: topology.map(PathBuf::from),
            autostart,
            log_dir: log_dir.map_or_else(|| PathBuf::from(DEFAULT_LOG_DIR), PathBuf::from),
            timeouts: Timeouts {
                build: Duration::from_millis(build_timeout_ms),
                stop: Duration::from_millis(stop_timeout_ms),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeouts.stop.is_zero() {
            bail!("stop timeout must be positive");
        }
        if self.timeouts.build.is_zero() {
            bail!("build timeout must be positive");
        }
        if self.autostart && self.topology.is_none() {
            bail!("--autostart needs a topology file");
        }
        Ok(())
    }

    pub fn engine_factory(&self) -> Arc<dyn EngineFactory> {
        match self.engine {
            EngineKind::Simulated => Arc::new(SimulatedEngine::new()),
            EngineKind::Netns => Arc::new(NetnsEngine::new(self.log_dir.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cli_defaults() {
        let settings = Settings::from_cli(
            EngineKind::Simulated,
            None,
            None,
            false,
            None,
            DEFAULT_STOP_TIMEOUT_MS,
            DEFAULT_BUILD_TIMEOUT_MS,
        );
        assert_eq!(settings.timeouts, Timeouts::default());
        assert_eq!(settings.log_dir, PathBuf::from(DEFAULT_LOG_DIR));
        assert!(settings.control_socket.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_cli_paths_and_timeouts() {
        let settings = Settings::from_cli(
            EngineKind::Netns,
            Some("/tmp/topo.sock".into()),
            Some("lab.json".into()),
            true,
            Some("/var/log/topo".into()),
            250,
            1_000,
        );
        assert_eq!(settings.engine, EngineKind::Netns);
        assert_eq!(settings.control_socket, Some(PathBuf::from("/tmp/topo.sock")));
        assert_eq!(settings.timeouts.stop, Duration::from_millis(250));
        assert_eq!(settings.engine_factory().kind(), EngineKind::Netns);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let zero_stop = Settings {
            timeouts: Timeouts {
                stop: Duration::ZERO,
                ..Timeouts::default()
            },
            ..Settings::default()
        };
        assert!(zero_stop.validate().is_err());

        let autostart_without_file = Settings {
            autostart: true,
            ..Settings::default()
        };
        assert!(autostart_without_file.validate().is_err());
    }
}
