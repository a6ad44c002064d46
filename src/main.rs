use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use topoctl::config::{DEFAULT_BUILD_TIMEOUT_MS, DEFAULT_STOP_TIMEOUT_MS, Settings};
use topoctl::console::run_console;
use topoctl::engine::EngineKind;
use topoctl::export::TopologyDocument;
use topoctl::lifecycle::{ControlPlane, FnHook};

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "topoctl",
    author,
    version,
    disable_version_flag = true,
    about = "Topology and lifecycle control plane for an emulated network"
)]
struct Cli {
    /// Print the version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    print_version: bool,

    /// Emulation engine: simulated (default) or netns
    #[arg(long = "engine", value_enum, default_value = "simulated")]
    engine: EngineKind,

    /// Unix domain socket path for the command console (e.g.,
    /// /tmp/topoctl.sock); commands are read from stdin when unset
    #[arg(long = "control-socket")]
    control_socket: Option<String>,

    /// Topology document (JSON) to load at startup
    #[arg(long = "topology")]
    topology: Option<String>,

    /// Start the network right after loading --topology
    #[arg(long = "autostart")]
    autostart: bool,

    /// Directory for controller logs (netns engine only)
    #[arg(long = "log-dir")]
    log_dir: Option<String>,

    /// How long stop waits for the engine to tear down, in ms
    #[arg(long = "stop-timeout-ms", default_value_t = DEFAULT_STOP_TIMEOUT_MS)]
    stop_timeout_ms: u64,

    /// How long start waits for the engine to build the network, in ms
    #[arg(long = "build-timeout-ms", default_value_t = DEFAULT_BUILD_TIMEOUT_MS)]
    build_timeout_ms: u64,
}

async fn wait_for_signal() -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("wait for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Cli::parse();
    if args.print_version {
        let version = env!("CARGO_PKG_VERSION");
        let git_hash = env!("GIT_HASH");
        let git_branch = env!("GIT_BRANCH");
        let git_dirty = env!("GIT_DIRTY");

        println!(
            "{} ({}@{}{}) [{}]",
            version,
            git_branch,
            git_hash,
            git_dirty,
            env!("CARGO_PKG_NAME")
        );
        return Ok(());
    }

    let settings = Settings::from_cli(
        args.engine,
        args.control_socket,
        args.topology,
        args.autostart,
        args.log_dir,
        args.stop_timeout_ms,
        args.build_timeout_ms,
    );
    settings.validate().context("invalid settings")?;

    let plane = ControlPlane::new(settings.engine_factory(), settings.timeouts);
    info!(engine = %settings.engine, "control plane ready");

    plane.register_hook(Arc::new(FnHook::new("log", || {
        info!("network going down");
    })));

    if let Some(path) = &settings.topology {
        let doc = TopologyDocument::load(path)?;
        let (nodes, links) = plane
            .import_topology(doc)
            .await
            .with_context(|| format!("import {}", path.display()))?;
        info!(nodes, links, "loaded {}", path.display());
        if settings.autostart {
            plane.start().await.context("autostart")?;
            info!("network started");
        }
    }

    let console = run_console(plane.clone(), settings.control_socket.as_deref());
    let outcome = tokio::select! {
        res = console => {
            info!("console closed");
            res
        }
        res = wait_for_signal() => {
            if let Err(e) = res {
                warn!("{:#}", e);
            }
            info!("signal received");
            Ok(())
        }
    };

    plane.shutdown().await;
    if let Some(path) = &settings.control_socket {
        let _ = std::fs::remove_file(path);
    }
    outcome
}
