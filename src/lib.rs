//! Topology control plane library
//!
//! This library keeps the declared topology of an emulated network
//! (controllers, switches, hosts, routers, nats and the links between them)
//! and drives a live network engine through its start/stop lifecycle. It
//! includes the topology store, engine adapters, the lifecycle orchestrator,
//! document and script export, and the command console.

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod model;
pub mod status;
pub mod topology;

// Test helpers module - available when test-internals feature is enabled
#[cfg(any(test, feature = "test-internals"))]
pub mod test_helpers;

#[cfg(test)]
pub mod tests;

// Re-export commonly used items
pub use error::{ErrorKind, Result, TopologyError};
pub use export::TopologyDocument;
pub use lifecycle::{ControlPlane, LifecycleHook, RunState, Timeouts};
pub use model::{Link, LinkKey, LinkOptions, Node, NodeKind};
pub use status::{NetworkStatus, NodeInterfaces};
pub use topology::TopologyStore;
