//! Linux primitives for realizing an emulated network topology.
//!
//! Uses network namespaces for hosts, Open vSwitch bridges for switches,
//! veth pairs for links and `tc netem`/`tbf` for link shaping.
//!
//! # Modules
//!
//! - [`command`]: privileged command execution (direct as root, else `sudo -n`)
//! - [`namespace`]: namespace lifecycle and in-namespace configuration (RAII)
//! - [`bridge`]: Open vSwitch bridges and controller wiring (RAII)
//! - [`veth`]: veth pairs and interface naming (RAII)
//! - [`impairment`]: `tc netem`/`tbf` shaping configuration and application
//! - [`process`]: managed controller processes and dependency probing
//! - [`test_util`]: privilege checks and unique name generation for tests

pub mod bridge;
pub mod command;
pub mod impairment;
pub mod namespace;
pub mod process;
pub mod test_util;
pub mod veth;

pub use bridge::{Datapath, OvsBridge};
pub use command::{Exec, HostNamespace};
pub use impairment::{ImpairmentConfig, apply_impairment};
pub use namespace::Namespace;
pub use process::{ManagedProcess, SkipReason, check_binary, check_engine_deps};
pub use test_util::{check_privileges, unique_name};
pub use veth::{MAX_IFNAME_LEN, VethPair, interface_name};
