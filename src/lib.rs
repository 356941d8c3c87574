//! Bridge CNI plugin and node agent for Kubernetes
//!
//! The agent puts a bridge on top of the node's uplink and moves the host's
//! addresses and routes onto it. The plugin then, for every pod:
//! - obtains an address from a static assignment server or a delegated plugin
//! - makes sure the pod has a default route
//! - adds a route to the cluster service network through the bridge

pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod ipam;
pub mod netlink;
pub mod plugin;
pub mod podroute;
pub mod route;
pub mod topology;
pub mod types;

/// CNI version of the results this plugin emits by default.
pub const CNI_VERSION: &str = "0.3.1";
pub const SUPPORTED_VERSIONS: &[&str] = &["0.3.0", "0.3.1", "0.4.0", "1.0.0"];

// Re-export commonly used items
pub use commands::{cmd_add, cmd_check, cmd_del, run_cni};
pub use config::NetConf;
pub use error::Error;
pub use plugin::BridgePlugin;
pub use podroute::PodRouteInjector;
pub use topology::BridgeTopology;
