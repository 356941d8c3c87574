use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Where the agent finds (and rewrites) the network configuration
pub const DEFAULT_NETCONF_PATH: &str = "/etc/cni/net.d/10-hostbr.conf";
/// Bridge created on top of the uplink when none is given
pub const DEFAULT_BRIDGE_NAME: &str = "mybr0";
/// DHCP helper binary
pub const DEFAULT_DHCP_BIN: &str = "/opt/cni/bin/dhcp";
/// Socket the DHCP helper listens on; its presence means a helper runs
pub const DEFAULT_DHCP_SOCKET: &str = "/run/cni/dhcp.sock";
/// DHCP helper output
pub const DEFAULT_DHCP_LOG: &str = "/run/cni/dhcp.log";

/// Network configuration for the bridge CNI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConf {
    /// CNI specification version
    #[serde(rename = "cniVersion", default)]
    pub cni_version: String,
    /// Name of the network
    #[serde(default)]
    pub name: String,
    /// Type of CNI plugin
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Configuration handed verbatim to the delegated plugin
    #[serde(alias = "Delegate")]
    pub delegate: Map<String, Value>,
    /// Cluster service range, filled in by the agent
    #[serde(rename = "serviceIPCIDR", default)]
    pub service_ip_cidr: String,
    /// Socket of the static address server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_socket: Option<PathBuf>,
    /// Anything else the file carries, kept on rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NetConf {
    /// Parse NetConf from bytes
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, Error> {
        let conf: NetConf = serde_json::from_slice(bytes)?;
        conf.bridge_name()?;
        Ok(conf)
    }

    /// Name of the bridge link the delegate attaches pods to
    pub fn bridge_name(&self) -> std::result::Result<&str, Error> {
        self.delegate_str("bridge")
    }

    /// Plugin type the address assignment is delegated to
    pub fn delegate_type(&self) -> std::result::Result<&str, Error> {
        self.delegate_str("type")
    }

    pub fn delegate_bytes(&self) -> std::result::Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(&self.delegate)?)
    }

    fn delegate_str(&self, key: &str) -> std::result::Result<&str, Error> {
        match self.delegate.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(_) => Err(Error::Config(format!(
                "delegate field {:?} must be a non-empty string",
                key
            ))),
            None => Err(Error::Config(format!("delegate field {:?} is required", key))),
        }
    }

    /// The static address server socket, if configured and present
    pub fn static_socket(&self) -> Option<&Path> {
        self.server_socket
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Load the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read netconf file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse netconf file {}", path.display()))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write netconf file {}", path.display()))?;
        Ok(())
    }

    /// Record the discovered service range and rewrite the file.
    ///
    /// Rewriting with the same value produces the same file.
    pub fn complete_service_cidr(&mut self, path: &Path, service_cidr: &str) -> Result<()> {
        service_cidr
            .parse::<ipnetwork::Ipv4Network>()
            .with_context(|| format!("invalid service CIDR {}", service_cidr))?;
        self.service_ip_cidr = service_cidr.to_string();
        self.save(path)
    }
}
