//! Address assignment for a pod.
//!
//! Addresses come either from a static assignment server listening on a unix
//! socket, or from the nested plugin named by the delegate configuration.

pub mod delegate;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info};

use crate::error::Error;
use crate::route::any_network;
use crate::types::{IPConfig, Result as CniResult, Route};

pub use delegate::{delegate_add, find_plugin};

/// Request sent to the static assignment server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRequest {
    #[serde(rename = "podName")]
    pub pod_name: String,
    #[serde(rename = "podNamespace")]
    pub pod_namespace: String,
    #[serde(rename = "containerID")]
    pub container_id: String,
    #[serde(rename = "netNs")]
    pub netns: String,
    #[serde(rename = "cni0")]
    pub bridge: String,
}

/// Reply of the static assignment server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodResponse {
    #[serde(rename = "ipAddress", default)]
    pub ip_address: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PodResponse {
    /// One IPv4 configuration plus a default route through the reply gateway.
    pub fn into_result(self, cni_version: &str) -> Result<CniResult, Error> {
        if let Some(msg) = self.error {
            return Err(Error::Delegation(format!("static assignment refused: {}", msg)));
        }
        let address: Ipv4Network = self.ip_address.parse().map_err(|e| {
            Error::Delegation(format!(
                "invalid address {:?} from static server: {}",
                self.ip_address, e
            ))
        })?;
        let gateway: Ipv4Addr = self.gateway.parse().map_err(|e| {
            Error::Delegation(format!(
                "invalid gateway {:?} from static server: {}",
                self.gateway, e
            ))
        })?;

        // CNI 1.0 dropped ips[].version
        let version = before_cni_1(cni_version).then(|| "4".to_string());

        let mut result = CniResult::new(cni_version);
        result.add_ip(IPConfig {
            version,
            interface: None,
            address: address.to_string(),
            gateway: Some(gateway.to_string()),
        });
        result.add_route(Route {
            dst: any_network().to_string(),
            gw: Some(gateway.to_string()),
        });
        Ok(result)
    }
}

fn before_cni_1(cni_version: &str) -> bool {
    let major = cni_version.split('.').next().and_then(|m| m.parse::<u32>().ok());
    major.unwrap_or(0) < 1
}

/// Client of the static assignment server.
#[derive(Debug, Clone)]
pub struct StaticClient {
    socket: PathBuf,
}

impl StaticClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self { socket: socket.into() }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Ask the server for the pod's address. One request per connection.
    pub async fn add(&self, request: &PodRequest) -> Result<PodResponse, Error> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            Error::Delegation(format!("failed to connect to {}: {}", self.socket.display(), e))
        })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        write_half.write_all(&line).await?;
        write_half.shutdown().await?;
        debug!("sent static request for {}/{}", request.pod_namespace, request.pod_name);

        let mut reply = String::new();
        BufReader::new(read_half).read_line(&mut reply).await?;
        if reply.trim().is_empty() {
            return Err(Error::Delegation(format!(
                "static server at {} closed the connection without a reply",
                self.socket.display()
            )));
        }
        let response: PodResponse = serde_json::from_str(reply.trim())
            .map_err(|e| Error::Delegation(format!("malformed static server reply: {}", e)))?;
        info!(
            "static server assigned {} (gateway {}) to {}/{}",
            response.ip_address, response.gateway, request.pod_namespace, request.pod_name
        );
        Ok(response)
    }
}
