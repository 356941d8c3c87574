use std::path::Path;

use tracing::{info, warn};

use crate::config::NetConf;
use crate::error::Error;
use crate::identity::PodIdentity;
use crate::ipam::{delegate_add, PodRequest, StaticClient};
use crate::netlink::{LinkRepository, Namespaces};
use crate::podroute::PodRouteInjector;
use crate::types::{CmdArgs, Result as CniResult};
use crate::CNI_VERSION;

/// Bridge plugin implementation
pub struct BridgePlugin<'a, L: ?Sized, N> {
    /// Command arguments
    args: CmdArgs,
    /// Link tables of the host namespace
    host: &'a L,
    /// Opens pod namespaces
    namespaces: &'a N,
}

impl<'a, L, N> BridgePlugin<'a, L, N>
where
    L: LinkRepository + ?Sized,
    N: Namespaces,
{
    /// Create a new bridge plugin
    pub fn new(args: CmdArgs, host: &'a L, namespaces: &'a N) -> Self {
        Self {
            args,
            host,
            namespaces,
        }
    }

    /// Attach a pod: assign its address, then fix up its routes.
    pub async fn add_network(&self) -> Result<CniResult, Error> {
        let config = NetConf::parse(&self.args.stdin_data)?;
        let bridge = config.bridge_name()?;

        let pod = PodIdentity::from_args(&self.args.args)?;
        info!(
            "attaching {}/{} (container {}) to {}",
            pod.namespace, pod.name, self.args.container_id, bridge
        );

        let result = self.assign_address(&config, &pod, bridge).await?;

        PodRouteInjector::new(self.host, self.namespaces)
            .reconcile(bridge, Path::new(&self.args.netns), &config.service_ip_cidr)
            .await?;

        Ok(result)
    }

    async fn assign_address(
        &self,
        config: &NetConf,
        pod: &PodIdentity,
        bridge: &str,
    ) -> Result<CniResult, Error> {
        let cni_version = if config.cni_version.is_empty() {
            CNI_VERSION
        } else {
            config.cni_version.as_str()
        };

        if let Some(socket) = config.static_socket() {
            let request = PodRequest {
                pod_name: pod.name.clone(),
                pod_namespace: pod.namespace.clone(),
                container_id: self.args.container_id.clone(),
                netns: self.args.netns.clone(),
                bridge: bridge.to_string(),
            };
            let response = StaticClient::new(socket).add(&request).await?;
            return response.into_result(cni_version);
        }

        if config.server_socket.is_some() {
            warn!("static server socket is configured but missing, delegating instead");
        }
        let plugin = config.delegate_type()?;
        delegate_add(plugin, &config.delegate_bytes()?, &self.args).await
    }

    /// Detach a pod. Nothing is torn down.
    pub async fn del_network(&self) -> Result<(), Error> {
        info!("DEL for container {} is a no-op", self.args.container_id);
        Ok(())
    }

    pub async fn check_network(&self) -> Result<(), Error> {
        info!("CHECK for container {} is a no-op", self.args.container_id);
        Ok(())
    }
}
