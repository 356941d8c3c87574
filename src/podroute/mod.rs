//! Routes installed inside a pod's network namespace.

use std::net::Ipv4Addr;
use std::path::Path;

use ipnetwork::Ipv4Network;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::netlink::error::tolerate_exists;
use crate::netlink::{LinkRepository, Namespaces, RouteRecord};
use crate::route::{default_route, find_default};

/// Service range used when the configuration carries none.
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";
/// Primary link of every pod.
pub const POD_LINK: &str = "eth0";

/// Service network from the configured CIDR, or the built-in range when empty.
pub fn service_network(service_cidr: &str) -> Result<Ipv4Network, Error> {
    let cidr = if service_cidr.is_empty() {
        DEFAULT_SERVICE_CIDR
    } else {
        service_cidr
    };
    cidr.parse()
        .map_err(|e| Error::Config(format!("invalid service CIDR {:?}: {}", cidr, e)))
}

/// Route to the service network through the bridge address, or straight out
/// of the link when the bridge has no address.
pub fn make_service_route(
    destination: Ipv4Network,
    gateway: Option<Ipv4Addr>,
    link_index: u32,
) -> RouteRecord {
    match gateway {
        Some(gw) => RouteRecord::via(destination, gw, link_index),
        None => RouteRecord::on_link(destination, link_index),
    }
}

/// Reconciles the default and service routes of one pod.
///
/// `host` must be bound to the host namespace; `namespaces` opens the pod's.
pub struct PodRouteInjector<'a, L: ?Sized, N> {
    host: &'a L,
    namespaces: &'a N,
}

impl<'a, L, N> PodRouteInjector<'a, L, N>
where
    L: LinkRepository + ?Sized,
    N: Namespaces,
{
    pub fn new(host: &'a L, namespaces: &'a N) -> Self {
        Self { host, namespaces }
    }

    /// Make sure the pod has a default route and a route to the service
    /// network, returning the service route.
    pub async fn reconcile(
        &self,
        bridge_name: &str,
        netns: &Path,
        service_cidr: &str,
    ) -> Result<RouteRecord, Error> {
        let bridge = self.host.link_by_name(bridge_name).await.map_err(|e| {
            error!("failed to get bridge device {}: {}", bridge_name, e);
            e
        })?;
        let gateway = self.host.addresses(&bridge).await?.first().map(|a| a.ip());
        if gateway.is_none() {
            warn!(
                "bridge {} has no IPv4 address, service route will have no gateway",
                bridge_name
            );
        }
        let destination = service_network(service_cidr)?;

        let host_default = match find_default(self.host, None).await {
            Ok(route) => route.gateway,
            Err(e) => {
                warn!("failed to get host default route: {}", e);
                None
            }
        };

        let entered = self.namespaces.enter(netns)?;
        let pod = entered.links();
        let eth0 = pod.link_by_name(POD_LINK).await?;

        match find_default(pod, Some(&eth0)).await {
            Ok(route) => debug!("pod default route present: {}", route),
            Err(e) if e.is_not_found() => {
                if let Some(gw) = host_default {
                    let route = default_route(gw, eth0.index);
                    tolerate_exists(pod.add_route(&route).await)?;
                    info!("added missing pod default route {}", route);
                }
            }
            Err(e) => return Err(e.into()),
        }

        let route = make_service_route(destination, gateway, eth0.index);
        tolerate_exists(pod.add_route(&route).await).map_err(|e| {
            error!("failed to add service route {}: {}", route, e);
            e
        })?;
        info!("added service route {} in {}", route, netns.display());
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cidr_uses_builtin_range() {
        assert_eq!(service_network("").unwrap(), "10.96.0.0/12".parse().unwrap());
        assert_eq!(service_network("10.43.0.0/16").unwrap(), "10.43.0.0/16".parse().unwrap());
    }

    #[test]
    fn invalid_cidr_is_config_error() {
        assert!(matches!(service_network("10.96.0.0/40"), Err(Error::Config(_))));
    }

    #[test]
    fn gatewayless_service_route_is_on_link() {
        let route = make_service_route("10.96.0.0/12".parse().unwrap(), None, 3);
        assert_eq!(route.gateway, None);
        assert_eq!(route.scope, crate::netlink::Scope::Link);
    }
}
