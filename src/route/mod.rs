use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

use crate::netlink::{Link, LinkError, LinkErrorKind, LinkRepository, RouteRecord};

/// Find the default route: the first enumerated IPv4 route that carries a
/// gateway, optionally restricted to routes leaving through `link`.
///
/// With several gateway-bearing routes (policy routing, multiple uplinks) the
/// kernel's enumeration order decides, not the metric.
pub async fn find_default<L>(links: &L, link: Option<&Link>) -> Result<RouteRecord, LinkError>
where
    L: LinkRepository + ?Sized,
{
    let routes = links.routes(link).await?;
    routes.into_iter().find(|r| r.gateway.is_some()).ok_or_else(|| {
        LinkError::new(
            LinkErrorKind::NotFound,
            "find default route",
            link.map(|l| l.name.clone()).unwrap_or_else(|| "main table".to_string()),
            "default route doesn't exist",
        )
    })
}

/// The universal 0.0.0.0/0 prefix.
pub fn any_network() -> Ipv4Network {
    match Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0) {
        Ok(net) => net,
        Err(_) => unreachable!("a zero prefix is always valid"),
    }
}

/// A 0.0.0.0/0 route through `gateway`.
pub fn default_route(gateway: Ipv4Addr, link_index: u32) -> RouteRecord {
    RouteRecord::via(any_network(), gateway, link_index)
}
