use itertools::Itertools;
use tracing::{debug, error, warn};

use crate::netlink::error::{tolerate_exists, tolerate_gone};
use crate::netlink::{AddressRecord, Link, LinkError, LinkRepository, RouteRecord};

/// Move every IPv4 address and route of `src` onto `dst`.
///
/// Addresses and routes are both captured before anything is touched:
/// deleting an address also deletes the routes the kernel derived from it.
/// Any error other than a benign race aborts the migration; nothing is rolled
/// back.
pub async fn migrate<L>(links: &L, src: &Link, dst: &Link) -> Result<(), LinkError>
where
    L: LinkRepository + ?Sized,
{
    let addrs = links.addresses(src).await.map_err(|e| {
        error!("failed to get addresses of {}: {}", src.name, e);
        e
    })?;
    debug!("addresses of {} ({}): {:?}", src.name, addrs.len(), addrs);

    let routes = links.routes(Some(src)).await.map_err(|e| {
        error!("failed to get routes of {}: {}", src.name, e);
        e
    })?;
    debug!("routes of {} ({}): {:?}", src.name, routes.len(), routes);

    for addr in addrs {
        if let Err(e) = links.del_address(src, &addr).await {
            warn!("failed to delete address {} from {}: {}", addr.network, src.name, e);
            continue;
        }

        let moved = AddressRecord {
            label: dst.name.clone(),
            ..addr
        };
        tolerate_exists(links.add_address(dst, &moved).await).map_err(|e| {
            error!("failed to add address {} to {}: {}", moved.network, dst.name, e);
            e
        })?;
    }
    debug!("moved addresses from {} to {}", src.name, dst.name);

    rehome_routes(links, &routes, dst.index).await
}

/// Rebind `routes` to `link_index`, gateway-dependent routes last.
pub async fn rehome_routes<L>(
    links: &L,
    routes: &[RouteRecord],
    link_index: u32,
) -> Result<(), LinkError>
where
    L: LinkRepository + ?Sized,
{
    for route in reinstall_order(routes) {
        // usually already removed together with its address
        tolerate_gone(links.del_route(route).await).map_err(|e| {
            error!("failed to delete route {}: {}", route, e);
            e
        })?;

        let moved = route.rehomed(link_index);
        tolerate_exists(links.add_route(&moved).await).map_err(|e| {
            error!("failed to add route {}: {}", moved, e);
            e
        })?;
    }
    Ok(())
}

/// Reverse of discovery order, with gateway-bearing routes stably moved
/// behind the on-link routes that make their gateways reachable.
fn reinstall_order(routes: &[RouteRecord]) -> Vec<&RouteRecord> {
    routes
        .iter()
        .rev()
        .sorted_by_key(|r| r.gateway.is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::netlink::{LinkErrorKind, MemoryLinks};
    use crate::route::default_route;

    fn routes() -> Vec<RouteRecord> {
        vec![
            default_route(Ipv4Addr::new(192, 168, 1, 1), 2),
            RouteRecord::on_link("192.168.1.0/24".parse().unwrap(), 2),
            RouteRecord::on_link("10.10.0.0/16".parse().unwrap(), 2),
        ]
    }

    #[test]
    fn gateway_routes_go_last() {
        let routes = routes();
        let order = reinstall_order(&routes);
        let dsts: Vec<String> = order.iter().map(|r| r.destination.to_string()).collect();
        assert_eq!(dsts, vec!["10.10.0.0/16", "192.168.1.0/24", "0.0.0.0/0"]);
    }

    #[test]
    fn gateway_last_even_when_discovered_last() {
        let mut routes = routes();
        routes.rotate_left(1);
        let order = reinstall_order(&routes);
        assert!(order.last().unwrap().gateway.is_some());
        assert!(order[..2].iter().all(|r| r.gateway.is_none()));
    }

    #[tokio::test]
    async fn add_failure_aborts() {
        let links = MemoryLinks::new();
        let eth0 = links.add_device("eth0");
        let br0 = links.add_device("br0");
        links
            .add_address(&eth0, &AddressRecord::new("192.168.1.10/24".parse().unwrap(), "eth0"))
            .await
            .unwrap();

        links.fail_next("add address", LinkErrorKind::Other);
        let err = migrate(&links, &eth0, &br0).await.unwrap_err();
        assert_eq!(err.kind(), LinkErrorKind::Other);
    }

    #[tokio::test]
    async fn delete_failure_skips_address() {
        let links = MemoryLinks::new();
        let eth0 = links.add_device("eth0");
        let br0 = links.add_device("br0");
        links
            .add_address(&eth0, &AddressRecord::new("192.168.1.10/24".parse().unwrap(), "eth0"))
            .await
            .unwrap();

        links.fail_next("delete address", LinkErrorKind::Other);
        migrate(&links, &eth0, &br0).await.unwrap();
        assert_eq!(links.addresses(&eth0).await.unwrap().len(), 1);
        assert!(links.addresses(&br0).await.unwrap().is_empty());
    }
}
