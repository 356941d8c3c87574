mod common;

use std::net::Ipv4Addr;

use hostbr::netlink::{LinkErrorKind, LinkRepository, MemoryLinks, RouteRecord};
use hostbr::topology::{get_or_create_bridge, migrate, TopologyState};
use hostbr::BridgeTopology;

use common::{add_address, uplink_host};

const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

#[tokio::test]
async fn install_moves_uplink_onto_bridge() {
    let (links, _) = uplink_host().await;
    let mut topology = BridgeTopology::new(links.clone(), "br0", "eth0");

    topology.install().await.unwrap();
    assert_eq!(topology.state(), TopologyState::Installed);

    let br0 = links.link_by_name("br0").await.unwrap();
    let eth0 = links.link_by_name("eth0").await.unwrap();
    assert_eq!(eth0.master, Some(br0.index));
    assert!(links.is_up("br0"));

    let addrs = links.addresses(&br0).await.unwrap();
    assert_eq!(addrs.len(), 1);
    assert_eq!(addrs[0].network, "192.168.1.10/24".parse().unwrap());
    assert_eq!(addrs[0].label, "br0");
    assert!(links.addresses(&eth0).await.unwrap().is_empty());

    let default = links
        .routes(Some(&br0))
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.is_default())
        .unwrap();
    assert_eq!(default.gateway, Some(GATEWAY));
    assert_eq!(default.link_index, br0.index);
    assert!(links.routes(Some(&eth0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn uninstall_restores_uplink() {
    let (links, _) = uplink_host().await;
    let mut topology = BridgeTopology::new(links.clone(), "br0", "eth0");
    topology.install().await.unwrap();

    topology.uninstall().await.unwrap();
    assert_eq!(topology.state(), TopologyState::Uninstalled);
    assert!(!links.has_link("br0"));

    let eth0 = links.link_by_name("eth0").await.unwrap();
    assert_eq!(eth0.master, None);
    let addrs = links.addresses(&eth0).await.unwrap();
    assert_eq!(addrs.len(), 1);
    assert_eq!(addrs[0].network, "192.168.1.10/24".parse().unwrap());
    assert_eq!(addrs[0].label, "eth0");

    let routes = links.routes(Some(&eth0)).await.unwrap();
    assert!(routes
        .iter()
        .any(|r| r.is_default() && r.gateway == Some(GATEWAY) && r.link_index == eth0.index));
}

#[tokio::test]
async fn install_then_uninstall_round_trips() {
    let (links, eth0) = uplink_host().await;
    add_address(&links, &eth0, "172.16.5.2/16").await;
    links
        .add_route(&RouteRecord::on_link("10.10.0.0/16".parse().unwrap(), eth0.index))
        .await
        .unwrap();
    let gw = Ipv4Addr::new(172, 16, 0, 1);
    links
        .add_route(&RouteRecord::via("10.20.0.0/16".parse().unwrap(), gw, eth0.index))
        .await
        .unwrap();

    let mut addrs_before = links.addresses(&eth0).await.unwrap();
    let routes_before = links.routes(Some(&eth0)).await.unwrap();

    let mut topology = BridgeTopology::new(links.clone(), "br0", "eth0");
    topology.install().await.unwrap();
    topology.uninstall().await.unwrap();

    let eth0 = links.link_by_name("eth0").await.unwrap();
    let mut addrs_after = links.addresses(&eth0).await.unwrap();
    addrs_before.sort_by_key(|a| a.network.to_string());
    addrs_after.sort_by_key(|a| a.network.to_string());
    assert_eq!(addrs_after, addrs_before);
    assert_eq!(links.routes(Some(&eth0)).await.unwrap(), routes_before);
    assert!(!links.has_link("br0"));
}

#[tokio::test]
async fn gateway_route_is_installed_last() {
    let (links, eth0) = uplink_host().await;
    links
        .add_route(&RouteRecord::on_link("10.10.0.0/16".parse().unwrap(), eth0.index))
        .await
        .unwrap();
    links.add_bridge("br0").await.unwrap();
    let br0 = links.link_by_name("br0").await.unwrap();
    let before = links.installed_routes().len();

    migrate(&links, &eth0, &br0).await.unwrap();

    let installed = &links.installed_routes()[before..];
    assert!(installed.len() >= 2);
    let last = installed.last().unwrap();
    assert!(last.is_default());
    assert_eq!(last.link_index, br0.index);
    assert!(installed[..installed.len() - 1].iter().all(|r| r.gateway.is_none()));
}

#[tokio::test]
async fn labels_follow_their_link() {
    let (links, eth0) = uplink_host().await;
    add_address(&links, &eth0, "192.168.7.3/24").await;
    let mut topology = BridgeTopology::new(links.clone(), "br0", "eth0");
    topology.install().await.unwrap();

    let br0 = links.link_by_name("br0").await.unwrap();
    for link in [&br0, &eth0] {
        for addr in links.addresses(link).await.unwrap() {
            assert_eq!(addr.label, link.name);
        }
    }
}

#[tokio::test]
async fn migrating_empty_link_is_noop() {
    let links = MemoryLinks::new();
    let eth1 = links.add_device("eth1");
    let br1 = links.add_device("br1");

    migrate(&links, &eth1, &br1).await.unwrap();
    assert!(links.addresses(&br1).await.unwrap().is_empty());
    assert!(links.routes(None).await.unwrap().is_empty());
    assert!(links.installed_routes().is_empty());
}

#[tokio::test]
async fn bridge_resolution_twice_returns_same_bridge() {
    let links = MemoryLinks::new();
    let first = get_or_create_bridge(&links, "br0").await.unwrap();
    let second = get_or_create_bridge(&links, "br0").await.unwrap();
    assert_eq!(first.index, second.index);
}

#[tokio::test]
async fn install_fails_without_uplink() {
    let links = MemoryLinks::new();
    let mut topology = BridgeTopology::new(links.clone(), "br0", "eth9");
    let err = topology.install().await.unwrap_err();
    assert_eq!(err.kind(), LinkErrorKind::NotFound);
    assert_eq!(topology.state(), TopologyState::Uninstalled);
}

#[tokio::test]
async fn failed_restore_keeps_bridge() {
    let (links, _) = uplink_host().await;
    let mut topology = BridgeTopology::new(links.clone(), "br0", "eth0");
    topology.install().await.unwrap();

    links.fail_next("add address", LinkErrorKind::Other);
    assert!(topology.uninstall().await.is_err());
    assert!(links.has_link("br0"));
    assert_eq!(topology.state(), TopologyState::Installed);
}

#[tokio::test]
async fn release_failure_does_not_stop_uninstall() {
    let (links, _) = uplink_host().await;
    let mut topology = BridgeTopology::new(links.clone(), "br0", "eth0");
    topology.install().await.unwrap();

    links.fail_next("set nomaster", LinkErrorKind::Other);
    topology.uninstall().await.unwrap();
    assert!(!links.has_link("br0"));
    assert_eq!(links.link_by_name("eth0").await.unwrap().master, None);
}
