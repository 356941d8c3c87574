#![allow(dead_code)]

use std::net::Ipv4Addr;

use hostbr::netlink::{AddressRecord, Link, LinkRepository, MemoryLinks, MemoryNamespaces};
use hostbr::route::default_route;
use hostbr::types::CmdArgs;

pub const POD_NETNS: &str = "/var/run/netns/cni-test";
pub const POD_ARGS: &str = "IgnoreUnknown=1;K8S_POD_NAMESPACE=default;K8S_POD_NAME=nginx";

pub async fn add_address(links: &MemoryLinks, link: &Link, cidr: &str) {
    links
        .add_address(link, &AddressRecord::new(cidr.parse().unwrap(), link.name.as_str()))
        .await
        .unwrap();
}

/// `eth0` holding 192.168.1.10/24 with a default route via 192.168.1.1.
pub async fn uplink_host() -> (MemoryLinks, Link) {
    let links = MemoryLinks::new();
    links.add_device("lo");
    let eth0 = links.add_device("eth0");
    add_address(&links, &eth0, "192.168.1.10/24").await;
    links
        .add_route(&default_route(Ipv4Addr::new(192, 168, 1, 1), eth0.index))
        .await
        .unwrap();
    (links, eth0)
}

/// A host after the agent ran: `br0` holds the address and the default route.
pub async fn bridged_host() -> MemoryLinks {
    let links = MemoryLinks::new();
    let eth0 = links.add_device("eth0");
    links.add_bridge("br0").await.unwrap();
    let br0 = links.link_by_name("br0").await.unwrap();
    links.set_master(&eth0, &br0).await.unwrap();
    add_address(&links, &br0, "192.168.1.10/24").await;
    links
        .add_route(&default_route(Ipv4Addr::new(192, 168, 1, 1), br0.index))
        .await
        .unwrap();
    links
}

/// A pod namespace whose `eth0` already received `cidr` from the delegate.
pub async fn pod_namespace(cidr: &str) -> (MemoryNamespaces, MemoryLinks) {
    let namespaces = MemoryNamespaces::new();
    let pod = namespaces.add_namespace(POD_NETNS);
    pod.add_device("lo");
    let eth0 = pod.add_device("eth0");
    add_address(&pod, &eth0, cidr).await;
    (namespaces, pod)
}

pub fn cmd_args(stdin: serde_json::Value, args: &str, path: &str) -> CmdArgs {
    CmdArgs {
        container_id: "3f2a9c".to_string(),
        netns: POD_NETNS.to_string(),
        ifname: "eth0".to_string(),
        args: args.to_string(),
        path: path.to_string(),
        stdin_data: serde_json::to_vec(&stdin).unwrap(),
    }
}
