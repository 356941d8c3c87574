use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use futures::TryStreamExt;
use ipnetwork::Ipv4Network;
use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkMessage};
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteHeader, RouteMessage, RouteScope, RouteType,
};
use netlink_packet_route::AddressFamily;
use rtnetlink::{new_connection, Handle, IpVersion};
use tracing::debug;

use super::{AddressRecord, Link, LinkError, LinkErrorKind, LinkRepository, RouteRecord, Scope};

/// [`LinkRepository`] backed by an rtnetlink socket.
///
/// The socket belongs to the network namespace of the thread that called
/// [`RtnetlinkLinks::connect`], regardless of where it is used afterwards.
pub struct RtnetlinkLinks {
    handle: Handle,
}

impl RtnetlinkLinks {
    /// Open a netlink socket and spawn its connection task on the current
    /// tokio runtime.
    pub fn connect() -> Result<Self, LinkError> {
        let (connection, handle, _) = new_connection().map_err(|e| {
            LinkError::new(LinkErrorKind::Other, "open", "netlink socket", e.to_string())
        })?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }
}

fn nl_err(
    op: &'static str,
    target: impl Into<String>,
) -> impl FnOnce(rtnetlink::Error) -> LinkError {
    let target = target.into();
    move |e| {
        let kind = match &e {
            rtnetlink::Error::NetlinkError(msg) => LinkError::kind_from_errno(msg.raw_code()),
            _ => LinkErrorKind::Other,
        };
        LinkError::new(kind, op, target, e.to_string())
    }
}

fn link_from_message(msg: &LinkMessage) -> Option<Link> {
    let name = msg.attributes.iter().find_map(|a| match a {
        LinkAttribute::IfName(n) => Some(n.clone()),
        _ => None,
    })?;
    let master = msg.attributes.iter().find_map(|a| match a {
        LinkAttribute::Controller(idx) if *idx != 0 => Some(*idx),
        _ => None,
    });
    Some(Link {
        name,
        index: msg.header.index,
        master,
    })
}

fn address_from_message(msg: &AddressMessage) -> Option<AddressRecord> {
    if msg.header.family != AddressFamily::Inet {
        return None;
    }
    // IFA_LOCAL is the interface address; IFA_ADDRESS is the peer on p2p links.
    let local = msg.attributes.iter().find_map(|a| match a {
        AddressAttribute::Local(IpAddr::V4(ip)) => Some(*ip),
        _ => None,
    });
    let ip = local.or_else(|| {
        msg.attributes.iter().find_map(|a| match a {
            AddressAttribute::Address(IpAddr::V4(ip)) => Some(*ip),
            _ => None,
        })
    })?;
    let label = msg
        .attributes
        .iter()
        .find_map(|a| match a {
            AddressAttribute::Label(l) => Some(l.clone()),
            _ => None,
        })
        .unwrap_or_default();
    let network = Ipv4Network::new(ip, msg.header.prefix_len).ok()?;
    Some(AddressRecord { network, label })
}

fn scope_from_kernel(scope: RouteScope) -> Scope {
    match scope {
        RouteScope::Link => Scope::Link,
        RouteScope::Host => Scope::Host,
        _ => Scope::Universe,
    }
}

fn scope_to_kernel(scope: Scope) -> RouteScope {
    match scope {
        Scope::Universe => RouteScope::Universe,
        Scope::Link => RouteScope::Link,
        Scope::Host => RouteScope::Host,
    }
}

fn route_from_message(msg: &RouteMessage) -> Option<RouteRecord> {
    if msg.header.address_family != AddressFamily::Inet
        || msg.header.table != RouteHeader::RT_TABLE_MAIN
        || msg.header.kind != RouteType::Unicast
    {
        return None;
    }

    let mut destination = Ipv4Addr::UNSPECIFIED;
    let mut gateway = None;
    let mut link_index = None;
    let mut metric = None;
    let mut preferred_source = None;
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(RouteAddress::Inet(ip)) => destination = *ip,
            RouteAttribute::Gateway(RouteAddress::Inet(ip)) => gateway = Some(*ip),
            RouteAttribute::Oif(idx) => link_index = Some(*idx),
            RouteAttribute::Priority(p) => metric = Some(*p),
            RouteAttribute::PrefSource(RouteAddress::Inet(ip)) => preferred_source = Some(*ip),
            _ => {}
        }
    }

    Some(RouteRecord {
        destination: Ipv4Network::new(destination, msg.header.destination_prefix_length).ok()?,
        gateway,
        // multipath routes carry no Oif; they are not ours to move
        link_index: link_index?,
        scope: scope_from_kernel(msg.header.scope),
        metric,
        preferred_source,
    })
}

fn route_to_message(route: &RouteRecord) -> RouteMessage {
    let mut msg = RouteMessage::default();
    msg.header.address_family = AddressFamily::Inet;
    msg.header.destination_prefix_length = route.destination.prefix();
    msg.header.table = RouteHeader::RT_TABLE_MAIN;
    msg.header.scope = scope_to_kernel(route.scope);
    msg.header.kind = RouteType::Unicast;
    if route.destination.prefix() > 0 {
        msg.attributes
            .push(RouteAttribute::Destination(RouteAddress::Inet(route.destination.network())));
    }
    if let Some(gw) = route.gateway {
        msg.attributes.push(RouteAttribute::Gateway(RouteAddress::Inet(gw)));
    }
    msg.attributes.push(RouteAttribute::Oif(route.link_index));
    if let Some(metric) = route.metric {
        msg.attributes.push(RouteAttribute::Priority(metric));
    }
    msg
}

#[async_trait]
impl LinkRepository for RtnetlinkLinks {
    async fn link_by_name(&self, name: &str) -> Result<Link, LinkError> {
        let msg = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute()
            .try_next()
            .await
            .map_err(nl_err("get link", name))?;
        msg.as_ref()
            .and_then(link_from_message)
            .ok_or_else(|| {
                LinkError::new(LinkErrorKind::NotFound, "get link", name, "no such device")
            })
    }

    async fn link_by_index(&self, index: u32) -> Result<Link, LinkError> {
        let target = format!("#{}", index);
        let msg = self
            .handle
            .link()
            .get()
            .match_index(index)
            .execute()
            .try_next()
            .await
            .map_err(nl_err("get link", target.clone()))?;
        msg.as_ref()
            .and_then(link_from_message)
            .ok_or_else(|| {
                LinkError::new(LinkErrorKind::NotFound, "get link", target, "no such device")
            })
    }

    async fn add_bridge(&self, name: &str) -> Result<(), LinkError> {
        self.handle
            .link()
            .add()
            .bridge(name.to_string())
            .execute()
            .await
            .map_err(nl_err("add bridge", name))
    }

    async fn set_link_up(&self, link: &Link) -> Result<(), LinkError> {
        self.handle
            .link()
            .set(link.index)
            .up()
            .execute()
            .await
            .map_err(nl_err("set up", link.name.as_str()))
    }

    async fn set_master(&self, link: &Link, master: &Link) -> Result<(), LinkError> {
        self.handle
            .link()
            .set(link.index)
            .controller(master.index)
            .execute()
            .await
            .map_err(nl_err("set master", format!("{} -> {}", link.name, master.name)))
    }

    async fn clear_master(&self, link: &Link) -> Result<(), LinkError> {
        self.handle
            .link()
            .set(link.index)
            .nocontroller()
            .execute()
            .await
            .map_err(nl_err("set nomaster", link.name.as_str()))
    }

    async fn delete_link(&self, link: &Link) -> Result<(), LinkError> {
        self.handle
            .link()
            .del(link.index)
            .execute()
            .await
            .map_err(nl_err("delete link", link.name.as_str()))
    }

    async fn addresses(&self, link: &Link) -> Result<Vec<AddressRecord>, LinkError> {
        let messages: Vec<AddressMessage> = self
            .handle
            .address()
            .get()
            .set_link_index_filter(link.index)
            .execute()
            .try_collect()
            .await
            .map_err(nl_err("list addresses", link.name.as_str()))?;
        Ok(messages
            .iter()
            .filter(|m| m.header.index == link.index)
            .filter_map(address_from_message)
            .collect())
    }

    async fn add_address(&self, link: &Link, addr: &AddressRecord) -> Result<(), LinkError> {
        debug!("adding {} to {}", addr, link.name);
        let mut req = self
            .handle
            .address()
            .add(link.index, IpAddr::V4(addr.ip()), addr.network.prefix());
        req.message_mut()
            .attributes
            .push(AddressAttribute::Label(addr.label.clone()));
        req.execute()
            .await
            .map_err(nl_err("add address", format!("{} dev {}", addr.network, link.name)))
    }

    async fn del_address(&self, link: &Link, addr: &AddressRecord) -> Result<(), LinkError> {
        let mut msg = AddressMessage::default();
        msg.header.family = AddressFamily::Inet;
        msg.header.prefix_len = addr.network.prefix();
        msg.header.index = link.index;
        msg.attributes.push(AddressAttribute::Local(IpAddr::V4(addr.ip())));
        msg.attributes.push(AddressAttribute::Address(IpAddr::V4(addr.ip())));
        self.handle
            .address()
            .del(msg)
            .execute()
            .await
            .map_err(nl_err("delete address", format!("{} dev {}", addr.network, link.name)))
    }

    async fn routes(&self, link: Option<&Link>) -> Result<Vec<RouteRecord>, LinkError> {
        let messages: Vec<RouteMessage> = self
            .handle
            .route()
            .get(IpVersion::V4)
            .execute()
            .try_collect()
            .await
            .map_err(nl_err("list routes", link.map(|l| l.name.clone()).unwrap_or_default()))?;
        Ok(messages
            .iter()
            .filter_map(route_from_message)
            .filter(|r| link.map_or(true, |l| r.link_index == l.index))
            .collect())
    }

    async fn add_route(&self, route: &RouteRecord) -> Result<(), LinkError> {
        let mut req = self
            .handle
            .route()
            .add()
            .v4()
            .destination_prefix(route.destination.network(), route.destination.prefix())
            .output_interface(route.link_index)
            .scope(scope_to_kernel(route.scope));
        if let Some(gw) = route.gateway {
            req = req.gateway(gw);
        }
        if let Some(metric) = route.metric {
            req = req.priority(metric);
        }
        if let Some(src) = route.preferred_source {
            req = req.pref_source(src);
        }
        req.execute().await.map_err(nl_err("add route", route.to_string()))
    }

    async fn del_route(&self, route: &RouteRecord) -> Result<(), LinkError> {
        self.handle
            .route()
            .del(route_to_message(route))
            .execute()
            .await
            .map_err(nl_err("delete route", route.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route_message_has_no_destination() {
        let gw = Ipv4Addr::new(192, 168, 1, 1);
        let route = RouteRecord::via("0.0.0.0/0".parse().unwrap(), gw, 3);
        let msg = route_to_message(&route);
        assert_eq!(msg.header.destination_prefix_length, 0);
        assert!(!msg
            .attributes
            .iter()
            .any(|a| matches!(a, RouteAttribute::Destination(_))));
        assert_eq!(route_from_message(&msg), Some(route));
    }

    #[test]
    fn foreign_tables_are_skipped() {
        let route = RouteRecord::on_link("10.0.0.0/8".parse().unwrap(), 3);
        let mut msg = route_to_message(&route);
        msg.header.table = 255;
        assert_eq!(route_from_message(&msg), None);
    }

    #[test]
    fn address_prefers_local_attribute() {
        let mut msg = AddressMessage::default();
        msg.header.family = AddressFamily::Inet;
        msg.header.prefix_len = 24;
        msg.attributes.push(AddressAttribute::Address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        msg.attributes.push(AddressAttribute::Local(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        msg.attributes.push(AddressAttribute::Label("eth0".to_string()));
        let addr = address_from_message(&msg).unwrap();
        assert_eq!(addr.network, "10.0.0.1/24".parse().unwrap());
        assert_eq!(addr.label, "eth0");
    }
}
