//! In-process model of one namespace's link, address and route tables.
//!
//! Enforces the kernel behaviour the topology code relies on:
//! - an address label must begin with the name of its link;
//! - adding an address installs its connected subnet route;
//! - deleting an address removes the routes that depended on it;
//! - a gateway route needs an on-link route covering the gateway;
//! - duplicates fail with `AlreadyExists`, missing deletes with `Gone`;
//! - routes are listed in prefix order, so a default route comes first.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ipnetwork::Ipv4Network;

use super::netns::{Entered, Namespaces, NetnsError};
use super::{AddressRecord, Link, LinkError, LinkErrorKind, LinkRepository, RouteRecord, Scope};

#[derive(Debug, Clone)]
struct LinkState {
    link: Link,
    is_bridge: bool,
    up: bool,
}

#[derive(Debug, Default)]
struct Tables {
    links: Vec<LinkState>,
    addresses: Vec<(u32, AddressRecord)>,
    routes: Vec<RouteRecord>,
    next_index: u32,
    installed: Vec<RouteRecord>,
    failures: HashMap<&'static str, LinkErrorKind>,
}

impl Tables {
    fn link(&self, index: u32) -> Option<&LinkState> {
        self.links.iter().find(|l| l.link.index == index)
    }

    fn require(&self, op: &'static str, link: &Link) -> Result<(), LinkError> {
        match self.link(link.index) {
            Some(state) if state.link.name == link.name => Ok(()),
            _ => Err(LinkError::new(
                LinkErrorKind::NotFound,
                op,
                link.name.as_str(),
                "no such device",
            )),
        }
    }

    fn injected(&mut self, op: &'static str, target: &str) -> Result<(), LinkError> {
        match self.failures.remove(op) {
            Some(kind) => Err(LinkError::new(kind, op, target, "injected failure")),
            None => Ok(()),
        }
    }

    fn reachable(&self, link_index: u32, gateway: Ipv4Addr) -> bool {
        self.routes
            .iter()
            .any(|r| {
                r.link_index == link_index && r.gateway.is_none() && r.destination.contains(gateway)
            })
    }

    // Drop gateway routes whose next hop lost its on-link route.
    fn prune_unreachable(&mut self, link_index: u32) {
        loop {
            let dead = self.routes.iter().position(|r| {
                r.link_index == link_index
                    && r.gateway.map_or(false, |gw| !self.reachable(link_index, gw))
            });
            match dead {
                Some(pos) => {
                    self.routes.remove(pos);
                }
                None => break,
            }
        }
    }
}

/// Shared handle to an in-memory namespace. Clones see the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryLinks {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryLinks {
    pub fn new() -> Self {
        let links = Self::default();
        links.lock().next_index = 1;
        links
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // a panicking test thread must not hide the tables from the others
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a non-bridge device in the up state.
    pub fn add_device(&self, name: &str) -> Link {
        let mut tables = self.lock();
        let link = Link {
            name: name.to_string(),
            index: tables.next_index,
            master: None,
        };
        tables.next_index += 1;
        tables.links.push(LinkState {
            link: link.clone(),
            is_bridge: false,
            up: true,
        });
        link
    }

    /// Make the next call of `op` (e.g. `"add address"`) fail with `kind`.
    pub fn fail_next(&self, op: &'static str, kind: LinkErrorKind) {
        self.lock().failures.insert(op, kind);
    }

    /// Routes successfully added through [`LinkRepository::add_route`], in order.
    pub fn installed_routes(&self) -> Vec<RouteRecord> {
        self.lock().installed.clone()
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.lock().links.iter().any(|l| l.link.name == name && l.up)
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.lock().links.iter().any(|l| l.link.name == name)
    }
}

#[async_trait]
impl LinkRepository for MemoryLinks {
    async fn link_by_name(&self, name: &str) -> Result<Link, LinkError> {
        let mut tables = self.lock();
        tables.injected("get link", name)?;
        tables
            .links
            .iter()
            .find(|l| l.link.name == name)
            .map(|l| l.link.clone())
            .ok_or_else(|| {
                LinkError::new(LinkErrorKind::NotFound, "get link", name, "no such device")
            })
    }

    async fn link_by_index(&self, index: u32) -> Result<Link, LinkError> {
        let tables = self.lock();
        tables.link(index).map(|l| l.link.clone()).ok_or_else(|| {
            let target = format!("#{}", index);
            LinkError::new(LinkErrorKind::NotFound, "get link", target, "no such device")
        })
    }

    async fn add_bridge(&self, name: &str) -> Result<(), LinkError> {
        let mut tables = self.lock();
        tables.injected("add bridge", name)?;
        if tables.links.iter().any(|l| l.link.name == name) {
            let kind = LinkErrorKind::AlreadyExists;
            return Err(LinkError::new(kind, "add bridge", name, "file exists"));
        }
        let index = tables.next_index;
        tables.next_index += 1;
        tables.links.push(LinkState {
            link: Link {
                name: name.to_string(),
                index,
                master: None,
            },
            is_bridge: true,
            up: false,
        });
        Ok(())
    }

    async fn set_link_up(&self, link: &Link) -> Result<(), LinkError> {
        let mut tables = self.lock();
        tables.require("set up", link)?;
        if let Some(state) = tables.links.iter_mut().find(|l| l.link.index == link.index) {
            state.up = true;
        }
        Ok(())
    }

    async fn set_master(&self, link: &Link, master: &Link) -> Result<(), LinkError> {
        let mut tables = self.lock();
        tables.require("set master", link)?;
        tables.require("set master", master)?;
        if !tables.link(master.index).map_or(false, |m| m.is_bridge) {
            return Err(LinkError::new(
                LinkErrorKind::Other,
                "set master",
                master.name.as_str(),
                "not a bridge",
            ));
        }
        if let Some(state) = tables.links.iter_mut().find(|l| l.link.index == link.index) {
            state.link.master = Some(master.index);
        }
        Ok(())
    }

    async fn clear_master(&self, link: &Link) -> Result<(), LinkError> {
        let mut tables = self.lock();
        tables.injected("set nomaster", &link.name)?;
        tables.require("set nomaster", link)?;
        if let Some(state) = tables.links.iter_mut().find(|l| l.link.index == link.index) {
            state.link.master = None;
        }
        Ok(())
    }

    async fn delete_link(&self, link: &Link) -> Result<(), LinkError> {
        let mut tables = self.lock();
        tables.require("delete link", link)?;
        tables.links.retain(|l| l.link.index != link.index);
        tables.addresses.retain(|(idx, _)| *idx != link.index);
        tables.routes.retain(|r| r.link_index != link.index);
        for state in tables.links.iter_mut() {
            if state.link.master == Some(link.index) {
                state.link.master = None;
            }
        }
        Ok(())
    }

    async fn addresses(&self, link: &Link) -> Result<Vec<AddressRecord>, LinkError> {
        let tables = self.lock();
        tables.require("list addresses", link)?;
        Ok(tables
            .addresses
            .iter()
            .filter(|(idx, _)| *idx == link.index)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn add_address(&self, link: &Link, addr: &AddressRecord) -> Result<(), LinkError> {
        let target = format!("{} dev {}", addr.network, link.name);
        let mut tables = self.lock();
        tables.injected("add address", &target)?;
        tables.require("add address", link)?;
        if !addr.label.starts_with(&link.name) {
            return Err(LinkError::new(
                LinkErrorKind::Other,
                "add address",
                target,
                "label must begin with interface name",
            ));
        }
        if tables
            .addresses
            .iter()
            .any(|(idx, a)| *idx == link.index && a.network == addr.network)
        {
            let kind = LinkErrorKind::AlreadyExists;
            return Err(LinkError::new(kind, "add address", target, "file exists"));
        }
        tables.addresses.push((link.index, addr.clone()));

        let subnet = Ipv4Network::new(addr.network.network(), addr.network.prefix())
            .map_err(|e| {
                LinkError::new(LinkErrorKind::Other, "add address", target.as_str(), e.to_string())
            })?;
        if subnet.prefix() < 32
            && !tables
                .routes
                .iter()
                .any(|r| r.destination == subnet && r.link_index == link.index)
        {
            tables.routes.push(RouteRecord {
                destination: subnet,
                gateway: None,
                link_index: link.index,
                scope: Scope::Link,
                metric: None,
                preferred_source: Some(addr.ip()),
            });
        }
        Ok(())
    }

    async fn del_address(&self, link: &Link, addr: &AddressRecord) -> Result<(), LinkError> {
        let target = format!("{} dev {}", addr.network, link.name);
        let mut tables = self.lock();
        tables.injected("delete address", &target)?;
        tables.require("delete address", link)?;
        let pos = tables
            .addresses
            .iter()
            .position(|(idx, a)| *idx == link.index && a.network == addr.network)
            .ok_or_else(|| {
                LinkError::new(
                    LinkErrorKind::Gone,
                    "delete address",
                    target.as_str(),
                    "cannot assign requested address",
                )
            })?;
        tables.addresses.remove(pos);

        let ip = addr.ip();
        tables
            .routes
            .retain(|r| !(r.link_index == link.index && r.preferred_source == Some(ip)));
        tables.prune_unreachable(link.index);
        Ok(())
    }

    async fn routes(&self, link: Option<&Link>) -> Result<Vec<RouteRecord>, LinkError> {
        let tables = self.lock();
        if let Some(link) = link {
            tables.require("list routes", link)?;
        }
        let mut routes: Vec<RouteRecord> = tables
            .routes
            .iter()
            .filter(|r| link.map_or(true, |l| r.link_index == l.index))
            .cloned()
            .collect();
        routes.sort_by_key(|r| (u32::from(r.destination.network()), r.destination.prefix()));
        Ok(routes)
    }

    async fn add_route(&self, route: &RouteRecord) -> Result<(), LinkError> {
        let target = route.to_string();
        let mut tables = self.lock();
        tables.injected("add route", &target)?;
        if tables.link(route.link_index).is_none() {
            let kind = LinkErrorKind::NotFound;
            return Err(LinkError::new(kind, "add route", target, "no such device"));
        }
        if let Some(gw) = route.gateway {
            if !tables.reachable(route.link_index, gw) {
                let kind = LinkErrorKind::Other;
                return Err(LinkError::new(kind, "add route", target, "network is unreachable"));
            }
        }
        if tables
            .routes
            .iter()
            .any(|r| r.destination == route.destination && r.metric == route.metric)
        {
            let kind = LinkErrorKind::AlreadyExists;
            return Err(LinkError::new(kind, "add route", target, "file exists"));
        }
        tables.routes.push(route.clone());
        tables.installed.push(route.clone());
        Ok(())
    }

    async fn del_route(&self, route: &RouteRecord) -> Result<(), LinkError> {
        let target = route.to_string();
        let mut tables = self.lock();
        tables.injected("delete route", &target)?;
        let pos = tables
            .routes
            .iter()
            .position(|r| {
                r.destination == route.destination
                    && r.link_index == route.link_index
                    && (route.gateway.is_none() || r.gateway == route.gateway)
            })
            .ok_or_else(|| {
                let kind = LinkErrorKind::Gone;
                LinkError::new(kind, "delete route", target.as_str(), "no such process")
            })?;
        let removed = tables.routes.remove(pos);
        if removed.gateway.is_none() {
            tables.prune_unreachable(removed.link_index);
        }
        Ok(())
    }
}

/// A set of in-memory namespaces keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryNamespaces {
    namespaces: Arc<Mutex<HashMap<PathBuf, MemoryLinks>>>,
}

impl MemoryNamespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or return) the namespace at `path`.
    pub fn add_namespace(&self, path: impl Into<PathBuf>) -> MemoryLinks {
        let mut namespaces = self.namespaces.lock().unwrap_or_else(|p| p.into_inner());
        namespaces.entry(path.into()).or_insert_with(MemoryLinks::new).clone()
    }
}

impl Namespaces for MemoryNamespaces {
    type Links = MemoryLinks;

    fn enter(&self, path: &Path) -> Result<Entered<MemoryLinks>, NetnsError> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|p| p.into_inner());
        let links = namespaces.get(path).cloned().ok_or_else(|| NetnsError::Open {
            path: path.to_path_buf(),
            source: nix::errno::Errno::ENOENT,
        })?;
        Ok(Entered::new(links, None))
    }
}
