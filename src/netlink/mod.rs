//! Access to the kernel link, address and route tables.
//!
//! Everything above this module talks to a [`LinkRepository`] and never to a
//! netlink socket directly. Production code uses [`RtnetlinkLinks`]; tests use
//! `MemoryLinks` (feature `testing`), which models the kernel rules the
//! migration logic depends on.

pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod netns;
pub mod rtnl;

use std::fmt;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;

pub use error::{LinkError, LinkErrorKind};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryLinks, MemoryNamespaces};
pub use netns::{Entered, HostNamespaces, Namespaces, NetnsGuard};
pub use rtnl::RtnetlinkLinks;

/// A network interface as seen from the current namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub index: u32,
    /// Index of the bridge this link is enslaved to.
    pub master: Option<u32>,
}

/// An IPv4 address assigned to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRecord {
    pub network: Ipv4Network,
    /// Must equal the name of the link holding the address.
    pub label: String,
}

impl AddressRecord {
    pub fn new(network: Ipv4Network, label: impl Into<String>) -> Self {
        Self {
            network,
            label: label.into(),
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.network.ip()
    }
}

impl fmt::Display for AddressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} label {}", self.network, self.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Universe,
    Link,
    Host,
}

/// An IPv4 route in the main table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub destination: Ipv4Network,
    pub gateway: Option<Ipv4Addr>,
    pub link_index: u32,
    pub scope: Scope,
    pub metric: Option<u32>,
    pub preferred_source: Option<Ipv4Addr>,
}

impl RouteRecord {
    /// A gateway-less route for `destination` out of `link_index`.
    pub fn on_link(destination: Ipv4Network, link_index: u32) -> Self {
        Self {
            destination,
            gateway: None,
            link_index,
            scope: Scope::Link,
            metric: None,
            preferred_source: None,
        }
    }

    /// A route for `destination` through `gateway`.
    pub fn via(destination: Ipv4Network, gateway: Ipv4Addr, link_index: u32) -> Self {
        Self {
            destination,
            gateway: Some(gateway),
            link_index,
            scope: Scope::Universe,
            metric: None,
            preferred_source: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.destination.prefix() == 0
    }

    /// The same route bound to another link.
    pub fn rehomed(&self, link_index: u32) -> Self {
        Self {
            link_index,
            ..self.clone()
        }
    }
}

impl fmt::Display for RouteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "default")?;
        } else {
            write!(f, "{}", self.destination)?;
        }
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        write!(f, " dev #{}", self.link_index)?;
        if let Some(metric) = self.metric {
            write!(f, " metric {}", metric)?;
        }
        Ok(())
    }
}

/// Query and mutation surface over the link, address and route tables of one
/// network namespace.
///
/// Failures carry a [`LinkErrorKind`] so callers can tell benign races
/// (`AlreadyExists` on add, `Gone` on delete) from real errors.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn link_by_name(&self, name: &str) -> Result<Link, LinkError>;
    async fn link_by_index(&self, index: u32) -> Result<Link, LinkError>;

    /// Create a bridge link. The new link starts administratively down.
    async fn add_bridge(&self, name: &str) -> Result<(), LinkError>;
    async fn set_link_up(&self, link: &Link) -> Result<(), LinkError>;
    async fn set_master(&self, link: &Link, master: &Link) -> Result<(), LinkError>;
    async fn clear_master(&self, link: &Link) -> Result<(), LinkError>;
    async fn delete_link(&self, link: &Link) -> Result<(), LinkError>;

    /// IPv4 addresses on `link`, in kernel order.
    async fn addresses(&self, link: &Link) -> Result<Vec<AddressRecord>, LinkError>;
    async fn add_address(&self, link: &Link, addr: &AddressRecord) -> Result<(), LinkError>;
    async fn del_address(&self, link: &Link, addr: &AddressRecord) -> Result<(), LinkError>;

    /// IPv4 unicast routes of the main table, optionally only those leaving
    /// through `link`, in kernel enumeration order.
    async fn routes(&self, link: Option<&Link>) -> Result<Vec<RouteRecord>, LinkError>;
    async fn add_route(&self, route: &RouteRecord) -> Result<(), LinkError>;
    async fn del_route(&self, route: &RouteRecord) -> Result<(), LinkError>;
}
