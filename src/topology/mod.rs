//! Host bridge topology.
//!
//! Installing the topology turns the physical uplink into a port of the bridge
//! and moves the host's addresses and routes onto the bridge. Uninstalling
//! reverses both steps and removes the bridge.

pub mod migrate;

use tracing::{error, info, warn};

use crate::netlink::error::{tolerate_exists, tolerate_gone};
use crate::netlink::{Link, LinkError, LinkRepository};

pub use migrate::migrate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyState {
    Uninstalled,
    Installed,
}

/// Look up the bridge `name`, creating it and bringing it up if missing.
///
/// Calling this when the bridge already exists is a no-op.
pub async fn get_or_create_bridge<L>(links: &L, name: &str) -> Result<Link, LinkError>
where
    L: LinkRepository + ?Sized,
{
    match links.link_by_name(name).await {
        Ok(link) => return Ok(link),
        Err(e) if e.is_not_found() => {
            warn!("bridge {} doesn't exist, creating it", name);
        }
        Err(e) => {
            error!("failed to get bridge device {}: {}", name, e);
            return Err(e);
        }
    }

    // another process may have created it in the meantime
    tolerate_exists(links.add_bridge(name).await)?;
    let bridge = links.link_by_name(name).await?;
    links.set_link_up(&bridge).await.map_err(|e| {
        error!("failed to set up bridge device {}: {}", name, e);
        e
    })?;
    Ok(bridge)
}

/// The bridge/uplink pair managed by one agent.
///
/// `install` and `uninstall` are each meant to run once per agent lifetime
/// and are not safe to run concurrently.
pub struct BridgeTopology<L> {
    links: L,
    bridge_name: String,
    phys_name: String,
    state: TopologyState,
}

impl<L: LinkRepository> BridgeTopology<L> {
    pub fn new(links: L, bridge_name: impl Into<String>, phys_name: impl Into<String>) -> Self {
        Self {
            links,
            bridge_name: bridge_name.into(),
            phys_name: phys_name.into(),
            state: TopologyState::Uninstalled,
        }
    }

    pub fn state(&self) -> TopologyState {
        self.state
    }

    pub fn links(&self) -> &L {
        &self.links
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }

    pub fn phys_name(&self) -> &str {
        &self.phys_name
    }

    /// Enslave the uplink to the bridge and move its addresses and routes.
    pub async fn install(&mut self) -> Result<(), LinkError> {
        let bridge = get_or_create_bridge(&self.links, &self.bridge_name).await?;
        let phys = self.links.link_by_name(&self.phys_name).await.map_err(|e| {
            warn!("failed to get target device {}: {}", self.phys_name, e);
            e
        })?;

        self.links.set_master(&phys, &bridge).await.map_err(|e| {
            error!("failed to set {} master to {}: {}", phys.name, bridge.name, e);
            e
        })?;
        info!("set {} master to {}", phys.name, bridge.name);

        migrate(&self.links, &phys, &bridge).await?;
        self.state = TopologyState::Installed;
        info!("bridge {} installed on top of {}", bridge.name, phys.name);
        Ok(())
    }

    /// Release the uplink, move everything back to it and delete the bridge.
    ///
    /// A failure to release the uplink is only logged. A failed migration
    /// keeps the bridge so that no address is lost with it.
    pub async fn uninstall(&mut self) -> Result<(), LinkError> {
        let bridge = match self.links.link_by_name(&self.bridge_name).await {
            Ok(link) => link,
            Err(e) if e.is_not_found() => {
                warn!("bridge {} is already gone, nothing to restore", self.bridge_name);
                self.state = TopologyState::Uninstalled;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let phys = self.links.link_by_name(&self.phys_name).await?;

        match self.links.clear_master(&phys).await {
            Ok(()) => info!("released {} from {}", phys.name, bridge.name),
            Err(e) => error!("failed to set no master for {}: {}", phys.name, e),
        }

        migrate(&self.links, &bridge, &phys).await?;

        tolerate_gone(self.links.delete_link(&bridge).await).map_err(|e| {
            error!("failed to remove bridge device {}: {}", bridge.name, e);
            e
        })?;
        self.state = TopologyState::Uninstalled;
        info!("bridge {} removed, {} restored", bridge.name, phys.name);
        Ok(())
    }
}
