mod dhcp;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hostbr::config::{
    NetConf, DEFAULT_BRIDGE_NAME, DEFAULT_DHCP_BIN, DEFAULT_DHCP_LOG, DEFAULT_DHCP_SOCKET,
    DEFAULT_NETCONF_PATH,
};
use hostbr::netlink::{LinkRepository, RtnetlinkLinks};
use hostbr::podroute::DEFAULT_SERVICE_CIDR;
use hostbr::route::find_default;
use hostbr::BridgeTopology;

use crate::dhcp::DhcpDaemon;

/// Node agent that bridges the host uplink for the hostbr CNI plugin
#[derive(Parser, Debug)]
#[command(name = "hostbr-agent", author, version, about)]
struct Cli {
    /// Uplink to put under the bridge [default: link of the host default route]
    #[arg(long, env = "HOSTBR_IFACE")]
    iface: Option<String>,

    /// Bridge to create on top of the uplink
    #[arg(long, env = "HOSTBR_BRIDGE", default_value = DEFAULT_BRIDGE_NAME)]
    bridge: String,

    /// Network configuration to complete
    #[arg(long, env = "HOSTBR_NETCONF", default_value = DEFAULT_NETCONF_PATH)]
    netconf: PathBuf,

    /// Cluster service CIDR to record in the network configuration
    #[arg(long, env = "HOSTBR_SERVICE_CIDR")]
    service_cidr: Option<String>,

    /// DHCP helper binary
    #[arg(long, default_value = DEFAULT_DHCP_BIN)]
    dhcp_bin: PathBuf,

    /// Socket the DHCP helper listens on
    #[arg(long, default_value = DEFAULT_DHCP_SOCKET)]
    dhcp_socket: PathBuf,

    /// File receiving the DHCP helper's output
    #[arg(long, default_value = DEFAULT_DHCP_LOG)]
    dhcp_log: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Everything the agent owns between start and stop.
struct Agent {
    topology: BridgeTopology<RtnetlinkLinks>,
    dhcp: DhcpDaemon,
}

impl Agent {
    async fn start(cli: Cli) -> Result<Self> {
        let links = RtnetlinkLinks::connect().context("failed to open netlink socket")?;

        let iface = match cli.iface {
            Some(iface) => iface,
            None => uplink(&links).await?,
        };
        info!("using {} as uplink for {}", iface, cli.bridge);

        let mut conf = NetConf::load(&cli.netconf)?;
        match conf.bridge_name() {
            Ok(name) if name != cli.bridge => warn!(
                "{} attaches pods to {} but the agent manages {}",
                cli.netconf.display(),
                name,
                cli.bridge
            ),
            Ok(_) => {}
            Err(e) => warn!("{}: {}", cli.netconf.display(), e),
        }
        match &cli.service_cidr {
            Some(cidr) => {
                conf.complete_service_cidr(&cli.netconf, cidr)?;
                info!("recorded service CIDR {} in {}", cidr, cli.netconf.display());
            }
            None if conf.service_ip_cidr.is_empty() => {
                warn!("no service CIDR configured, pods will route {}", DEFAULT_SERVICE_CIDR)
            }
            None => {}
        }

        let mut topology = BridgeTopology::new(links, cli.bridge, iface);
        topology
            .install()
            .await
            .with_context(|| format!("failed to install bridge {}", topology.bridge_name()))?;

        let mut dhcp = DhcpDaemon::new(cli.dhcp_bin, cli.dhcp_socket, cli.dhcp_log);
        if let Err(e) = dhcp.start() {
            if let Err(undo) = topology.uninstall().await {
                error!("failed to remove bridge {}: {}", topology.bridge_name(), undo);
            }
            return Err(e);
        }

        Ok(Self { topology, dhcp })
    }

    async fn stop(mut self) {
        self.dhcp.stop().await;
        match self.topology.uninstall().await {
            Ok(()) => info!("restored {}", self.topology.phys_name()),
            Err(e) => error!("failed to uninstall bridge {}: {}", self.topology.bridge_name(), e),
        }
    }
}

/// The link carrying the host default route.
async fn uplink<L: LinkRepository>(links: &L) -> Result<String> {
    let route = find_default(links, None)
        .await
        .context("no --iface given and the host has no default route")?;
    let link = links.link_by_index(route.link_index).await?;
    Ok(link.name)
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default subscriber")?;

    if !nix::unistd::geteuid().is_root() {
        bail!("hostbr-agent must run as root");
    }

    let agent = Agent::start(cli).await?;
    info!("agent running, waiting for SIGINT or SIGTERM");

    let waited = shutdown_signal().await;
    info!("shutting down");
    agent.stop().await;
    waited
}
