use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

/// The DHCP helper daemon the delegated `dhcp` IPAM plugin talks to.
pub struct DhcpDaemon {
    bin: PathBuf,
    socket: PathBuf,
    log: PathBuf,
    child: Option<Child>,
}

impl DhcpDaemon {
    pub fn new(bin: PathBuf, socket: PathBuf, log: PathBuf) -> Self {
        Self {
            bin,
            socket,
            log,
            child: None,
        }
    }

    /// Spawn `<bin> daemon` unless a helper already serves the socket.
    pub fn start(&mut self) -> Result<()> {
        if self.socket.exists() {
            info!(
                "DHCP daemon socket {} already exists, not starting another",
                self.socket.display()
            );
            return Ok(());
        }

        if let Some(dir) = self.log.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log)
            .with_context(|| format!("failed to open DHCP log {}", self.log.display()))?;
        let stderr = stdout.try_clone().context("failed to duplicate DHCP log handle")?;

        let child = Command::new(&self.bin)
            .arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start DHCP daemon {}", self.bin.display()))?;
        info!(
            "started DHCP daemon {} (pid {:?}), logging to {}",
            self.bin.display(),
            child.id(),
            self.log.display()
        );
        self.child = Some(child);
        Ok(())
    }

    /// Kill the helper started by [`DhcpDaemon::start`] and remove its socket.
    ///
    /// A helper this agent did not start is left alone.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            debug!("no DHCP daemon to stop");
            return;
        };

        match child.kill().await {
            Ok(()) => info!("stopped DHCP daemon"),
            Err(e) => error!("failed to kill DHCP daemon: {}", e),
        }

        match fs::remove_file(&self.socket) {
            Ok(()) => debug!("removed {}", self.socket.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!("failed to remove {}: {}", self.socket.display(), e),
        }
    }
}
