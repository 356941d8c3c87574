// File: tests/integration_test.rs

use std::path::PathBuf;
use std::process::Command;

use hostbr::netlink::{HostNamespaces, LinkRepository, Namespaces, RtnetlinkLinks};
use hostbr::topology::get_or_create_bridge;

// Function to create a test netns
fn create_test_netns(name: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let _ = Command::new("ip").args(["netns", "delete", name]).output();

    let output = Command::new("ip").args(["netns", "add", name]).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("Failed to create netns: {}", stderr).into());
    }

    Ok(PathBuf::from(format!("/var/run/netns/{}", name)))
}

// Function to delete a test netns
fn delete_test_netns(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::new("ip").args(["netns", "delete", name]).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("Failed to delete netns: {}", stderr).into());
    }
    Ok(())
}

// This test requires root privileges to run
#[tokio::test]
#[ignore]
async fn test_bridge_created_inside_pod_namespace_only() -> Result<(), Box<dyn std::error::Error>> {
    if !nix::unistd::geteuid().is_root() {
        println!("Skipping test_bridge_created_inside_pod_namespace_only: not running as root");
        return Ok(());
    }

    let netns_name = "hostbr_test_netns";
    let netns_path = create_test_netns(netns_name)?;

    let inside = {
        let entered = HostNamespaces.enter(&netns_path)?;
        let bridge = get_or_create_bridge(entered.links(), "hbtest0").await?;
        let again = get_or_create_bridge(entered.links(), "hbtest0").await?;
        assert_eq!(bridge.index, again.index);
        entered.links().link_by_name("hbtest0").await.is_ok()
    };
    assert!(inside);

    // back in the original namespace
    let host = RtnetlinkLinks::connect()?;
    let err = host.link_by_name("hbtest0").await.unwrap_err();
    assert!(err.is_not_found());

    delete_test_netns(netns_name)?;
    Ok(())
}
