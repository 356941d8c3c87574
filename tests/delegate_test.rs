mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;

use serde_json::json;

use hostbr::netlink::LinkRepository;
use hostbr::BridgePlugin;

use common::{bridged_host, cmd_args, pod_namespace, POD_ARGS};

// Records its environment and stdin next to itself, then prints a result.
const FAKE_BRIDGE: &str = r#"#!/bin/sh
dir=$(dirname "$0")
cat > "$dir/stdin.json"
echo "$CNI_COMMAND $CNI_CONTAINERID $CNI_IFNAME" > "$dir/env.txt"
echo '{"cniVersion":"0.3.1","interfaces":[{"name":"eth0","sandbox":"/var/run/netns/cni-test"}],"ips":[{"version":"4","interface":0,"address":"192.168.1.60/24","gateway":"192.168.1.1"}],"routes":[{"dst":"0.0.0.0/0","gw":"192.168.1.1"}]}'
"#;

// Runs as the only test in this binary so no concurrent fork can hold the
// script open for writing when it is executed.
#[tokio::test]
async fn delegate_result_is_republished() {
    let bin = tempfile::tempdir().unwrap();
    let plugin_path = bin.path().join("bridge");
    fs::write(&plugin_path, FAKE_BRIDGE).unwrap();
    fs::set_permissions(&plugin_path, fs::Permissions::from_mode(0o755)).unwrap();

    let host = bridged_host().await;
    let (namespaces, pod) = pod_namespace("192.168.1.60/24").await;
    let delegate = json!({
        "type": "bridge",
        "bridge": "br0",
        "isGateway": false,
        "ipam": {"type": "dhcp"}
    });
    let conf = json!({
        "cniVersion": "0.3.1",
        "name": "hostbr",
        "type": "hostbr",
        "delegate": delegate,
    });
    let args = cmd_args(conf, POD_ARGS, bin.path().to_str().unwrap());

    let result = BridgePlugin::new(args, &host, &namespaces)
        .add_network()
        .await
        .unwrap();

    let stdin = fs::read(bin.path().join("stdin.json")).unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&stdin).unwrap();
    assert_eq!(sent, delegate);
    let env = fs::read_to_string(bin.path().join("env.txt")).unwrap();
    assert_eq!(env.trim(), "ADD 3f2a9c eth0");

    let printed = serde_json::to_value(&result).unwrap();
    assert_eq!(
        printed,
        json!({
            "cniVersion": "0.3.1",
            "interfaces": [{"name": "eth0", "sandbox": "/var/run/netns/cni-test"}],
            "ips": [{
                "version": "4",
                "interface": 0,
                "address": "192.168.1.60/24",
                "gateway": "192.168.1.1"
            }],
            "routes": [{"dst": "0.0.0.0/0", "gw": "192.168.1.1"}]
        })
    );

    let eth0 = pod.link_by_name("eth0").await.unwrap();
    assert!(pod
        .routes(Some(&eth0))
        .await
        .unwrap()
        .iter()
        .any(|r| r.destination == "10.96.0.0/12".parse().unwrap()));
}
