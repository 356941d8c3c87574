use std::env;
use std::io::{self, Read};

use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::error::Error;
use crate::netlink::{HostNamespaces, RtnetlinkLinks};
use crate::plugin::BridgePlugin;
use crate::types::{CmdArgs, ErrorResult, VersionResult};
use crate::{CNI_VERSION, SUPPORTED_VERSIONS};

/// Parse command arguments from environment
pub fn parse_args(stdin_data: Vec<u8>) -> Result<CmdArgs, Error> {
    args_from(|key| env::var(key).ok(), stdin_data)
}

/// The `cniVersion` of the request on stdin, or [`CNI_VERSION`] when it has none.
pub fn request_version(stdin_data: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(stdin_data)
        .ok()
        .and_then(|conf| conf.get("cniVersion")?.as_str().map(str::to_string))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| CNI_VERSION.to_string())
}

/// Build [`CmdArgs`] from a variable lookup. `CNI_ARGS` is kept verbatim.
pub fn args_from<F>(var: F, stdin_data: Vec<u8>) -> Result<CmdArgs, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let required = |key: &str| {
        var(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Protocol(format!("{} not found in environment", key)))
    };

    Ok(CmdArgs {
        container_id: required("CNI_CONTAINERID")?,
        netns: var("CNI_NETNS").unwrap_or_default(),
        ifname: required("CNI_IFNAME")?,
        args: var("CNI_ARGS").unwrap_or_default(),
        path: var("CNI_PATH").unwrap_or_default(),
        stdin_data,
    })
}

// Namespace switches apply to the calling thread, so everything runs on it.
fn runtime() -> Result<Runtime, Error> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

/// Execute the add command
pub fn cmd_add(stdin_data: Vec<u8>) -> Result<(), Error> {
    let args = parse_args(stdin_data)?;
    if args.netns.is_empty() {
        return Err(Error::Protocol("CNI_NETNS not found in environment".to_string()));
    }

    let result = runtime()?.block_on(async move {
        let host = RtnetlinkLinks::connect()?;
        BridgePlugin::new(args, &host, &HostNamespaces).add_network().await
    })?;

    result.print()?;
    Ok(())
}

/// Execute the delete command
pub fn cmd_del(stdin_data: Vec<u8>) -> Result<(), Error> {
    let args = parse_args(stdin_data)?;
    runtime()?.block_on(async move {
        let host = RtnetlinkLinks::connect()?;
        BridgePlugin::new(args, &host, &HostNamespaces).del_network().await
    })
}

/// Execute the check command
pub fn cmd_check(stdin_data: Vec<u8>) -> Result<(), Error> {
    let args = parse_args(stdin_data)?;
    runtime()?.block_on(async move {
        let host = RtnetlinkLinks::connect()?;
        BridgePlugin::new(args, &host, &HostNamespaces).check_network().await
    })
}

pub fn cmd_version() -> Result<(), Error> {
    VersionResult {
        cni_version: CNI_VERSION.to_string(),
        supported_versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
    }
    .print()?;
    Ok(())
}

fn dispatch(stdin_data: Vec<u8>) -> Result<(), Error> {
    let cmd = env::var("CNI_COMMAND")
        .map_err(|_| Error::Protocol("CNI_COMMAND not found in environment".to_string()))?;
    debug!("CNI_COMMAND={}", cmd);

    match cmd.as_str() {
        "ADD" => cmd_add(stdin_data),
        "DEL" => cmd_del(stdin_data),
        "CHECK" => cmd_check(stdin_data),
        "VERSION" => cmd_version(),
        _ => Err(Error::Protocol(format!("unknown CNI command: {}", cmd))),
    }
}

/// Main entry point for the CNI plugin.
///
/// A failure comes back as the CNI error object, stamped with the
/// `cniVersion` of the request when stdin carried one.
pub fn run_cni() -> Result<(), ErrorResult> {
    let mut stdin_data = Vec::new();
    if let Err(e) = io::stdin().read_to_end(&mut stdin_data) {
        return Err(Error::from(e).into_response(CNI_VERSION));
    }
    let version = request_version(&stdin_data);
    dispatch(stdin_data).map_err(|err| err.into_response(&version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_cni_environment() {
        let var = lookup(&[
            ("CNI_CONTAINERID", "abc123"),
            ("CNI_NETNS", "/var/run/netns/cni-1"),
            ("CNI_IFNAME", "eth0"),
            ("CNI_ARGS", "K8S_POD_NAME=nginx;K8S_POD_NAMESPACE=default"),
            ("CNI_PATH", "/opt/cni/bin"),
        ]);
        let args = args_from(var, b"{}".to_vec()).unwrap();
        assert_eq!(args.container_id, "abc123");
        assert_eq!(args.netns, "/var/run/netns/cni-1");
        assert_eq!(args.args, "K8S_POD_NAME=nginx;K8S_POD_NAMESPACE=default");
        assert_eq!(args.path, "/opt/cni/bin");
        assert_eq!(args.stdin_data, b"{}");
    }

    #[test]
    fn missing_container_id_is_protocol_error() {
        let var = lookup(&[("CNI_IFNAME", "eth0")]);
        let err = args_from(var, Vec::new()).unwrap_err();
        assert_eq!(err.code(), 4);
        assert!(err.to_string().contains("CNI_CONTAINERID"));
    }

    #[test]
    fn error_version_follows_request() {
        assert_eq!(request_version(br#"{"cniVersion": "1.0.0", "type": "hostbr"}"#), "1.0.0");
        assert_eq!(request_version(br#"{"type": "hostbr"}"#), CNI_VERSION);
        assert_eq!(request_version(b"not json"), CNI_VERSION);
        assert_eq!(request_version(b""), CNI_VERSION);

        let version = request_version(br#"{"cniVersion": "0.4.0"}"#);
        let resp = Error::Config("bad".into()).into_response(&version);
        assert_eq!(resp.cni_version, "0.4.0");
    }

    #[test]
    fn cni_args_may_be_absent() {
        let var = lookup(&[("CNI_CONTAINERID", "abc123"), ("CNI_IFNAME", "eth0")]);
        let args = args_from(var, Vec::new()).unwrap();
        assert!(args.args.is_empty());
        assert!(args.netns.is_empty());
    }
}
