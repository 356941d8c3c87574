use std::env;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::Error;
use crate::types::{CmdArgs, ErrorResult, Result as CniResult};

/// Locate `plugin` in the colon-separated `cni_path`.
pub fn find_plugin(plugin: &str, cni_path: &str) -> Result<PathBuf, Error> {
    env::split_paths(cni_path)
        .map(|dir| dir.join(plugin))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            Error::Delegation(format!(
                "failed to find plugin {:?} in path {:?}",
                plugin, cni_path
            ))
        })
}

/// Run the nested plugin's ADD with the caller's CNI environment and `conf`
/// on stdin, returning the result it prints.
pub async fn delegate_add(plugin: &str, conf: &[u8], args: &CmdArgs) -> Result<CniResult, Error> {
    let path = find_plugin(plugin, &args.path)?;
    info!("delegating address assignment to {}", path.display());

    let mut child = Command::new(&path)
        .env("CNI_COMMAND", "ADD")
        .env("CNI_CONTAINERID", &args.container_id)
        .env("CNI_NETNS", &args.netns)
        .env("CNI_IFNAME", &args.ifname)
        .env("CNI_ARGS", &args.args)
        .env("CNI_PATH", &args.path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::Delegation(format!("failed to run {}: {}", path.display(), e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(conf).await?;
    }

    let output = child.wait_with_output().await?;
    debug!("{} exited with {}", plugin, output.status);
    parse_output(plugin, output.status.success(), &output.stdout)
}

fn parse_output(plugin: &str, success: bool, stdout: &[u8]) -> Result<CniResult, Error> {
    let value: serde_json::Value = match serde_json::from_slice(stdout) {
        Ok(value) => value,
        Err(e) if success => {
            return Err(Error::Delegation(format!("{} printed an unreadable result: {}", plugin, e)))
        }
        Err(_) => {
            return Err(Error::Delegation(format!(
                "{} failed: {}",
                plugin,
                String::from_utf8_lossy(stdout).trim()
            )))
        }
    };

    if value.get("code").is_some() {
        let err: ErrorResult = serde_json::from_value(value)
            .map_err(|e| {
                Error::Delegation(format!("{} printed a malformed error: {}", plugin, e))
            })?;
        return Err(Error::Delegation(format!(
            "{} failed with code {}: {} {}",
            plugin,
            err.code,
            err.msg,
            err.details
        )));
    }
    if !success {
        return Err(Error::Delegation(format!("{} exited unsuccessfully", plugin)));
    }

    serde_json::from_value(value)
        .map_err(|e| Error::Delegation(format!("{} printed an unreadable result: {}", plugin, e)))
}
