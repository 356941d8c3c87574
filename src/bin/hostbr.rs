use std::io;

use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hostbr::commands::run_cni;

fn main() {
    // stdout carries the CNI result
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    if let Err(response) = run_cni() {
        error!("CNI plugin error: {}", response.details);

        if let Err(e) = response.print() {
            error!("failed to print error result: {}", e);
        }
        std::process::exit(1);
    }
}
