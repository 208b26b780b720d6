//! Service entry point: serves the storage protocol on stdin/stdout,
//! logging to stderr so the transport stream stays clean.

use std::fs;
use std::io;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ta_service::config::{self, FailurePolicy};
use ta_service::session::SessionStore;
use ta_service::transport::run_loop;

fn main() -> anyhow::Result<()> {
    let cfg = config::load_from_env().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone())),
        )
        .with_writer(io::stderr)
        .init();

    fs::create_dir_all(&cfg.data_root)
        .with_context(|| format!("creating data root {}", cfg.data_root.display()))?;
    let store = SessionStore::new(&cfg.data_root);

    info!(data_root = %cfg.data_root.display(), "service starting");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = run_loop(&mut stdin.lock(), &mut stdout.lock(), &store);

    match result {
        Ok(()) => {
            info!("service stopped");
            Ok(())
        }
        Err(fault) => {
            error!(%fault, "fatal fault in service loop");
            match cfg.failure_policy {
                FailurePolicy::Abort => std::process::abort(),
                FailurePolicy::Shutdown => Err(fault.into()),
            }
        }
    }
}
