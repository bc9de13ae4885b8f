//! nvme-scan - NVMe device topology scanner
//!
//! Runs a full topology scan (or a differential scan against a previous
//! data file) on this host, or on the remote host named in the config.

use anyhow::{Context, Result};
use nvme_scan::config::ScanConfig;
use nvme_scan::gateway::{CommandGateway, LocalGateway};
use nvme_scan::nodes::DeviceNodeEnumerator;
use nvme_scan::logging::{init_tracing, tracing_logger, SharedLogger};
use nvme_scan::options::ScanOptions;
use nvme_scan::{store, Collector};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let options = ScanOptions::parse();
    init_tracing(options.verbose);

    info!("nvme-scan {} starting", env!("CARGO_PKG_VERSION"));
    if let Some(spdk) = &options.spdk_path {
        warn!(
            "SPDK tree {} recorded; data is gathered with kernel tools",
            spdk.display()
        );
    }

    let config = ScanConfig::load_or_default(options.config.as_deref()).await;
    if options.forget_password {
        return forget_password(&config);
    }
    if options.save_config {
        return save_config(&config, &options).await;
    }
    let logger = tracing_logger();

    match &config.remote {
        Some(remote) => run_remote(remote, &config, &options, logger).await,
        None => {
            let gateway = LocalGateway::new(logger.clone());
            run(gateway, &config, &options, logger).await
        }
    }
}

#[cfg(feature = "ssh")]
async fn run_remote(
    remote: &nvme_scan::config::RemoteConfig,
    config: &ScanConfig,
    options: &ScanOptions,
    logger: SharedLogger,
) -> Result<()> {
    use nvme_scan::gateway::{RemoteGateway, RemoteLogin};
    use tracing::Level;

    let login = match RemoteLogin::from_config(remote) {
        Ok(login) => Some(login),
        Err(e) => {
            logger.log(
                Level::ERROR,
                &format!("incomplete SSH login credentials provided! ({})", e),
            );
            None
        }
    };
    let mut gateway = RemoteGateway::connect(&remote.host_label(), login.as_ref(), logger.clone());
    let result = run(&gateway, config, options, logger).await;
    gateway.disconnect();
    result
}

#[cfg(not(feature = "ssh"))]
async fn run_remote(
    remote: &nvme_scan::config::RemoteConfig,
    _config: &ScanConfig,
    _options: &ScanOptions,
    _logger: SharedLogger,
) -> Result<()> {
    anyhow::bail!(
        "remote host {} configured but nvme-scan was built without the `ssh` feature",
        remote.host_label()
    )
}

async fn run<G: CommandGateway>(
    gateway: G,
    config: &ScanConfig,
    options: &ScanOptions,
    logger: SharedLogger,
) -> Result<()> {
    let search = config.scan.node_search();
    let bus = DeviceNodeEnumerator::new(&gateway, &search)
        .bus_inventory(Some(config.scan.bus_filter.as_str()))
        .await;
    match bus {
        Some(bus) => info!("{} NVMe function(s) on the PCIe bus", bus.len()),
        None => warn!("lspci unavailable, bus inventory skipped"),
    }

    let mut collector = Collector::new(gateway, logger)
        .with_search(search)
        .with_scope(options.scope.clone());

    match options.data_file.as_deref().filter(|_| options.diff_scan) {
        Some(data_file) => {
            let previous = store::load_snapshot(data_file)
                .await
                .with_context(|| format!("Failed to load data file {}", data_file.display()))?;
            let changes = collector
                .diff_against(&previous)
                .await
                .context("Differential scan failed")?;
            if changes.is_empty() {
                info!("No topology changes since {}", previous.captured_at);
            }
            emit(&changes, options.output.as_deref()).await?;
        }
        None => {
            let snapshot = collector.scan().await.context("Topology scan failed")?;
            match &options.output {
                Some(path) => store::save_snapshot(path, &snapshot)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => emit(&snapshot, None).await?,
            }
        }
    }
    Ok(())
}

async fn save_config(config: &ScanConfig, options: &ScanOptions) -> Result<()> {
    let path = ScanConfig::resolve_path(options.config.as_deref())
        .context("No configuration path available")?;
    config
        .save_to(&path)
        .await
        .with_context(|| format!("Failed to save config to {}", path.display()))?;
    info!("Configuration saved to {}", path.display());
    Ok(())
}

fn forget_password(config: &ScanConfig) -> Result<()> {
    if config.forget_password().context("Failed to delete stored password")? {
        info!("Stored password removed");
    } else {
        warn!("No remote host configured, nothing to forget");
    }
    Ok(())
}

async fn emit<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    match output {
        Some(path) => tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}
