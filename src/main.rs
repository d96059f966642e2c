use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

mod btle;
mod config;
mod messages;
mod notify;
mod presence;
mod scanner;
mod scheduler;
#[cfg(test)]
mod testing;

/// Watches nearby BLE devices and reports when they come and go.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override scan.rssi_threshold
    #[arg(long, allow_negative_numbers = true)]
    rssi_threshold: Option<i16>,

    /// Override scan.interval_seconds
    #[arg(long)]
    interval_seconds: Option<u64>,
}

fn load_config(args: &Args) -> anyhow::Result<config::AppConfig> {
    let contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let mut config = config::AppConfig::from_toml(&contents)
        .with_context(|| format!("failed to parse {}", args.config.display()))?;

    let mut scan = config.scan();
    if let Some(threshold) = args.rssi_threshold {
        scan.rssi_threshold = Some(threshold);
    }
    if let Some(interval) = args.interval_seconds {
        scan.interval_seconds = Some(interval);
    }
    config.scan = Some(scan);

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "ble_gateway=info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let scan_config = config.scan();

    info!(
        "RSSI threshold {} dBm, notifying {} / {}",
        scan_config.rssi_threshold(),
        config.notify.connect_url,
        config.notify.disconnect_url
    );

    let notifier = notify::HttpNotifier::new(config.notify.timeout())
        .context("failed to build HTTP client")?;
    let (dispatcher, dispatch_worker) =
        notify::NotificationDispatcher::spawn(Arc::new(notifier), (&config.notify).into());

    info!("Initializing BLE adapter...");
    let scanner: Arc<dyn scanner::Scanner> = Arc::new(
        btle::BtleScanner::first_adapter(
            scan_config.scan_duration(),
            scan_config.connect_timeout(),
        )
        .await
        .context("failed to enable BLE stack")?,
    );

    let tracker = Arc::new(presence::PresenceTracker::new(
        scanner.clone(),
        dispatcher,
        &scan_config,
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down after the current pass");
                let _ = stop_tx.send(true);
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {:?}", err);
                stop_tx.closed().await;
            }
        }
    });

    scheduler::ScanScheduler::new(scanner, tracker.clone(), &scan_config, stop_rx)
        .run_forever()
        .await
        .context("failed to scan")?;

    info!("Final presence: {:?}", tracker.snapshot().await);
    // Last dispatcher handle goes with the tracker; the worker drains and exits
    drop(tracker);
    if let Err(err) = dispatch_worker.await {
        error!("Notification worker failed: {:?}", err);
    }

    Ok(())
}
