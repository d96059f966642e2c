use std::collections::HashSet;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use log::{debug, error, info};
use tokio::sync::watch;

use crate::config::{ScanConfig, ScanPolicy};
use crate::presence::PresenceTracker;
use crate::scanner::{Scanner, ScannerError};

pub struct ScanScheduler {
    scanner: Arc<dyn Scanner>,
    tracker: Arc<PresenceTracker>,
    interval: Duration,
    policy: ScanPolicy,
    max_concurrent_checks: usize,
    stop: watch::Receiver<bool>,
}

impl ScanScheduler {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        tracker: Arc<PresenceTracker>,
        config: &ScanConfig,
        stop: watch::Receiver<bool>,
    ) -> Self {
        ScanScheduler {
            scanner,
            tracker,
            interval: config.interval(),
            policy: config.policy(),
            max_concurrent_checks: config.max_concurrent_checks().max(1),
            stop,
        }
    }

    /// Runs a pass, waits `interval`, repeats. Only returns once the stop
    /// flag is raised (or its sender goes away) or a scan cannot be started.
    pub async fn run_forever(mut self) -> Result<(), ScannerError> {
        info!("Scanning every {:?} ({:?})", self.interval, self.policy);

        loop {
            if *self.stop.borrow() {
                break;
            }

            if let Err(err) = self.run_pass().await {
                error!("Scan pass failed: {}", err);
                return Err(err);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        debug!("Stop signal dropped");
                        break;
                    }
                }
            }
        }

        info!("Scan loop stopped");
        Ok(())
    }

    pub async fn run_pass(&self) -> Result<(), ScannerError> {
        debug!("Starting scan pass");
        let results = self.scanner.scan().await?;

        let mut seen = HashSet::new();
        let tracker = self.tracker.as_ref();

        results
            .filter(|result| {
                let named = result.has_name();
                if !named {
                    debug!("Ignoring unnamed device {}", result.address);
                }
                future::ready(named)
            })
            .inspect(|result| {
                seen.insert(result.address.clone());
            })
            .for_each_concurrent(self.max_concurrent_checks, |result| async move {
                tracker.evaluate(&result).await;
            })
            .await;

        let vanished = match self.policy {
            ScanPolicy::FullRescan => self.tracker.sweep(&seen).await,
            ScanPolicy::Continuous => 0,
        };

        info!(
            "Scan pass done: {} named devices, {} vanished",
            seen.len(),
            vanished
        );
        Ok(())
    }
}
