use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::{self, BoxStream, Stream, StreamExt as _};
use log::{debug, info};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::messages::{DiscoveredServices, ScanResult};
use crate::scanner::{Scanner, ScannerError, bounded_session};

/// CoreBluetooth reports this for every peripheral.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

pub struct BtleScanner {
    adapter: Adapter,
    scan_duration: Duration,
    connect_timeout: Duration,
    // device key -> platform id, refreshed every pass
    known: Mutex<HashMap<String, PeripheralId>>,
}

impl BtleScanner {
    /// Uses the first adapter the platform reports.
    pub async fn first_adapter(
        scan_duration: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ScannerError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ScannerError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(adapter_info) => info!("Using bluetooth adapter {}", adapter_info),
            Err(err) => debug!("Could not read adapter info: {:?}", err),
        }

        Ok(BtleScanner {
            adapter,
            scan_duration,
            connect_timeout,
            known: Mutex::new(HashMap::new()),
        })
    }

    /// BlueZ drops RSSI once discovery stops, so this has to run mid-scan.
    async fn observe(&self, id: PeripheralId) -> Option<ScanResult> {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                debug!("Peripheral {:?} went away: {:?}", id, err);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return None,
            Err(err) => {
                debug!("Could not read properties of {:?}: {:?}", id, err);
                return None;
            }
        };

        Some(ScanResult {
            address: device_key(&peripheral.address().to_string(), &id),
            local_name: properties.local_name,
            rssi: properties.rssi?,
        })
    }
}

/// The MAC address where the platform exposes one, the platform id otherwise.
fn device_key(address: &str, id: &impl Debug) -> String {
    if address == HIDDEN_ADDRESS {
        format!("{:?}", id)
    } else {
        address.to_string()
    }
}

/// Keeps the latest reading per device from `ids` until `deadline` passes or
/// the stream ends.
async fn collect_readings<K, S, F, Fut>(
    ids: S,
    deadline: Instant,
    mut observe: F,
) -> HashMap<K, ScanResult>
where
    K: Hash + Eq + Clone,
    S: Stream<Item = K>,
    F: FnMut(K) -> Fut,
    Fut: Future<Output = Option<ScanResult>>,
{
    let mut ids = std::pin::pin!(ids);
    let mut seen = HashMap::new();
    loop {
        let id = match tokio::time::timeout_at(deadline, ids.next()).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("Adapter event stream closed");
                break;
            }
            Err(_) => break,
        };

        if let Some(result) = observe(id.clone()).await {
            seen.insert(id, result);
        }
    }
    seen
}

#[async_trait]
impl Scanner for BtleScanner {
    async fn scan(&self) -> Result<BoxStream<'static, ScanResult>, ScannerError> {
        let events = self.adapter.events().await.map_err(ScannerError::Scan)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ScannerError::Scan)?;

        // RSSI is only readable while discovery runs
        let ids = events.filter_map(|event| async move {
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
                _ => None,
            }
        });
        let seen = collect_readings(ids, Instant::now() + self.scan_duration, |id| {
            self.observe(id)
        })
        .await;

        self.adapter.stop_scan().await.map_err(ScannerError::Scan)?;
        debug!("Scan pass saw {} devices with RSSI", seen.len());

        let mut known = self.known.lock().await;
        let results = seen
            .into_iter()
            .map(|(id, result)| {
                known.insert(result.address.clone(), id);
                result
            })
            .collect::<Vec<_>>();

        Ok(stream::iter(results).boxed())
    }

    async fn discover_services(&self, address: &str) -> Result<DiscoveredServices, ScannerError> {
        let id = self
            .known
            .lock()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| ScannerError::UnknownDevice(address.to_string()))?;
        let peripheral = self.adapter.peripheral(&id).await?;

        bounded_session(
            self.connect_timeout,
            async {
                peripheral
                    .connect()
                    .await
                    .map_err(|source| ScannerError::Connect {
                        address: address.to_string(),
                        source,
                    })?;
                peripheral
                    .discover_services()
                    .await
                    .map_err(|source| ScannerError::Discover {
                        address: address.to_string(),
                        source,
                    })?;
                Ok::<_, ScannerError>(DiscoveredServices::new(
                    peripheral.services().iter().map(|s| s.uuid.to_string()),
                ))
            },
            async {
                if let Err(err) = peripheral.disconnect().await {
                    debug!("Failed to disconnect from {}: {:?}", address, err);
                }
            },
        )
        .await
    }
}
