use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::config::ScanConfig;
use crate::messages::{DeviceIdentifier, NotificationEvent, Presence, ScanResult};
use crate::notify::NotificationDispatcher;
use crate::scanner::{Scanner, ScannerError};

/// Connected flags per identifier plus the services last discovered on each
/// device address. Pure bookkeeping: every method returns the events its
/// transitions produced and leaves delivering them to the caller.
#[derive(Debug, Default)]
pub struct PresenceState {
    connected: HashMap<DeviceIdentifier, bool>,
    services: HashMap<String, BTreeSet<DeviceIdentifier>>,
}

impl PresenceState {
    pub fn is_connected(&self, identifier: &str) -> bool {
        self.connected.get(identifier).copied().unwrap_or(false)
    }

    /// Flips the flag if it differs from `kind` and reports the change.
    /// Unknown identifiers count as disconnected.
    pub fn apply(&mut self, identifier: &str, kind: Presence) -> Option<NotificationEvent> {
        let target = kind == Presence::Connected;
        if self.is_connected(identifier) == target {
            return None;
        }
        self.connected.insert(identifier.to_string(), target);
        Some(NotificationEvent {
            identifier: identifier.to_string(),
            kind,
        })
    }

    /// A device was reachable and exposes `services`. Services it no longer
    /// exposes are disconnected first.
    pub fn present(
        &mut self,
        address: &str,
        services: BTreeSet<DeviceIdentifier>,
    ) -> Vec<NotificationEvent> {
        let previous = self
            .services
            .insert(address.to_string(), services.clone())
            .unwrap_or_default();

        let mut events = previous
            .difference(&services)
            .filter_map(|id| self.apply(id, Presence::Disconnected))
            .collect::<Vec<_>>();
        events.extend(services.iter().filter_map(|id| self.apply(id, Presence::Connected)));
        events
    }

    /// A device is weak, unreachable or gone. Everything known to live on it
    /// is disconnected; without known services the address itself is.
    pub fn absent(&mut self, address: &str) -> Vec<NotificationEvent> {
        let identifiers = match self.services.get(address) {
            Some(services) if !services.is_empty() => services.iter().cloned().collect(),
            _ => vec![address.to_string()],
        };

        identifiers
            .iter()
            .filter_map(|id| self.apply(id, Presence::Disconnected))
            .collect()
    }

    /// Addresses with at least one connected service that are not in `seen`.
    pub fn missing_from(&self, seen: &HashSet<String>) -> Vec<String> {
        let mut missing = self
            .services
            .iter()
            .filter(|(address, _)| !seen.contains(*address))
            .filter(|(_, services)| services.iter().any(|id| self.is_connected(id)))
            .map(|(address, _)| address.clone())
            .collect::<Vec<_>>();
        missing.sort();
        missing
    }

    pub fn flags(&self) -> HashMap<DeviceIdentifier, bool> {
        self.connected.clone()
    }
}

/// Owns the presence state and turns scan results into transitions.
///
/// The check/flip/notify sequence for each evaluation runs under one lock,
/// and the resulting events are queued on the dispatcher before it is
/// released.
pub struct PresenceTracker {
    state: Mutex<PresenceState>,
    scanner: Arc<dyn Scanner>,
    dispatcher: NotificationDispatcher,
    rssi_threshold: i16,
    reserved_service: String,
}

impl PresenceTracker {
    pub fn new(
        scanner: Arc<dyn Scanner>,
        dispatcher: NotificationDispatcher,
        config: &ScanConfig,
    ) -> Self {
        PresenceTracker {
            state: Mutex::new(PresenceState::default()),
            scanner,
            dispatcher,
            rssi_threshold: config.rssi_threshold(),
            reserved_service: config.reserved_service(),
        }
    }

    pub async fn evaluate(&self, result: &ScanResult) {
        if result.rssi <= self.rssi_threshold {
            debug!(
                "{} below threshold ({} <= {})",
                result.address, result.rssi, self.rssi_threshold
            );
            self.mark_absent(&result.address).await;
            return;
        }

        match self.discover(&result.address).await {
            Ok(services) => {
                debug!(
                    "{} (RSSI {}) exposes {:?}",
                    result.address, result.rssi, services
                );
                self.commit(|state| state.present(&result.address, services)).await;
            }
            Err(err) => {
                debug!("{} treated as absent: {}", result.address, err);
                self.mark_absent(&result.address).await;
            }
        }
    }

    /// Disconnects every tracked device that has connected services but was
    /// not part of the last pass. Returns how many devices were affected.
    pub async fn sweep(&self, seen: &HashSet<String>) -> usize {
        let mut state = self.state.lock().await;
        let missing = state.missing_from(seen);
        for address in &missing {
            info!("{} vanished since the last pass", address);
            for event in state.absent(address) {
                self.emit(event);
            }
        }
        missing.len()
    }

    pub async fn snapshot(&self) -> HashMap<DeviceIdentifier, bool> {
        self.state.lock().await.flags()
    }

    async fn discover(&self, address: &str) -> Result<BTreeSet<DeviceIdentifier>, ScannerError> {
        let discovered = self.scanner.discover_services(address).await?;

        Ok(discovered
            .identifiers
            .into_iter()
            .map(|id| id.to_lowercase())
            .filter(|id| *id != self.reserved_service)
            .collect())
    }

    async fn mark_absent(&self, address: &str) {
        self.commit(|state| state.absent(address)).await;
    }

    async fn commit<F>(&self, transition: F)
    where
        F: FnOnce(&mut PresenceState) -> Vec<NotificationEvent>,
    {
        let mut state = self.state.lock().await;
        for event in transition(&mut state) {
            self.emit(event);
        }
    }

    fn emit(&self, event: NotificationEvent) {
        info!("Device {} {:?}", event.identifier, event.kind);
        self.dispatcher.dispatch(event);
    }
}
