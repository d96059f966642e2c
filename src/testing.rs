//! In-memory stand-ins for the radio and the HTTP endpoint.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt as _};
use tokio::task::JoinHandle;

use crate::config::ScanConfig;
use crate::messages::{DiscoveredServices, ScanResult};
use crate::notify::{Endpoints, NotificationDispatcher, Notifier, NotifyError};
use crate::presence::PresenceTracker;
use crate::scanner::{Scanner, ScannerError, bounded_session};

pub const CONNECT_URL: &str = "http://gw.local/connection";
pub const DISCONNECT_URL: &str = "http://gw.local/disconnection";

pub struct FakeScanner {
    connect_timeout: Duration,
    passes: Mutex<VecDeque<Option<Vec<ScanResult>>>>,
    services: Mutex<HashMap<String, Vec<String>>>,
    slow: Mutex<HashSet<String>>,
    connected: Mutex<HashSet<String>>,
    scans: AtomicUsize,
    discover_calls: AtomicUsize,
    releases: AtomicUsize,
}

impl Default for FakeScanner {
    fn default() -> Self {
        FakeScanner::new(Duration::from_secs(10))
    }
}

impl FakeScanner {
    pub fn new(connect_timeout: Duration) -> Self {
        FakeScanner {
            connect_timeout,
            passes: Mutex::default(),
            services: Mutex::default(),
            slow: Mutex::default(),
            connected: Mutex::default(),
            scans: AtomicUsize::new(0),
            discover_calls: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub fn push_pass(&self, results: Vec<ScanResult>) {
        self.passes.lock().unwrap().push_back(Some(results));
    }

    /// The next scan fails to start.
    pub fn push_failure(&self) {
        self.passes.lock().unwrap().push_back(None);
    }

    pub fn set_services(&self, address: &str, services: &[&str]) {
        self.slow.lock().unwrap().remove(address);
        self.services.lock().unwrap().insert(
            address.to_string(),
            services.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_unreachable(&self, address: &str) {
        self.services.lock().unwrap().remove(address);
    }

    pub fn set_slow(&self, address: &str) {
        self.slow.lock().unwrap().insert(address.to_string());
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self, address: &str) -> bool {
        self.connected.lock().unwrap().contains(address)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scanner for FakeScanner {
    async fn scan(&self) -> Result<BoxStream<'static, ScanResult>, ScannerError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        match self.passes.lock().unwrap().pop_front() {
            Some(Some(results)) => Ok(stream::iter(results).boxed()),
            Some(None) => Err(ScannerError::Scan(btleplug::Error::DeviceNotFound)),
            None => Ok(stream::empty().boxed()),
        }
    }

    async fn discover_services(&self, address: &str) -> Result<DiscoveredServices, ScannerError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);

        bounded_session(
            self.connect_timeout,
            async {
                self.connected.lock().unwrap().insert(address.to_string());
                // lets concurrent checks interleave
                tokio::task::yield_now().await;

                let slow = self.slow.lock().unwrap().contains(address);
                if slow {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                self.services
                    .lock()
                    .unwrap()
                    .get(address)
                    .map(|services| DiscoveredServices::new(services.iter().cloned()))
                    .ok_or_else(|| ScannerError::Connect {
                        address: address.to_string(),
                        source: btleplug::Error::NotConnected,
                    })
            },
            async {
                self.connected.lock().unwrap().remove(address);
                self.releases.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        RecordingNotifier {
            calls: Mutex::default(),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(
        &self,
        endpoint: &str,
        identifier: &str,
    ) -> Result<u16, NotifyError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.to_string(), identifier.to_string()));
        if self.fail {
            return Err(NotifyError::Status {
                endpoint: endpoint.to_string(),
                status: 503,
            });
        }
        Ok(200)
    }
}

pub struct Harness {
    pub scanner: Arc<FakeScanner>,
    pub notifier: Arc<RecordingNotifier>,
    pub tracker: Arc<PresenceTracker>,
    worker: JoinHandle<()>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeScanner::default(), RecordingNotifier::default())
    }

    pub fn failing() -> Self {
        Self::build(FakeScanner::default(), RecordingNotifier::failing())
    }

    pub fn with_connect_timeout(timeout: Duration) -> Self {
        Self::build(FakeScanner::new(timeout), RecordingNotifier::default())
    }

    fn build(scanner: FakeScanner, notifier: RecordingNotifier) -> Self {
        let scanner = Arc::new(scanner);
        let notifier = Arc::new(notifier);
        let (dispatcher, worker) = NotificationDispatcher::spawn(
            notifier.clone(),
            Endpoints {
                connect_url: CONNECT_URL.to_string(),
                disconnect_url: DISCONNECT_URL.to_string(),
            },
        );
        let tracker = Arc::new(PresenceTracker::new(
            scanner.clone(),
            dispatcher,
            &ScanConfig::default(),
        ));
        Harness {
            scanner,
            notifier,
            tracker,
            worker,
        }
    }

    /// Releases the tracker and waits for every queued notification.
    pub async fn finish(self) -> Vec<(String, String)> {
        drop(self.tracker);
        self.worker.await.unwrap();
        self.notifier.calls()
    }
}
