use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::messages::{DiscoveredServices, ScanResult};

#[derive(thiserror::Error, Debug)]
pub enum ScannerError {
    #[error("no bluetooth adapter available")]
    NoAdapter,
    #[error("scan pass failed: {0}")]
    Scan(#[source] btleplug::Error),
    #[error("device {0} is not known to the adapter")]
    UnknownDevice(String),
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: btleplug::Error,
    },
    #[error("service discovery on {address} failed: {source}")]
    Discover {
        address: String,
        #[source]
        source: btleplug::Error,
    },
    #[error("connect and discover timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Btle(#[from] btleplug::Error),
}

/// The radio side of the gateway.
///
/// `scan` runs one bounded pass and hands back what it saw as a stream; a
/// failure there is fatal to the gateway. `discover_services` connects to a
/// single device, lists its services and releases the connection again; any
/// failure there only means the device is treated as absent. Implementations
/// bound connect + discover themselves, see [`bounded_session`].
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self) -> Result<BoxStream<'static, ScanResult>, ScannerError>;

    async fn discover_services(&self, address: &str) -> Result<DiscoveredServices, ScannerError>;
}

/// Runs `session` for at most `limit`, then always awaits `release`, whether
/// the session finished, failed or ran out of time.
pub async fn bounded_session<T, S, R>(
    limit: Duration,
    session: S,
    release: R,
) -> Result<T, ScannerError>
where
    S: Future<Output = Result<T, ScannerError>>,
    R: Future<Output = ()>,
{
    let outcome = match tokio::time::timeout(limit, session).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ScannerError::Timeout(limit)),
    };
    release.await;
    outcome
}
