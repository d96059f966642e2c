use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::NotifyConfig;
use crate::messages::{NotificationEvent, Presence};

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },
}

/// Outbound side of the gateway. The returned status is only ever logged.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(
        &self,
        endpoint: &str,
        identifier: &str,
    ) -> Result<u16, NotifyError>;
}

/// `<endpoint>?uuid=<identifier>`
pub fn notification_url(endpoint: &str, identifier: &str) -> Result<Url, NotifyError> {
    Url::parse_with_params(endpoint, &[("uuid", identifier)]).map_err(|err| {
        NotifyError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        }
    })
}

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpNotifier { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_notification(
        &self,
        endpoint: &str,
        identifier: &str,
    ) -> Result<u16, NotifyError> {
        let url = notification_url(endpoint, identifier)?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(status.as_u16())
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub connect_url: String,
    pub disconnect_url: String,
}

impl Endpoints {
    pub fn for_kind(&self, kind: Presence) -> &str {
        match kind {
            Presence::Connected => &self.connect_url,
            Presence::Disconnected => &self.disconnect_url,
        }
    }
}

impl From<&NotifyConfig> for Endpoints {
    fn from(config: &NotifyConfig) -> Self {
        Endpoints {
            connect_url: config.connect_url.clone(),
            disconnect_url: config.disconnect_url.clone(),
        }
    }
}

/// Queues notification events for a single delivery task.
///
/// Enqueueing never blocks, so it is safe to call while holding the presence
/// lock, and one worker sending in queue order keeps notifications for the
/// same identifier in transition order. Each event gets exactly one attempt.
/// The worker exits once every dispatcher handle is dropped and the queue is
/// drained.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl NotificationDispatcher {
    pub fn spawn(notifier: Arc<dyn Notifier>, endpoints: Endpoints) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotificationEvent>();

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(notifier.as_ref(), &endpoints, &event).await;
            }
            debug!("Notification queue closed");
        });

        (NotificationDispatcher { tx }, worker)
    }

    pub fn dispatch(&self, event: NotificationEvent) {
        if let Err(err) = self.tx.send(event) {
            warn!("Dropping notification {:?}: dispatcher stopped", err.0);
        }
    }
}

async fn deliver(notifier: &dyn Notifier, endpoints: &Endpoints, event: &NotificationEvent) {
    let endpoint = endpoints.for_kind(event.kind);
    match notifier.send_notification(endpoint, &event.identifier).await {
        Ok(status) => info!(
            "Sent {:?} for {} to {} (status {})",
            event.kind, event.identifier, endpoint, status
        ),
        Err(err) => warn!(
            "Failed to send {:?} for {}: {}",
            event.kind, event.identifier, err
        ),
    }
}
