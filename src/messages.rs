use std::collections::BTreeSet;

/// Opaque key for something whose presence is tracked: a device address or
/// one of the service identifiers discovered on it.
pub type DeviceIdentifier = String;

/// One device as seen during a single scan pass. Dropped once the pass that
/// produced it has been reconciled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanResult {
    pub address: String,
    pub local_name: Option<String>,
    pub rssi: i16,
}

impl ScanResult {
    /// Observations without a human readable name are treated as noise.
    pub fn has_name(&self) -> bool {
        self.local_name
            .as_deref()
            .is_some_and(|name| !name.trim().is_empty())
    }
}

/// What a successful connect + discover found on a device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveredServices {
    pub identifiers: BTreeSet<String>,
}

impl DiscoveredServices {
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DiscoveredServices {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Presence {
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
    pub identifier: DeviceIdentifier,
    pub kind: Presence,
}

#[cfg(test)]
impl NotificationEvent {
    pub fn connected(identifier: impl Into<DeviceIdentifier>) -> Self {
        NotificationEvent {
            identifier: identifier.into(),
            kind: Presence::Connected,
        }
    }

    pub fn disconnected(identifier: impl Into<DeviceIdentifier>) -> Self {
        NotificationEvent {
            identifier: identifier.into(),
            kind: Presence::Disconnected,
        }
    }
}
