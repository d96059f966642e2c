use std::time::Duration;

use serde_derive::Deserialize;

pub const DEFAULT_RSSI_THRESHOLD: i16 = -90;
/// GATT "Generic Attribute" service, present on every device.
pub const GENERIC_ACCESS_SERVICE: &str = "00001801-0000-1000-8000-00805f9b34fb";

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub notify: NotifyConfig,
    pub scan: Option<ScanConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NotifyConfig {
    pub connect_url: String,
    pub disconnect_url: String,
    pub timeout_seconds: Option<u64>,
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(5))
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Reconcile only the devices each pass observes.
    Continuous,
    /// Also treat previously connected devices missing from a pass as gone.
    #[default]
    FullRescan,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub rssi_threshold: Option<i16>,
    pub interval_seconds: Option<u64>,
    pub scan_duration_seconds: Option<u64>,
    pub connect_timeout_seconds: Option<u64>,
    pub max_concurrent_checks: Option<usize>,
    pub policy: Option<ScanPolicy>,
    pub reserved_service: Option<String>,
}

impl ScanConfig {
    pub fn rssi_threshold(&self) -> i16 {
        self.rssi_threshold.unwrap_or(DEFAULT_RSSI_THRESHOLD)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.unwrap_or(10))
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_seconds.unwrap_or(5))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.unwrap_or(10))
    }

    pub fn max_concurrent_checks(&self) -> usize {
        self.max_concurrent_checks.unwrap_or(1)
    }

    pub fn policy(&self) -> ScanPolicy {
        self.policy.unwrap_or_default()
    }

    pub fn reserved_service(&self) -> String {
        self.reserved_service
            .as_deref()
            .unwrap_or(GENERIC_ACCESS_SERVICE)
            .to_lowercase()
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("scan.interval_seconds must be greater than zero")]
    ZeroInterval,
    #[error("scan.max_concurrent_checks must be at least 1")]
    NoConcurrency,
    #[error("scan.connect_timeout_seconds must be greater than zero")]
    ZeroConnectTimeout,
    #[error("notify.{0} must not be empty")]
    MissingUrl(&'static str),
}

impl AppConfig {
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::de::from_str(contents)
    }

    pub fn scan(&self) -> ScanConfig {
        self.scan.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scan = self.scan();
        if scan.interval().is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if scan.connect_timeout().is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        if scan.max_concurrent_checks() == 0 {
            return Err(ConfigError::NoConcurrency);
        }
        if self.notify.connect_url.trim().is_empty() {
            return Err(ConfigError::MissingUrl("connect_url"));
        }
        if self.notify.disconnect_url.trim().is_empty() {
            return Err(ConfigError::MissingUrl("disconnect_url"));
        }
        Ok(())
    }
}
