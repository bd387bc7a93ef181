//! Acquisition configuration management

use crate::acquisition::TerminationPolicy;
use anyhow::{Context, Result, anyhow};
use common::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Vendor ID of the sampled peripheral
pub const DEFAULT_VENDOR_ID: u16 = 0x0403;
/// Product ID of the sampled peripheral
pub const DEFAULT_PRODUCT_ID: u16 = 0xf241;
/// Bytes requested per transfer
pub const DEFAULT_READ_SIZE: usize = 128;
/// Transfers performed per run
pub const DEFAULT_TOTAL_READINGS: u32 = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquireConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which device to sample and how to take it over
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Vendor ID, written as a `0x` prefixed hex string
    #[serde(with = "hex_id", default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    /// Product ID, written as a `0x` prefixed hex string
    #[serde(with = "hex_id", default = "DeviceSettings::default_product_id")]
    pub product_id: u16,
    /// Detach an active kernel driver before claiming, reattach after release
    #[serde(default = "DeviceSettings::default_detach_kernel_driver")]
    pub detach_kernel_driver: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            detach_kernel_driver: Self::default_detach_kernel_driver(),
        }
    }
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        DEFAULT_VENDOR_ID
    }

    fn default_product_id() -> u16 {
        DEFAULT_PRODUCT_ID
    }

    fn default_detach_kernel_driver() -> bool {
        true
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.product_id)
    }
}

/// Read loop tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Bytes requested per transfer
    #[serde(default = "AcquisitionSettings::default_read_size")]
    pub read_size: usize,
    /// Number of readings before the device is released
    #[serde(default = "AcquisitionSettings::default_total_readings")]
    pub total_readings: u32,
    /// Whether failed transfers count toward `total_readings`
    #[serde(default)]
    pub termination: TerminationPolicy,
    /// Per-transfer timeout in milliseconds (0 = wait forever)
    #[serde(default = "AcquisitionSettings::default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            read_size: Self::default_read_size(),
            total_readings: Self::default_total_readings(),
            termination: TerminationPolicy::default(),
            transfer_timeout_ms: Self::default_transfer_timeout_ms(),
        }
    }
}

impl AcquisitionSettings {
    fn default_read_size() -> usize {
        DEFAULT_READ_SIZE
    }

    fn default_total_readings() -> u32 {
        DEFAULT_TOTAL_READINGS
    }

    fn default_transfer_timeout_ms() -> u64 {
        1000
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_log_level")]
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl LoggingSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Serde adapter for `0x1234` style USB identifiers
mod hex_id {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &u16, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#06x}", id))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u16, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_hex_id(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse a `0x` prefixed hex ID of 1-4 digits
pub fn parse_hex_id(id: &str) -> std::result::Result<u16, String> {
    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| format!("Invalid ID '{}', must start with '0x' (e.g., '0x1234')", id))?;

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(format!("Invalid ID '{}', hex part must be 1-4 digits", id));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| format!("Invalid ID '{}', not a valid hex number", id))
}

/// Expand `~` in a user supplied path
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

impl AcquireConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the first existing standard location is used and a
    /// missing file is an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_existing(&Self::candidate_paths())
                .ok_or_else(|| anyhow!("No configuration file found"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AcquireConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load the first existing standard location, or defaults if there is none
    ///
    /// A file that exists but cannot be read, parsed or validated is an error.
    pub fn load_or_default() -> Result<Self> {
        Self::load_first_of(&Self::candidate_paths())
    }

    /// Load the first of `candidates` that exists, or defaults if none does
    pub fn load_first_of(candidates: &[PathBuf]) -> Result<Self> {
        match Self::find_existing(candidates) {
            Some(path) => Self::load(Some(path)),
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Standard configuration locations, in lookup order
    pub fn candidate_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/usb-acquire/acquire.toml"),
        ]
    }

    fn find_existing(candidates: &[PathBuf]) -> Option<PathBuf> {
        candidates.iter().find(|p| p.exists()).cloned()
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-acquire").join("acquire.toml")
        } else {
            PathBuf::from(".config/usb-acquire/acquire.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.acquisition.read_size == 0 {
            return Err(anyhow!("read_size must be greater than 0"));
        }

        if self.acquisition.total_readings == 0 {
            return Err(anyhow!("total_readings must be greater than 0"));
        }

        Ok(())
    }
}
