//! Configuration for the telemetry layer

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TelemetryError, TelemetryResult};

/// Environment variable that turns on CI mode
pub const ENV_CI_MODE: &str = "STOREFRONT_CI_MODE";

/// Environment variable overriding the API base URL
pub const ENV_API_URL: &str = "STOREFRONT_API_URL";

/// Main telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Application identifiers per platform
    #[serde(default)]
    pub app_ids: AppIds,

    /// Platform this process reports as
    #[serde(default)]
    pub platform: Platform,

    /// Application version, seeded as a session property
    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Deployment environment, seeded as a session property
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Prefix for endpoints passed to the network wrapper
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Enables probability-gated crash injection
    #[serde(default)]
    pub ci_mode: bool,

    /// Crash simulation tuning
    #[serde(default)]
    pub crash: CrashConfig,

    /// Extra session properties seeded at initialization
    #[serde(default)]
    pub default_properties: BTreeMap<String, String>,
}

fn default_app_version() -> String { env!("CARGO_PKG_VERSION").to_string() }
fn default_environment() -> String { "development".to_string() }
fn default_api_base_url() -> String { "https://api.storefront.example".to_string() }

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            app_ids: AppIds::default(),
            platform: Platform::default(),
            app_version: default_app_version(),
            environment: default_environment(),
            api_base_url: default_api_base_url(),
            ci_mode: false,
            crash: CrashConfig::default(),
            default_properties: BTreeMap::new(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> TelemetryResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `STOREFRONT_CI_MODE` and `STOREFRONT_API_URL`
    pub fn apply_env(mut self) -> Self {
        if let Ok(flag) = std::env::var(ENV_CI_MODE) {
            self.ci_mode = parse_flag(&flag);
        }
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.is_empty() {
                self.api_base_url = url;
            }
        }
        self
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> TelemetryResult<()> {
        self.crash.validate()
    }

    /// Application id for the configured platform
    pub fn app_id(&self) -> &str {
        match self.platform {
            Platform::Ios => &self.app_ids.ios,
            Platform::Android => &self.app_ids.android,
        }
    }

    pub fn with_ci_mode(mut self, enabled: bool) -> Self {
        self.ci_mode = enabled;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = url.to_string();
        self
    }

    pub fn with_crash(mut self, crash: CrashConfig) -> Self {
        self.crash = crash;
        self
    }

    pub fn with_default_property(mut self, key: &str, value: &str) -> Self {
        self.default_properties.insert(key.to_string(), value.to_string());
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Application identifiers, one per platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppIds {
    #[serde(default = "default_ios_app_id")]
    pub ios: String,

    #[serde(default = "default_android_app_id")]
    pub android: String,
}

fn default_ios_app_id() -> String { "sfios".to_string() }
fn default_android_app_id() -> String { "sfand".to_string() }

impl Default for AppIds {
    fn default() -> Self {
        Self {
            ios: default_ios_app_id(),
            android: default_android_app_id(),
        }
    }
}

/// Reporting platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

/// Crash simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashConfig {
    /// Rolls strictly above this value (out of 0..100) arm the crash
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Lower bound of the crash delay, inclusive
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the crash delay, exclusive
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Pause between the final telemetry and the fault
    #[serde(default = "default_flush_grace")]
    pub flush_grace_ms: u64,
}

fn default_threshold() -> u32 { 79 }
fn default_min_delay() -> u64 { 20_000 }
fn default_max_delay() -> u64 { 35_000 }
fn default_flush_grace() -> u64 { 500 }

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            flush_grace_ms: default_flush_grace(),
        }
    }
}

impl CrashConfig {
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.threshold >= 100 {
            return Err(TelemetryError::InvalidConfig(format!(
                "crash threshold must be below 100, got {}",
                self.threshold
            )));
        }
        if self.min_delay_ms >= self.max_delay_ms {
            return Err(TelemetryError::InvalidConfig(format!(
                "crash delay range is empty: [{}, {})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert!(!config.ci_mode);
        assert_eq!(config.crash.threshold, 79);
        assert_eq!(config.crash.min_delay_ms, 20_000);
        assert_eq!(config.crash.max_delay_ms, 35_000);
        assert_eq!(config.crash.flush_grace_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_id_follows_platform() {
        let config = TelemetryConfig::default();
        assert_eq!(config.app_id(), "sfios");

        let config = config.with_platform(Platform::Android);
        assert_eq!(config.app_id(), "sfand");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{"ci_mode": true, "platform": "android"}"#).unwrap();

        assert!(config.ci_mode);
        assert_eq!(config.platform, Platform::Android);
        assert_eq!(config.crash.threshold, 79);
        assert_eq!(config.environment, "development");
    }

    #[test]
    fn test_invalid_crash_config() {
        let crash = CrashConfig {
            min_delay_ms: 5000,
            max_delay_ms: 5000,
            ..CrashConfig::default()
        };
        assert!(crash.validate().is_err());

        let crash = CrashConfig {
            threshold: 100,
            ..CrashConfig::default()
        };
        assert!(crash.validate().is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
