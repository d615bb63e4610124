//! Configuration file parsing
//!
//! Parses TOML configuration files for the OTAU server.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Page spacing override bounds, milliseconds.
pub const MIN_PAGE_SPACING: u16 = 20;
pub const MAX_PAGE_SPACING: u16 = 3000;

/// Default seconds a client waits before rebooting into the new image.
pub const DEFAULT_UPGRADE_RESTART_TIME: u32 = 5;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// OTAU engine settings
    pub otau: OtauConfig,
}

/// OTAU engine settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OtauConfig {
    /// Directory holding upgrade images
    pub image_path: PathBuf,

    /// Override for the client-requested page response spacing in
    /// milliseconds. Unset, the client-requested spacing rules.
    #[serde(default)]
    pub fast_page_spacing: Option<u16>,

    /// Seconds a client shall wait before restarting into the new image;
    /// `0xFFFFFFFF` means wait indefinitely.
    #[serde(default = "default_upgrade_restart_time")]
    pub upgrade_restart_time: u32,

    /// Send the vendor watchdog-reset frame after an upgrade end response
    /// for image types flagged in the quirk table.
    #[serde(default)]
    pub watchdog_reset: bool,

    /// APS confirm statuses treated as a missing acknowledgement.
    #[serde(default = "default_no_ack_statuses")]
    pub no_ack_statuses: Vec<u8>,
}

fn default_upgrade_restart_time() -> u32 {
    DEFAULT_UPGRADE_RESTART_TIME
}

fn default_no_ack_statuses() -> Vec<u8> {
    vec![
        crate::transport::APS_STATUS_NO_ACK,
        crate::transport::APS_STATUS_MAC_NO_ACK,
    ]
}

impl Default for OtauConfig {
    fn default() -> Self {
        Self {
            image_path: PathBuf::from("otau"),
            fast_page_spacing: None,
            upgrade_restart_time: default_upgrade_restart_time(),
            watchdog_reset: false,
            no_ack_statuses: default_no_ack_statuses(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.otau.validate()?;
        config.otau.normalize();
        Ok(config)
    }
}

impl OtauConfig {
    /// Reject configurations the engine cannot run with.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.no_ack_statuses.is_empty() {
            return Err(ConfigError::Invalid(
                "no-ack-statuses must name at least one APS status".to_string(),
            ));
        }
        if self
            .no_ack_statuses
            .contains(&crate::transport::APS_STATUS_SUCCESS)
        {
            return Err(ConfigError::Invalid(
                "no-ack-statuses must not contain the success status 0x00".to_string(),
            ));
        }
        Ok(())
    }

    /// Clamp out-of-range values into their working bounds.
    fn normalize(&mut self) {
        if let Some(spacing) = self.fast_page_spacing {
            let clamped = spacing.clamp(MIN_PAGE_SPACING, MAX_PAGE_SPACING - 1);
            if clamped != spacing {
                log::warn!(
                    "fast-page-spacing {} ms out of range, clamped to {} ms",
                    spacing,
                    clamped
                );
                self.fast_page_spacing = Some(clamped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config_str = r#"
[otau]
image-path = "/var/lib/otau"
"#;

        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.otau.image_path, PathBuf::from("/var/lib/otau"));
        assert_eq!(config.otau.fast_page_spacing, None);
        assert_eq!(config.otau.upgrade_restart_time, 5);
        assert!(!config.otau.watchdog_reset);
        assert_eq!(config.otau.no_ack_statuses, vec![0xA7, 0xE5]);
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[otau]
image-path = "/data/otau"
fast-page-spacing = 25
upgrade-restart-time = 4294967295
watchdog-reset = true
no-ack-statuses = [0xA7]
"#;

        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.otau.fast_page_spacing, Some(25));
        assert_eq!(config.otau.upgrade_restart_time, 0xFFFF_FFFF);
        assert!(config.otau.watchdog_reset);
        assert_eq!(config.otau.no_ack_statuses, vec![0xA7]);
    }

    #[test]
    fn test_page_spacing_is_clamped() {
        let config_str = r#"
[otau]
image-path = "otau"
fast-page-spacing = 5
"#;
        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.otau.fast_page_spacing, Some(MIN_PAGE_SPACING));

        let config_str = r#"
[otau]
image-path = "otau"
fast-page-spacing = 60000
"#;
        let config = Config::parse(config_str).unwrap();
        assert_eq!(config.otau.fast_page_spacing, Some(MAX_PAGE_SPACING - 1));
    }

    #[test]
    fn test_empty_no_ack_statuses_rejected() {
        let config_str = r#"
[otau]
image-path = "otau"
no-ack-statuses = []
"#;
        assert!(matches!(
            Config::parse(config_str),
            Err(ConfigError::Invalid(_))
        ));
    }
}
