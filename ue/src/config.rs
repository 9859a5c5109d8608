//! TOML Configuration for the UE binary

use anyhow::{Context, Result};
use common::types::Mcs;
use interfaces::RadioConfig;
use layers::mac::{MacConfig, PROTOCOL_VERSION};
use layers::phy::PhyConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UeConfig {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub phy: PhySection,
    #[serde(default)]
    pub mac: MacSection,
}

/// `[phy]` section: link parameters plus slot-decode offload
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhySection {
    #[serde(flatten)]
    pub link: PhyConfig,
    /// Decode downlink data slots on a dedicated thread
    #[serde(default = "default_slot_worker")]
    pub slot_worker: bool,
    /// Pending slot jobs before new ones are dropped
    #[serde(default = "default_worker_queue_depth")]
    pub worker_queue_depth: usize,
}

fn default_slot_worker() -> bool {
    true
}

fn default_worker_queue_depth() -> usize {
    8
}

impl Default for PhySection {
    fn default() -> Self {
        Self {
            link: PhyConfig::default(),
            slot_worker: default_slot_worker(),
            worker_queue_depth: default_worker_queue_depth(),
        }
    }
}

/// `[mac]` section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MacSection {
    #[serde(default = "default_control_queue_capacity")]
    pub control_queue_capacity: usize,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    #[serde(default)]
    pub dl_mcs: u8,
    #[serde(default)]
    pub ul_mcs: u8,
}

fn default_control_queue_capacity() -> usize {
    32
}

fn default_protocol_version() -> u8 {
    PROTOCOL_VERSION
}

impl Default for MacSection {
    fn default() -> Self {
        Self {
            control_queue_capacity: default_control_queue_capacity(),
            protocol_version: default_protocol_version(),
            dl_mcs: 0,
            ul_mcs: 0,
        }
    }
}

impl MacSection {
    pub fn to_mac_config(&self) -> MacConfig {
        MacConfig {
            control_queue_capacity: self.control_queue_capacity,
            protocol_version: self.protocol_version,
            dl_mcs: Mcs(self.dl_mcs),
            ul_mcs: Mcs(self.ul_mcs),
        }
    }
}

impl UeConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("parsing configuration {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::DuplexMode;
    use std::path::PathBuf;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = UeConfig::from_toml_str("").unwrap();
        assert!(config.phy.slot_worker);
        assert_eq!(config.phy.worker_queue_depth, 8);
        assert_eq!(config.phy.link.dl_ul_shift, 6);
        assert_eq!(config.mac.protocol_version, 1);
        assert_eq!(config.radio.duplex, DuplexMode::Tdd);
    }

    #[test]
    fn test_parse_sections() {
        let config = UeConfig::from_toml_str(
            r#"
            [radio]
            rx_gain = 10.0
            duplex = "fdd"
            input = "capture.iq"

            [phy]
            cfo_filter = 0.25
            dl_ul_shift_compensation = 3
            slot_worker = false

            [mac]
            control_queue_capacity = 4
            ul_mcs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.radio.rx_gain, 10.0);
        assert_eq!(config.radio.duplex, DuplexMode::Fdd);
        assert_eq!(config.radio.input, Some(PathBuf::from("capture.iq")));
        assert!(config.radio.output.is_none());
        assert!((config.phy.link.cfo_filter - 0.25).abs() < 1e-6);
        assert_eq!(config.phy.link.dl_ul_shift, 6);
        assert_eq!(config.phy.link.dl_ul_shift_compensation, 3);
        assert!(!config.phy.slot_worker);

        let mac = config.mac.to_mac_config();
        assert_eq!(mac.control_queue_capacity, 4);
        assert_eq!(mac.ul_mcs, Mcs(2));
        assert_eq!(mac.dl_mcs, Mcs(0));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = UeConfig::from_toml_file("/nonexistent/ue.toml").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/ue.toml"));
    }
}
