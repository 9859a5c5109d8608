//! Radio Platform Abstraction
//!
//! The link layer consumes received baseband blocks and produces transmit
//! blocks through `RadioPlatform`. Gain, frequency and duplex settings are
//! applied out of band.

use crate::InterfaceError;
use common::types::DuplexMode;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_sample_rate() -> f64 {
    5e6
}

fn default_frequency() -> f64 {
    2.4e9
}

fn default_tx_buffer_len() -> usize {
    // One subframe of samples
    64 * 80
}

/// Radio configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Receive carrier frequency in Hz
    #[serde(default = "default_frequency")]
    pub rx_frequency: f64,
    /// Transmit carrier frequency in Hz
    #[serde(default = "default_frequency")]
    pub tx_frequency: f64,
    /// Receive gain in dB
    #[serde(default)]
    pub rx_gain: f32,
    /// Transmit gain in dB
    #[serde(default)]
    pub tx_gain: f32,
    #[serde(default)]
    pub duplex: DuplexMode,
    /// Transmit staging buffer length in samples
    #[serde(default = "default_tx_buffer_len")]
    pub tx_buffer_len: usize,
    /// Received IQ source (interleaved little-endian f32)
    #[serde(default)]
    pub input: Option<PathBuf>,
    /// Transmitted IQ sink (interleaved little-endian f32)
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            rx_frequency: default_frequency(),
            tx_frequency: default_frequency(),
            rx_gain: 0.0,
            tx_gain: 0.0,
            duplex: DuplexMode::default(),
            tx_buffer_len: default_tx_buffer_len(),
            input: None,
            output: None,
        }
    }
}

/// Sample counters
#[derive(Debug, Default, Clone)]
pub struct RadioStats {
    pub rx_samples: u64,
    pub tx_samples: u64,
    pub tx_buffers: u64,
    /// Samples that did not fit the transmit staging buffer
    pub tx_overflows: u64,
}

/// Hardware platform collaborator
pub trait RadioPlatform: Send {
    /// Fill `buf` with received samples; returns the count, 0 at end of stream
    fn receive(&mut self, buf: &mut [Complex32]) -> Result<usize, InterfaceError>;

    /// Stage samples at `offset` in the pending transmit buffer; returns how
    /// many fit
    fn prepare_transmit(&mut self, samples: &[Complex32], offset: usize) -> Result<usize, InterfaceError>;

    /// Send the staged transmit buffer
    fn push_transmit(&mut self) -> Result<(), InterfaceError>;

    fn set_rx_gain(&mut self, gain_db: f32);

    fn set_tx_gain(&mut self, gain_db: f32);

    fn set_rx_frequency(&mut self, frequency_hz: f64);

    fn set_tx_frequency(&mut self, frequency_hz: f64);

    fn set_duplex_mode(&mut self, mode: DuplexMode);

    fn config(&self) -> &RadioConfig;

    fn stats(&self) -> RadioStats;
}

/// Linear amplitude factor of a gain in dB
pub fn db_to_amplitude(gain_db: f32) -> f32 {
    10f32.powf(gain_db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RadioConfig::default();
        assert_eq!(config.duplex, DuplexMode::Tdd);
        assert_eq!(config.tx_buffer_len, 5120);
        assert!(config.input.is_none());
    }

    #[test]
    fn test_db_to_amplitude() {
        assert!((db_to_amplitude(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_amplitude(20.0) - 10.0).abs() < 1e-4);
        assert!((db_to_amplitude(-6.0) - 0.501).abs() < 1e-3);
    }
}
