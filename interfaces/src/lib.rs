//! Hardware Platform Interfaces
//!
//! This crate provides the radio platform abstraction the link layer runs on,
//! and a file-backed IQ implementation for offline runs.

pub mod platform;
pub mod file_radio;

pub use file_radio::FileRadio;
pub use platform::{RadioConfig, RadioPlatform, RadioStats};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed IQ stream: {0} trailing bytes")]
    MalformedStream(usize),
}
