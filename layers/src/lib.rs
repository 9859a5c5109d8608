//! HNAP User-Equipment Link Layer
//! 
//! This crate implements the MAC and the PHY slot state machine of the
//! point-to-point access protocol: message framing, fragmentation, the per-user
//! scheduler, and the symbol-clocked receive/transmit paths.

pub mod phy;
pub mod mac;

use common::types::CrcWidth;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("Unknown message kind: tag {0}")]
    UnknownMessageKind(u8),

    #[error("Truncated header: need {needed} bytes, have {available}")]
    TruncatedHeader { needed: usize, available: usize },

    #[error("Payload overflow: header {header} + payload {payload} exceeds {available} bytes")]
    PayloadOverflow { header: usize, payload: usize, available: usize },

    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Slot full: message of {needed} bytes, {remaining} remaining")]
    SlotFull { needed: usize, remaining: usize },

    #[error("{0:?} check failed")]
    CrcMismatch(CrcWidth),

    #[error("Transport size mismatch: expected {expected} bytes, got {actual}")]
    TransportSizeMismatch { expected: usize, actual: usize },

    #[error("Synchronization lost")]
    SyncLost,

    #[error("Association rejected with response code {0}")]
    AssociationRejected(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
