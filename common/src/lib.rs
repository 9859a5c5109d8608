//! Common Utilities and Types Library
//! 
//! This crate provides shared identifiers and bit-level helpers used by the
//! HNAP user-equipment link layer.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
