//! Common Types for the HNAP link layer
//! 
//! Defines fundamental identifiers shared by the MAC, PHY and platform crates

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};

/// User identifier carried in assignment nibbles and association responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u8);

impl UserId {
    /// Nibble value meaning "no user"
    pub const UNASSIGNED: UserId = UserId(0);
    /// Nibble value addressing every user (downlink data only)
    pub const BROADCAST: UserId = UserId(0x0F);
    /// Highest id a base station hands out
    pub const MAX: u8 = 14;

    /// Create a new user id with validation
    pub fn new(value: u8) -> Option<Self> {
        if (1..=Self::MAX).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the raw nibble value
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Modulation and coding scheme index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Mcs(pub u8);

impl Mcs {
    /// Number of entries in the MCS table
    pub const COUNT: u8 = 4;

    /// Create a new MCS with validation
    pub fn new(value: u8) -> Option<Self> {
        if value < Self::COUNT {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Link direction, selects the tag space for MAC messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Base station to user
    Downlink,
    /// User to base station
    Uplink,
}

/// Subframe parity, selects the double-buffered half of per-subframe state
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SubframeParity {
    Even = 0,
    Odd = 1,
}

impl SubframeParity {
    /// Parity of a subframe number
    pub fn of(subframe: u32) -> Self {
        if subframe % 2 == 0 {
            SubframeParity::Even
        } else {
            SubframeParity::Odd
        }
    }

    /// Index into a two-element buffer
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn other(self) -> Self {
        match self {
            SubframeParity::Even => SubframeParity::Odd,
            SubframeParity::Odd => SubframeParity::Even,
        }
    }
}

/// Width of the CRC trailing a logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrcWidth {
    Crc8,
    Crc16,
}

impl CrcWidth {
    /// Number of trailing bytes occupied by the CRC
    pub fn bytes(self) -> usize {
        match self {
            CrcWidth::Crc8 => 1,
            CrcWidth::Crc16 => 2,
        }
    }
}

/// Radio duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplexMode {
    /// Shared frequency, alternating in time
    #[default]
    Tdd,
    /// Separate rx and tx frequencies
    Fdd,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_range() {
        assert!(UserId::new(0).is_none());
        assert_eq!(UserId::new(1), Some(UserId(1)));
        assert_eq!(UserId::new(14), Some(UserId(14)));
        assert!(UserId::new(15).is_none());
    }

    #[test]
    fn test_mcs_validation() {
        assert_eq!(Mcs::new(3).map(|m| m.index()), Some(3));
        assert!(Mcs::new(Mcs::COUNT).is_none());
    }

    #[test]
    fn test_subframe_parity() {
        assert_eq!(SubframeParity::of(0), SubframeParity::Even);
        assert_eq!(SubframeParity::of(31), SubframeParity::Odd);
        assert_eq!(SubframeParity::Odd.other().index(), 0);
    }
}
