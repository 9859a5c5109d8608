//! Modulation and Coding Schemes
//!
//! Maps MCS indices to a constellation and code, and derives transport block
//! sizes from the slot geometry.

use super::frame_structure::{NUM_DATA_SUBCARRIERS, SLOT_DATA_RES};
use crate::LayerError;
use common::types::Mcs;

/// MCS used for control slots and the random-access request
pub const CONTROL_MCS: Mcs = Mcs(0);

/// Constellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
}

impl Modulation {
    pub fn bits_per_symbol(self) -> usize {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
        }
    }
}

/// Forward error correction code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FecScheme {
    Uncoded,
    /// Block repeated twice, soft-combined on decode
    Repetition2,
}

impl FecScheme {
    pub fn repetition(self) -> usize {
        match self {
            FecScheme::Uncoded => 1,
            FecScheme::Repetition2 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McsScheme {
    pub modulation: Modulation,
    pub fec: FecScheme,
}

pub const MCS_TABLE: [McsScheme; Mcs::COUNT as usize] = [
    McsScheme { modulation: Modulation::Qpsk, fec: FecScheme::Repetition2 },
    McsScheme { modulation: Modulation::Qpsk, fec: FecScheme::Uncoded },
    McsScheme { modulation: Modulation::Qam16, fec: FecScheme::Repetition2 },
    McsScheme { modulation: Modulation::Qam16, fec: FecScheme::Uncoded },
];

pub fn mcs_scheme(mcs: Mcs) -> Result<&'static McsScheme, LayerError> {
    MCS_TABLE
        .get(mcs.index())
        .ok_or_else(|| LayerError::InvalidConfiguration(format!("MCS {} not in table", mcs.0)))
}

/// Slot classes with distinct resource counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    Data,
    UlControl,
    DlControl,
}

impl SlotClass {
    /// Resource elements available to the class
    pub fn resource_elements(self) -> usize {
        match self {
            SlotClass::Data => SLOT_DATA_RES,
            SlotClass::UlControl | SlotClass::DlControl => NUM_DATA_SUBCARRIERS,
        }
    }
}

/// Bytes carried by one slot of `class` at `mcs`, CRC included
pub fn transport_block_size(mcs: Mcs, class: SlotClass) -> Result<usize, LayerError> {
    let scheme = mcs_scheme(mcs)?;
    let bits = class.resource_elements() * scheme.modulation.bits_per_symbol();
    Ok(bits / 8 / scheme.fec.repetition())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_transport_block_sizes() {
        let sizes: Vec<usize> = (0..Mcs::COUNT)
            .map(|m| transport_block_size(Mcs(m), SlotClass::Data).unwrap())
            .collect();
        assert_eq!(sizes, vec![84, 168, 168, 336]);
    }

    #[test]
    fn test_control_transport_block_size() {
        assert_eq!(transport_block_size(CONTROL_MCS, SlotClass::UlControl).unwrap(), 6);
        assert_eq!(transport_block_size(CONTROL_MCS, SlotClass::DlControl).unwrap(), 6);
    }

    #[test]
    fn test_unknown_mcs() {
        assert!(matches!(
            transport_block_size(Mcs(Mcs::COUNT), SlotClass::Data),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }
}
