//! Slot Mapping
//!
//! Transport block coding shared by every slot class, and the uplink mapping
//! the scheduler drives through `UplinkSlotMapper`.

use super::coding::Interleaver;
use super::frame_structure::{ul_control_symbol, ul_slot_symbols, NUM_SLOT, NUM_ULCTRL_SLOT};
use super::mcs::{mcs_scheme, transport_block_size, McsScheme, SlotClass, CONTROL_MCS};
use super::PhyUe;
use crate::mac::{LogicalChannel, UplinkSlotMapper};
use crate::LayerError;
use common::types::Mcs;
use common::utils::repack_bits;
use tracing::trace;

/// FEC-encode a block, optionally bit-interleave, and split into code units
pub fn encode_transport_block(block: &[u8], scheme: &McsScheme, interleave: bool) -> Vec<u8> {
    let mut coded = scheme.fec.encode(block);
    if interleave {
        coded = Interleaver::new(coded.len()).interleave(&coded);
    }
    repack_bits(&coded, scheme.modulation.bits_per_symbol())
}

/// Recover `len` bytes from the soft bits of a slot region; soft bits past the
/// coded length are ignored
pub fn decode_transport_block(soft: &[u8], len: usize, scheme: &McsScheme, interleave: bool) -> Vec<u8> {
    let coded_len = scheme.fec.encoded_len(len);
    let soft = &soft[..soft.len().min(coded_len * 8)];
    if interleave {
        let ordered = Interleaver::new(coded_len).deinterleave_soft(soft);
        scheme.fec.decode_soft(&ordered, len)
    } else {
        scheme.fec.decode_soft(soft, len)
    }
}

fn check_transport_size(channel: &LogicalChannel, mcs: Mcs, class: SlotClass) -> Result<(), LayerError> {
    let expected = transport_block_size(mcs, class)?;
    if channel.len() != expected {
        return Err(LayerError::TransportSizeMismatch { expected, actual: channel.len() });
    }
    Ok(())
}

impl UplinkSlotMapper for PhyUe {
    fn map_ul_data(&mut self, channel: &LogicalChannel, slot: usize, mcs: Mcs) -> Result<(), LayerError> {
        if slot >= NUM_SLOT {
            return Err(LayerError::InvalidState(format!("uplink data slot {} out of range", slot)));
        }
        check_transport_size(channel, mcs, SlotClass::Data)?;

        let scheme = mcs_scheme(mcs)?;
        let units = encode_transport_block(channel.as_bytes(), scheme, true);
        let symbols = ul_slot_symbols(slot);
        trace!(
            "Mapping uplink data slot {} (symbols {:?}, MCS {}) into {:?} grid",
            slot, symbols, mcs.0, self.scheduled_parity
        );
        self.tx_grid.modulate_region(self.scheduled_parity, symbols, scheme.modulation, &units);
        Ok(())
    }

    fn map_ul_control(&mut self, channel: &LogicalChannel, slot: usize) -> Result<(), LayerError> {
        if slot >= NUM_ULCTRL_SLOT {
            return Err(LayerError::InvalidState(format!("uplink control slot {} out of range", slot)));
        }
        check_transport_size(channel, CONTROL_MCS, SlotClass::UlControl)?;

        let scheme = mcs_scheme(CONTROL_MCS)?;
        let units = encode_transport_block(channel.as_bytes(), scheme, false);
        let symbol = ul_control_symbol(slot);
        trace!("Mapping uplink control slot {} at symbol {}", slot, symbol);
        self.tx_grid.modulate_region(self.scheduled_parity, symbol..=symbol, scheme.modulation, &units);
        Ok(())
    }
}
