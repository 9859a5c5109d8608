//! Downlink Control Slot
//!
//! The control slot carries the per-subframe assignment map: five bytes of
//! user-id nibbles and a CRC-8, scrambled and repetition coded at the control
//! MCS on the first control symbol.

use super::assignments::{SlotAssignments, DLCTRL_BLOCK_LEN};
use super::coding::scramble;
use super::frame_structure::dl_control_symbols;
use super::mcs::{mcs_scheme, CONTROL_MCS};
use super::slot_mapping::{decode_transport_block, encode_transport_block};
use super::PhyUe;
use crate::LayerError;
use common::types::SubframeParity;
use common::utils::{bytes_to_hex, crc8};
use tracing::{debug, trace, warn};

/// Encoded control block length, CRC included
const DLCTRL_CODED_LEN: usize = DLCTRL_BLOCK_LEN + 1;

/// Code units of an assignment map as the base station sends it
pub fn encode_control_block(block: &[u8; DLCTRL_BLOCK_LEN]) -> Result<Vec<u8>, LayerError> {
    let mut coded = [0u8; DLCTRL_CODED_LEN];
    coded[..DLCTRL_BLOCK_LEN].copy_from_slice(block);
    coded[DLCTRL_BLOCK_LEN] = crc8(block);
    scramble(&mut coded);
    Ok(encode_transport_block(&coded, mcs_scheme(CONTROL_MCS)?, false))
}

/// Decode an assignment map from control-slot soft bits; `None` on CRC failure
pub fn decode_control_block(soft: &[u8]) -> Result<Option<[u8; DLCTRL_BLOCK_LEN]>, LayerError> {
    let mut decoded = decode_transport_block(soft, DLCTRL_CODED_LEN, mcs_scheme(CONTROL_MCS)?, false);
    scramble(&mut decoded);

    let (payload, crc) = decoded.split_at(DLCTRL_BLOCK_LEN);
    if crc8(payload) != crc[0] {
        trace!("Control block {} failed CRC", bytes_to_hex(&decoded));
        return Ok(None);
    }
    let mut block = [0u8; DLCTRL_BLOCK_LEN];
    block.copy_from_slice(payload);
    Ok(Some(block))
}

impl PhyUe {
    /// Decode the control slot of the subframe stored under `parity` and
    /// publish the resulting assignments
    pub(super) fn process_control_slot(&mut self, parity: SubframeParity) {
        let modulation = match mcs_scheme(CONTROL_MCS) {
            Ok(scheme) => scheme.modulation,
            Err(e) => {
                warn!("Control slot skipped: {}", e);
                return;
            }
        };
        let soft = self.rx_grid.lock().demodulate_region(parity, dl_control_symbols(), modulation);

        // An undecodable map must read as "nothing assigned"
        let block = match decode_control_block(&soft) {
            Ok(Some(block)) => block,
            Ok(None) | Err(_) => {
                self.stats.control_crc_failures += 1;
                debug!("Control slot of subframe {} failed CRC, clearing assignments", self.rx_subframe);
                [0u8; DLCTRL_BLOCK_LEN]
            }
        };

        let user = self.mac_interface.as_ref().and_then(|mac| mac.user_id());
        let assignments = SlotAssignments::from_control_block(&block, user);
        trace!("Subframe {} assignments: {:?}", self.rx_subframe, assignments);

        self.assignments.write(parity, assignments);
        if let Some(mac) = &self.mac_interface {
            mac.set_assignments(assignments);
        }
        if let Some(previous) = self.pending_schedule.replace(self.rx_subframe) {
            debug!("Scheduling request for subframe {} superseded", previous);
        }
    }
}
