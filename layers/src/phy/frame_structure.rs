//! Frame Structure
//!
//! Fixed TDD frame geometry: subcarrier map, slot-to-symbol layout for both
//! directions, and the receive phase table derived from it.

use std::ops::RangeInclusive;

/// FFT size
pub const NFFT: usize = 64;
/// Cyclic prefix length in samples
pub const CP_LEN: usize = 16;
/// Samples per OFDM symbol including the cyclic prefix
pub const SYMBOL_LEN: usize = NFFT + CP_LEN;

/// OFDM symbols per subframe
pub const SUBFRAME_LEN: usize = 64;
/// Subframes per frame
pub const FRAME_LEN: u32 = 32;
/// Symbols per data slot
pub const SLOT_LEN: usize = 14;
/// Symbols in the downlink control region
pub const DLCTRL_LEN: usize = 2;
/// Data slots per direction
pub const NUM_SLOT: usize = 4;
/// Uplink control slots
pub const NUM_ULCTRL_SLOT: usize = 2;
/// Symbols reserved for the uplink control region
pub const ULCTRL_REGION_LEN: usize = 2 * NUM_ULCTRL_SLOT;
/// Every symbol whose index is a multiple of this carries pilots
pub const PILOT_SYMBOL_SPACING: usize = 4;

/// Data subcarriers per symbol
pub const NUM_DATA_SUBCARRIERS: usize = 48;
/// Data resource elements in one data slot
pub const SLOT_DATA_RES: usize = SLOT_LEN * NUM_DATA_SUBCARRIERS;

/// Symbol count in subframe 0 at which the receiver drops sync on purpose;
/// the last downlink slot of subframe 0 carries the sync sequence
pub const RESYNC_SYMBOL: usize = DLCTRL_LEN + 1 + (SLOT_LEN + 1) * (NUM_SLOT - 1);

/// First symbol of the random-access burst in subframe 0
pub const RACH_FIRST_SYMBOL: usize = SUBFRAME_LEN - SLOT_LEN;

const GUARD_SUBCARRIERS: RangeInclusive<usize> = 27..=37;
const PILOT_SUBCARRIERS: [usize; 4] = [7, 21, 43, 57];

/// Subcarrier role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubcarrierType {
    Null,
    Pilot,
    Data,
}

/// Role of FFT bin `k`
pub fn subcarrier_type(k: usize) -> SubcarrierType {
    if k == 0 || GUARD_SUBCARRIERS.contains(&k) {
        SubcarrierType::Null
    } else if PILOT_SUBCARRIERS.contains(&k) {
        SubcarrierType::Pilot
    } else {
        SubcarrierType::Data
    }
}

pub fn data_subcarriers() -> impl Iterator<Item = usize> {
    (0..NFFT).filter(|&k| subcarrier_type(k) == SubcarrierType::Data)
}

pub fn pilot_subcarriers() -> impl Iterator<Item = usize> {
    PILOT_SUBCARRIERS.into_iter()
}

pub fn is_pilot_symbol(symbol: usize) -> bool {
    symbol % PILOT_SYMBOL_SPACING == 0
}

pub fn dl_control_symbols() -> RangeInclusive<usize> {
    0..=DLCTRL_LEN - 1
}

pub fn dl_slot_symbols(slot: usize) -> RangeInclusive<usize> {
    let first = DLCTRL_LEN + 2 + (SLOT_LEN + 1) * slot;
    first..=first + SLOT_LEN - 1
}

/// Uplink data slot symbols; slots after the control region are shifted past it
pub fn ul_slot_symbols(slot: usize) -> RangeInclusive<usize> {
    let mut first = (SLOT_LEN + 1) * slot;
    if slot >= NUM_SLOT / 2 {
        first += ULCTRL_REGION_LEN;
    }
    first..=first + SLOT_LEN - 1
}

pub fn ul_control_symbol(slot: usize) -> usize {
    (SLOT_LEN + 1) * (NUM_SLOT / 2) + 2 * slot
}

/// Receive phase of the slot state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxPhase {
    Acquiring,
    ControlDecode,
    DataSlot(usize),
    Idle,
}

/// Work due once a region's last symbol has been received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxBoundary {
    ControlComplete,
    DataSlotComplete(usize),
}

/// Receive transition table, indexed by the count of symbols received in the
/// current subframe
#[derive(Debug, Clone)]
pub struct RxSchedule {
    phases: [RxPhase; SUBFRAME_LEN],
    boundaries: [Option<RxBoundary>; SUBFRAME_LEN + 1],
}

impl RxSchedule {
    pub fn new() -> Self {
        let mut phases = [RxPhase::Idle; SUBFRAME_LEN];
        let mut boundaries = [None; SUBFRAME_LEN + 1];

        for symbol in dl_control_symbols() {
            phases[symbol] = RxPhase::ControlDecode;
        }
        boundaries[*dl_control_symbols().end() + 1] = Some(RxBoundary::ControlComplete);

        for slot in 0..NUM_SLOT {
            let symbols = dl_slot_symbols(slot);
            boundaries[*symbols.end() + 1] = Some(RxBoundary::DataSlotComplete(slot));
            for symbol in symbols {
                phases[symbol] = RxPhase::DataSlot(slot);
            }
        }

        Self { phases, boundaries }
    }

    /// Phase a received symbol index belongs to
    pub fn phase_of(&self, symbol: usize) -> RxPhase {
        self.phases.get(symbol).copied().unwrap_or(RxPhase::Idle)
    }

    /// Boundary reached after `count` symbols of the subframe were stored
    pub fn boundary_at(&self, count: usize) -> Option<RxBoundary> {
        self.boundaries.get(count).copied().flatten()
    }

    pub fn is_resync_point(&self, subframe: u32, count: usize) -> bool {
        subframe == 0 && count == RESYNC_SYMBOL
    }
}

impl Default for RxSchedule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcarrier_counts() {
        assert_eq!(data_subcarriers().count(), NUM_DATA_SUBCARRIERS);
        assert_eq!(pilot_subcarriers().count(), 4);
        assert!(pilot_subcarriers().all(|k| subcarrier_type(k) == SubcarrierType::Pilot));
    }

    #[test]
    fn test_downlink_slot_boundaries() {
        let schedule = RxSchedule::new();
        assert_eq!(schedule.boundary_at(DLCTRL_LEN), Some(RxBoundary::ControlComplete));
        for slot in 0..NUM_SLOT {
            let expected = DLCTRL_LEN + 1 + (SLOT_LEN + 1) * (slot + 1);
            assert_eq!(schedule.boundary_at(expected), Some(RxBoundary::DataSlotComplete(slot)));
        }
        assert_eq!(schedule.boundary_at(SUBFRAME_LEN), None);
        assert_eq!(schedule.phase_of(3), RxPhase::Idle);
        assert_eq!(schedule.phase_of(4), RxPhase::DataSlot(0));
        assert_eq!(schedule.phase_of(62), RxPhase::DataSlot(3));
    }

    #[test]
    fn test_resync_follows_third_slot() {
        let schedule = RxSchedule::new();
        assert_eq!(schedule.boundary_at(RESYNC_SYMBOL), Some(RxBoundary::DataSlotComplete(2)));
        assert!(schedule.is_resync_point(0, RESYNC_SYMBOL));
        assert!(!schedule.is_resync_point(1, RESYNC_SYMBOL));
    }

    #[test]
    fn test_uplink_layout() {
        assert_eq!(ul_slot_symbols(0), 0..=13);
        assert_eq!(ul_slot_symbols(1), 15..=28);
        assert_eq!(ul_control_symbol(0), 30);
        assert_eq!(ul_control_symbol(1), 32);
        assert_eq!(ul_slot_symbols(2), 34..=47);
        assert_eq!(*ul_slot_symbols(3).end(), 62);
        assert!(RACH_FIRST_SYMBOL + 3 < SUBFRAME_LEN);
    }
}
