//! Slot Assignment Table
//!
//! The downlink control slot tells each user which slots it owns this
//! subframe. Decoded vectors are kept per subframe parity so the vector the
//! scheduler is consuming is never overwritten by the next decode.

use super::frame_structure::{NUM_SLOT, NUM_ULCTRL_SLOT};
use common::types::{SubframeParity, UserId};

/// Payload bytes of the downlink control block (one nibble per slot)
pub const DLCTRL_BLOCK_LEN: usize = (2 * NUM_SLOT + NUM_ULCTRL_SLOT + 1) / 2;

/// Assignment vectors of one subframe for this user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotAssignments {
    pub dl_data: [bool; NUM_SLOT],
    pub ul_data: [bool; NUM_SLOT],
    pub ul_ctrl: [bool; NUM_ULCTRL_SLOT],
}

fn nibble(block: &[u8], index: usize) -> u8 {
    let byte = block.get(index / 2).copied().unwrap_or(0);
    if index % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0F
    }
}

impl SlotAssignments {
    /// Interpret a control block as user-id nibbles: downlink slots, then
    /// uplink slots, then uplink control slots
    pub fn from_control_block(block: &[u8], user: Option<UserId>) -> Self {
        let mine = |n: u8| user.is_some_and(|u| u.value() == n);
        let mut assignments = Self::default();

        for slot in 0..NUM_SLOT {
            let owner = nibble(block, slot);
            assignments.dl_data[slot] = mine(owner) || owner == UserId::BROADCAST.value();
            assignments.ul_data[slot] = mine(nibble(block, NUM_SLOT + slot));
        }
        for slot in 0..NUM_ULCTRL_SLOT {
            assignments.ul_ctrl[slot] = mine(nibble(block, 2 * NUM_SLOT + slot));
        }
        assignments
    }

    pub fn ul_data_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NUM_SLOT).filter(|&slot| self.ul_data[slot])
    }

    pub fn first_ul_ctrl_slot(&self) -> Option<usize> {
        self.ul_ctrl.iter().position(|&assigned| assigned)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Pack per-slot owners into a control block
pub fn pack_control_block(
    dl_data: &[UserId; NUM_SLOT],
    ul_data: &[UserId; NUM_SLOT],
    ul_ctrl: &[UserId; NUM_ULCTRL_SLOT],
) -> [u8; DLCTRL_BLOCK_LEN] {
    let mut block = [0u8; DLCTRL_BLOCK_LEN];
    let owners = dl_data.iter().chain(ul_data).chain(ul_ctrl);
    for (i, owner) in owners.enumerate() {
        let value = owner.value() & 0x0F;
        block[i / 2] |= if i % 2 == 0 { value << 4 } else { value };
    }
    block
}

/// Parity double-buffered assignment vectors, owned by the PHY
#[derive(Debug, Clone, Default)]
pub struct SlotAssignmentTable {
    buffers: [SlotAssignments; 2],
}

impl SlotAssignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, parity: SubframeParity, assignments: SlotAssignments) {
        self.buffers[parity.index()] = assignments;
    }

    pub fn read(&self, parity: SubframeParity) -> SlotAssignments {
        self.buffers[parity.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: UserId = UserId::UNASSIGNED;

    #[test]
    fn test_block_decodes_for_user() {
        let block = pack_control_block(
            &[UserId(3), UserId::BROADCAST, UserId(5), NONE],
            &[NONE, UserId(3), UserId(3), UserId(9)],
            &[UserId(5), UserId(3)],
        );
        assert_eq!(block.len(), 5);

        let a = SlotAssignments::from_control_block(&block, Some(UserId(3)));
        assert_eq!(a.dl_data, [true, true, false, false]);
        assert_eq!(a.ul_data, [false, true, true, false]);
        assert_eq!(a.ul_ctrl, [false, true]);
        assert_eq!(a.ul_data_slots().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(a.first_ul_ctrl_slot(), Some(1));
    }

    #[test]
    fn test_unassociated_sees_only_broadcast() {
        let block = pack_control_block(
            &[UserId::BROADCAST, NONE, NONE, NONE],
            &[NONE; NUM_SLOT],
            &[NONE; NUM_ULCTRL_SLOT],
        );
        let a = SlotAssignments::from_control_block(&block, None);
        assert_eq!(a.dl_data, [true, false, false, false]);
        assert!(a.ul_data_slots().next().is_none());
    }

    #[test]
    fn test_zero_block_assigns_nothing() {
        let a = SlotAssignments::from_control_block(&[0u8; DLCTRL_BLOCK_LEN], Some(UserId(1)));
        assert!(a.is_empty());
    }

    #[test]
    fn test_parity_isolation() {
        let mut table = SlotAssignmentTable::new();
        let mut even = SlotAssignments::default();
        even.ul_data[0] = true;
        table.write(SubframeParity::Even, even);

        let mut odd = SlotAssignments::default();
        odd.dl_data[3] = true;
        table.write(SubframeParity::Odd, odd);

        assert_eq!(table.read(SubframeParity::Even), even);
        assert_eq!(table.read(SubframeParity::Odd), odd);
    }
}
