//! Medium Access Control (MAC) Layer Implementation
//!
//! Implements the user-side MAC: message framing, fragmentation, association
//! handling and the per-cycle uplink scheduler.

pub mod messages;
pub mod fragmentation;
pub mod channel;
pub mod scheduler;

use crate::LayerError;
use crate::phy::assignments::SlotAssignments;
use common::types::{Mcs, UserId};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

pub use channel::LogicalChannel;
pub use fragmentation::{DataFrame, Fragmenter, Reassembler};
pub use messages::{AssociationResponse, DataFragment, MacMessage, MessageKind};
pub use scheduler::{MacStats, MacUe};

/// Protocol version announced in association responses
pub const PROTOCOL_VERSION: u8 = 1;

/// MAC layer configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Maximum number of queued control messages
    pub control_queue_capacity: usize,
    /// Local protocol version, compared against association responses
    pub protocol_version: u8,
    /// Initial downlink MCS
    pub dl_mcs: Mcs,
    /// Initial uplink MCS
    pub ul_mcs: Mcs,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            control_queue_capacity: 32,
            protocol_version: PROTOCOL_VERSION,
            dl_mcs: Mcs(0),
            ul_mcs: Mcs(0),
        }
    }
}

/// Association state of the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Unassociated,
    RachPending { attempts: u8 },
    Associated,
}

/// MAC-PHY interface used by the receive path and the slot-decode worker
pub trait MacPhyInterface: Send + Sync {
    /// Publish the assignment vectors decoded for the current subframe
    fn set_assignments(&self, assignments: SlotAssignments);

    /// Deliver a decoded downlink channel
    fn receive_channel(&self, channel: LogicalChannel);

    fn is_associated(&self) -> bool;

    /// User id assigned at association, if any
    fn user_id(&self) -> Option<UserId>;

    fn dl_mcs(&self) -> Mcs;

    /// Notification that a random-access request was transmitted
    fn rach_attempt(&self, rach_user_id: UserId, attempt: u8);
}

/// Uplink slot mapping driven by the scheduler
pub trait UplinkSlotMapper {
    /// Encode a channel into an uplink data slot of the scheduled subframe
    fn map_ul_data(&mut self, channel: &LogicalChannel, slot: usize, mcs: Mcs) -> Result<(), LayerError>;

    /// Encode a channel into an uplink control slot of the scheduled subframe
    fn map_ul_control(&mut self, channel: &LogicalChannel, slot: usize) -> Result<(), LayerError>;
}

/// Shared handle to a MAC instance
#[derive(Clone)]
pub struct MacHandle {
    inner: Arc<Mutex<MacUe>>,
}

impl MacHandle {
    pub fn new(mac: MacUe) -> Self {
        Self { inner: Arc::new(Mutex::new(mac)) }
    }

    pub fn lock(&self) -> MutexGuard<'_, MacUe> {
        self.inner.lock()
    }

    /// Run one scheduling cycle
    pub fn run(&self, mapper: &mut dyn UplinkSlotMapper) -> Result<(), LayerError> {
        self.inner.lock().run(mapper)
    }

    pub fn add_tx_data(&self, frame: DataFrame) {
        self.inner.lock().add_tx_data(frame);
    }
}

impl MacPhyInterface for MacHandle {
    fn set_assignments(&self, assignments: SlotAssignments) {
        self.inner.lock().set_assignments(assignments);
    }

    fn receive_channel(&self, channel: LogicalChannel) {
        self.inner.lock().receive_channel(channel);
    }

    fn is_associated(&self) -> bool {
        self.inner.lock().state() == AssociationState::Associated
    }

    fn user_id(&self) -> Option<UserId> {
        self.inner.lock().user_id()
    }

    fn dl_mcs(&self) -> Mcs {
        self.inner.lock().dl_mcs()
    }

    fn rach_attempt(&self, rach_user_id: UserId, attempt: u8) {
        self.inner.lock().rach_attempt(rach_user_id, attempt);
    }
}
