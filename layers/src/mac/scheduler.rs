//! Per-user MAC Scheduler
//!
//! Owns association state, the control queue and the fragmentation state, and
//! once per TDMA cycle fills the uplink slots the base station assigned.

use super::channel::LogicalChannel;
use super::fragmentation::{DataFrame, Fragmenter, Reassembler};
use super::messages::{AssociationResponse, MacMessage, DATA_HEADER_LEN};
use super::{AssociationState, MacConfig, UplinkSlotMapper};
use crate::phy::assignments::SlotAssignments;
use crate::phy::mcs::{transport_block_size, SlotClass, CONTROL_MCS};
use crate::LayerError;
use common::types::{CrcWidth, Direction, Mcs, UserId};
use crossbeam_channel::Sender;
use std::collections::VecDeque;
use tracing::{debug, error, info, trace, warn};

/// MAC counters
#[derive(Debug, Clone, Default)]
pub struct MacStats {
    pub channels_received: u64,
    pub channels_dropped: u64,
    pub frames_delivered: u64,
    pub control_messages_dropped: u64,
    pub slots_mapped: u64,
}

/// User-side MAC instance
pub struct MacUe {
    config: MacConfig,
    state: AssociationState,
    user_id: Option<UserId>,
    rach_user_id: Option<UserId>,
    dl_mcs: Mcs,
    ul_mcs: Mcs,
    timing_advance: u16,
    control_queue: VecDeque<MacMessage>,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    assignments: SlotAssignments,
    upper_layer: Option<Sender<DataFrame>>,
    stats: MacStats,
}

impl MacUe {
    /// Create a new MAC instance; completed downlink frames go to `upper_layer`
    pub fn new(config: MacConfig, upper_layer: Option<Sender<DataFrame>>) -> Result<Self, LayerError> {
        if config.control_queue_capacity == 0 {
            return Err(LayerError::InvalidConfiguration("control queue capacity must be non-zero".into()));
        }
        if Mcs::new(config.dl_mcs.0).is_none() || Mcs::new(config.ul_mcs.0).is_none() {
            return Err(LayerError::InvalidConfiguration(format!(
                "initial MCS out of range: dl={} ul={}",
                config.dl_mcs.0, config.ul_mcs.0
            )));
        }

        Ok(Self {
            dl_mcs: config.dl_mcs,
            ul_mcs: config.ul_mcs,
            config,
            state: AssociationState::Unassociated,
            user_id: None,
            rach_user_id: None,
            timing_advance: 0,
            control_queue: VecDeque::new(),
            fragmenter: Fragmenter::new(Direction::Uplink),
            reassembler: Reassembler::new(),
            assignments: SlotAssignments::default(),
            upper_layer,
            stats: MacStats::default(),
        })
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn dl_mcs(&self) -> Mcs {
        self.dl_mcs
    }

    pub fn ul_mcs(&self) -> Mcs {
        self.ul_mcs
    }

    pub fn timing_advance(&self) -> u16 {
        self.timing_advance
    }

    pub fn stats(&self) -> &MacStats {
        &self.stats
    }

    pub fn control_queue(&self) -> &VecDeque<MacMessage> {
        &self.control_queue
    }

    pub fn assignments(&self) -> SlotAssignments {
        self.assignments
    }

    /// Queue an outbound frame for fragmentation
    pub fn add_tx_data(&mut self, frame: DataFrame) {
        self.fragmenter.add_frame(frame);
    }

    /// Bytes waiting to be fragmented
    pub fn tx_buffer_size(&self) -> usize {
        self.fragmenter.buffer_size()
    }

    /// Replace the assignment view with the freshly decoded vectors
    pub fn set_assignments(&mut self, assignments: SlotAssignments) {
        trace!("Assignments updated: {:?}", assignments);
        self.assignments = assignments;
    }

    /// Record a transmitted random-access attempt
    pub fn rach_attempt(&mut self, rach_user_id: UserId, attempt: u8) {
        if self.state == AssociationState::Associated {
            return;
        }
        self.rach_user_id = Some(rach_user_id);
        self.state = AssociationState::RachPending { attempts: attempt };
        debug!("RACH attempt {} with rach id {}", attempt, rach_user_id.0);
    }

    fn enqueue_control(&mut self, message: MacMessage) {
        if self.control_queue.len() >= self.config.control_queue_capacity {
            warn!("Control queue full, dropping {:?}", message.kind());
            self.stats.control_messages_dropped += 1;
            return;
        }
        self.control_queue.push_back(message);
    }

    /// Fill the uplink slots assigned for this cycle
    pub fn run(&mut self, mapper: &mut dyn UplinkSlotMapper) -> Result<(), LayerError> {
        if self.state != AssociationState::Associated {
            return Ok(());
        }

        let mut queued = self.fragmenter.buffer_size();
        if queued > 0 {
            let ul_slots: Vec<usize> = self.assignments.ul_data_slots().collect();
            if ul_slots.is_empty() {
                debug!("No uplink slot assigned, requesting capacity for {} bytes", queued);
                self.enqueue_control(MacMessage::ul_req(queued));
            } else {
                let tbs = transport_block_size(self.ul_mcs, SlotClass::Data)?;
                for slot in ul_slots {
                    if queued == 0 {
                        break;
                    }
                    let mut channel = LogicalChannel::new(tbs - CrcWidth::Crc16.bytes(), CrcWidth::Crc16);
                    channel.add_all_from_queue(&mut self.control_queue);

                    let room = channel.remaining();
                    if room > DATA_HEADER_LEN {
                        if let Some(fragment) = self.fragmenter.get_fragment(room - DATA_HEADER_LEN) {
                            channel.add_message(&fragment)?;
                        }
                    }
                    channel.calc_crc();
                    mapper.map_ul_data(&channel, slot, self.ul_mcs).inspect_err(|e| {
                        error!("Mapping uplink data slot {} failed: {}", slot, e);
                    })?;
                    self.stats.slots_mapped += 1;

                    queued = self.fragmenter.buffer_size();
                }
            }
        }

        if let Some(slot) = self.assignments.first_ul_ctrl_slot() {
            if self.control_queue.is_empty() {
                self.enqueue_control(MacMessage::keepalive());
            }
            let tbs = transport_block_size(CONTROL_MCS, SlotClass::UlControl)?;
            let mut channel = LogicalChannel::new(tbs - CrcWidth::Crc8.bytes(), CrcWidth::Crc8);
            channel.add_all_from_queue(&mut self.control_queue);
            channel.calc_crc();
            mapper.map_ul_control(&channel, slot).inspect_err(|e| {
                error!("Mapping uplink control slot {} failed: {}", slot, e);
            })?;
            self.stats.slots_mapped += 1;
        }

        Ok(())
    }

    /// Handle a decoded downlink channel
    pub fn receive_channel(&mut self, mut channel: LogicalChannel) {
        self.stats.channels_received += 1;
        if !channel.verify_crc() {
            debug!("Dropping downlink channel: {}", LayerError::CrcMismatch(channel.crc_width()));
            self.stats.channels_dropped += 1;
            return;
        }

        while let Some(parsed) = channel.parse_next_message(Direction::Downlink) {
            match parsed {
                Ok(message) => {
                    if let Err(e) = self.handle_message(message) {
                        warn!("{}", e);
                    }
                }
                Err(e) => warn!("Discarding rest of channel: {}", e),
            }
        }
    }

    /// Dispatch one downlink message
    pub fn handle_message(&mut self, message: MacMessage) -> Result<(), LayerError> {
        match message {
            MacMessage::AssociateResponse { user_id, rach_user_id, response, protocol_version } => {
                if protocol_version != self.config.protocol_version {
                    warn!(
                        "Protocol version mismatch: local {}, base station {}",
                        self.config.protocol_version, protocol_version
                    );
                }
                if let Some(own) = self.rach_user_id {
                    if own.0 != rach_user_id {
                        debug!("Association response for rach id {} (ours {})", rach_user_id, own.0);
                    }
                }
                if response != AssociationResponse::Success {
                    return Err(LayerError::AssociationRejected(response as u8));
                }

                let Some(granted) = UserId::new(user_id) else {
                    return Err(LayerError::InvalidState(format!(
                        "association granted with invalid user id {}",
                        user_id
                    )));
                };
                self.user_id = Some(granted);
                self.state = AssociationState::Associated;
                info!("Associated with user id {}", user_id);
            }
            MacMessage::DlMcsInfo { mcs } => match Mcs::new(mcs) {
                Some(mcs) => {
                    debug!("Downlink MCS set to {}", mcs.0);
                    self.dl_mcs = mcs;
                }
                None => warn!("Ignoring invalid downlink MCS {}", mcs),
            },
            MacMessage::UlMcsInfo { mcs } => match Mcs::new(mcs) {
                Some(mcs) => {
                    debug!("Uplink MCS set to {}", mcs.0);
                    self.ul_mcs = mcs;
                }
                None => warn!("Ignoring invalid uplink MCS {}", mcs),
            },
            MacMessage::TimingAdvance { advance } => {
                trace!("Timing advance {} received, not applied", advance);
                self.timing_advance = advance;
            }
            MacMessage::DlData(fragment) => {
                if let Some(frame) = self.reassembler.accept(fragment) {
                    self.deliver(frame);
                }
            }
            other => {
                warn!("Protocol error: unexpected {:?} on downlink", other.kind());
            }
        }
        Ok(())
    }

    fn deliver(&mut self, frame: DataFrame) {
        self.stats.frames_delivered += 1;
        match &self.upper_layer {
            Some(sender) => {
                if sender.send(frame).is_err() {
                    warn!("Upper layer receiver closed, frame dropped");
                }
            }
            None => debug!("No upper layer attached, dropping frame of {} bytes", frame.len()),
        }
    }
}
