//! Physical Layer (PHY) Submodules
//!
//! This module contains the user-side slot state machine: acquisition and
//! re-synchronization, per-symbol receive dispatch, downlink control decode,
//! uplink slot mapping and the per-symbol transmit path.

pub mod frame_structure;
pub mod mcs;
pub mod modem;
pub mod coding;
pub mod ofdm;
pub mod assignments;
pub mod resource_grid;
pub mod dl_control;
pub mod slot_mapping;
pub mod worker;

// Re-export commonly used types
pub use assignments::{SlotAssignmentTable, SlotAssignments};
pub use frame_structure::{RxPhase, RxSchedule};
pub use mcs::{Modulation, McsScheme, SlotClass};
pub use ofdm::{FrameGenerator, FrameSynchronizer, OfdmFrameGen, OfdmFrameSync};
pub use resource_grid::{RxGrid, SymbolAllocation, TxResourceGrid};
pub use worker::{RxSlotJob, SlotDecodeWorker};

use crate::mac::MacPhyInterface;
use crate::LayerError;
use common::types::{CrcWidth, SubframeParity, UserId};
use common::utils::crc8;
use crossbeam_channel::{Sender, TrySendError};
use frame_structure::{
    data_subcarriers, is_pilot_symbol, RxBoundary, FRAME_LEN, NFFT, RACH_FIRST_SYMBOL, SUBFRAME_LEN,
    SYMBOL_LEN,
};
use mcs::{mcs_scheme, transport_block_size, CONTROL_MCS};
use num_complex::Complex32;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use slot_mapping::encode_transport_block;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Samples kept between blocks while searching for sync: the S0 pair plus S1
const SEARCH_HISTORY: usize = 3 * SYMBOL_LEN;

/// Samples searched after the periodic sync drop before sync counts as lost
const REACQUIRE_WINDOW: usize = SUBFRAME_LEN * SYMBOL_LEN;

fn default_cfo_filter() -> f32 {
    0.1
}

fn default_dl_ul_shift() -> usize {
    6
}

fn default_dl_ul_shift_compensation() -> usize {
    2
}

/// PHY layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhyConfig {
    /// Weight of a new CFO estimate when re-acquiring
    #[serde(default = "default_cfo_filter")]
    pub cfo_filter: f32,
    /// Downlink to uplink turnaround in symbols
    #[serde(default = "default_dl_ul_shift")]
    pub dl_ul_shift: usize,
    /// Hardware latency compensation in symbols
    #[serde(default = "default_dl_ul_shift_compensation")]
    pub dl_ul_shift_compensation: usize,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            cfo_filter: default_cfo_filter(),
            dl_ul_shift: default_dl_ul_shift(),
            dl_ul_shift_compensation: default_dl_ul_shift_compensation(),
        }
    }
}

impl PhyConfig {
    fn validate(&self) -> Result<(), LayerError> {
        if !(self.cfo_filter > 0.0 && self.cfo_filter <= 1.0) {
            return Err(LayerError::InvalidConfiguration(format!(
                "CFO filter coefficient {} outside (0, 1]",
                self.cfo_filter
            )));
        }
        if self.dl_ul_shift >= SUBFRAME_LEN || self.dl_ul_shift_compensation >= SUBFRAME_LEN {
            return Err(LayerError::InvalidConfiguration(format!(
                "turnaround shift {}+{} exceeds a subframe",
                self.dl_ul_shift, self.dl_ul_shift_compensation
            )));
        }
        Ok(())
    }

    /// Transmit symbol index paired with the first post-sync receive symbol
    fn tx_initial_symbol(&self) -> usize {
        (SUBFRAME_LEN - self.dl_ul_shift + self.dl_ul_shift_compensation) % SUBFRAME_LEN
    }
}

/// PHY layer statistics
#[derive(Debug, Clone, Default)]
pub struct PhyStats {
    pub sync_acquisitions: u64,
    pub sync_losses: u64,
    pub control_crc_failures: u64,
    pub slots_decoded: u64,
    pub slots_offloaded: u64,
    pub worker_drops: u64,
    pub rach_attempts: u64,
    pub symbols_received: u64,
    pub symbols_transmitted: u64,
}

/// Transmit timeline position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TxPosition {
    subframe: u32,
    symbol: usize,
}

impl TxPosition {
    fn advance(&mut self) {
        self.symbol += 1;
        if self.symbol >= SUBFRAME_LEN {
            self.symbol = 0;
            self.subframe = (self.subframe + 1) % FRAME_LEN;
        }
    }
}

/// User-side PHY slot state machine
pub struct PhyUe {
    config: PhyConfig,
    sync: Box<dyn FrameSynchronizer>,
    framegen: Box<dyn FrameGenerator>,
    schedule: RxSchedule,
    rx_grid: Arc<Mutex<RxGrid>>,
    tx_grid: TxResourceGrid,
    assignments: SlotAssignmentTable,
    mac_interface: Option<Arc<dyn MacPhyInterface>>,
    slot_jobs: Option<Sender<RxSlotJob>>,
    /// Received samples not yet matched against the sync sequence
    search_buf: Vec<Complex32>,
    rx_subframe: u32,
    rx_symbol: usize,
    /// Samples of the current symbol already handed to the synchronizer
    rx_sample_phase: usize,
    tx: Option<TxPosition>,
    prev_cfo: f32,
    scheduled_parity: SubframeParity,
    pending_schedule: Option<u32>,
    /// Samples searched since the periodic sync drop
    reacquire_samples: Option<usize>,
    sync_lost: bool,
    /// Random-access id, kept for the whole procedure
    rach_user_id: Option<UserId>,
    rach_attempts: u32,
    stats: PhyStats,
}

impl PhyUe {
    /// Create a new PHY around a symbol-level modem
    pub fn new(
        config: PhyConfig,
        sync: Box<dyn FrameSynchronizer>,
        framegen: Box<dyn FrameGenerator>,
    ) -> Result<Self, LayerError> {
        config.validate()?;
        Ok(Self {
            config,
            sync,
            framegen,
            schedule: RxSchedule::new(),
            rx_grid: Arc::new(Mutex::new(RxGrid::new())),
            tx_grid: TxResourceGrid::new(),
            assignments: SlotAssignmentTable::new(),
            mac_interface: None,
            slot_jobs: None,
            search_buf: Vec::with_capacity(SEARCH_HISTORY * 2),
            rx_subframe: 0,
            rx_symbol: 0,
            rx_sample_phase: 0,
            tx: None,
            prev_cfo: 0.0,
            scheduled_parity: SubframeParity::Even,
            pending_schedule: None,
            reacquire_samples: None,
            sync_lost: false,
            rach_user_id: None,
            rach_attempts: 0,
            stats: PhyStats::default(),
        })
    }

    /// Create a PHY with the OFDM frame generator and synchronizer
    pub fn with_ofdm(config: PhyConfig) -> Result<Self, LayerError> {
        Self::new(config, Box::new(OfdmFrameSync::new()), Box::new(OfdmFrameGen::new()))
    }

    /// Set MAC-PHY interface
    pub fn set_mac_interface(&mut self, mac_interface: Arc<dyn MacPhyInterface>) {
        self.mac_interface = Some(mac_interface);
        info!("MAC-PHY interface set");
    }

    /// Offload downlink slot decode to a worker
    pub fn set_slot_worker(&mut self, jobs: Sender<RxSlotJob>) {
        self.slot_jobs = Some(jobs);
        info!("Slot decode offload enabled");
    }

    /// Shared receive grid, for the slot-decode worker
    pub fn rx_grid(&self) -> Arc<Mutex<RxGrid>> {
        self.rx_grid.clone()
    }

    pub fn is_synced(&self) -> bool {
        self.sync.is_synced()
    }

    pub fn cfo(&self) -> f32 {
        self.sync.cfo()
    }

    /// `SyncLost` once re-acquisition after the periodic sync drop has failed
    /// for a whole subframe, until sync is found again
    pub fn sync_status(&self) -> Result<(), LayerError> {
        if self.sync_lost {
            Err(LayerError::SyncLost)
        } else {
            Ok(())
        }
    }

    /// Receive phase of the symbol currently being received
    pub fn rx_phase(&self) -> RxPhase {
        if self.sync.is_synced() {
            self.schedule.phase_of(self.rx_symbol)
        } else {
            RxPhase::Acquiring
        }
    }

    /// (subframe, symbol) of the next received symbol
    pub fn rx_position(&self) -> (u32, usize) {
        (self.rx_subframe, self.rx_symbol)
    }

    /// (subframe, symbol) of the next transmitted symbol, once the transmit
    /// timeline has been started by the first acquisition
    pub fn tx_position(&self) -> Option<(u32, usize)> {
        self.tx.map(|tx| (tx.subframe, tx.symbol))
    }

    pub fn stats(&self) -> &PhyStats {
        &self.stats
    }

    /// Assignments decoded for the subframes of `parity`
    pub fn assignments(&self, parity: SubframeParity) -> SlotAssignments {
        self.assignments.read(parity)
    }

    pub fn tx_allocation(&self, parity: SubframeParity, symbol: usize) -> SymbolAllocation {
        self.tx_grid.allocation(parity, symbol)
    }

    /// Process a block of received samples of any length
    pub fn do_rx(&mut self, samples: &[Complex32]) {
        let mut offset = 0;
        while offset < samples.len() {
            if self.sync.is_synced() {
                offset += self.feed_synced(&samples[offset..]);
            } else {
                self.search(&samples[offset..]);
                offset = samples.len();
            }
        }
    }

    /// Look for the sync sequence; the history of previous blocks is kept so a
    /// sequence split across blocks is still found
    fn search(&mut self, block: &[Complex32]) {
        self.search_buf.extend_from_slice(block);
        loop {
            let Some(start) = self.sync.find_data_start(&self.search_buf) else {
                let excess = self.search_buf.len().saturating_sub(SEARCH_HISTORY);
                self.search_buf.drain(..excess);
                self.track_reacquisition(block.len());
                return;
            };

            let rest = self.search_buf.split_off(start);
            self.search_buf.clear();
            self.initial_sync();

            let used = self.feed_synced(&rest);
            if used == rest.len() {
                return;
            }
            self.search_buf.extend_from_slice(&rest[used..]);
        }
    }

    /// Feed samples symbol by symbol until they run out or sync is dropped
    fn feed_synced(&mut self, samples: &[Complex32]) -> usize {
        let mut used = 0;
        while used < samples.len() && self.sync.is_synced() {
            let n = (SYMBOL_LEN - self.rx_sample_phase).min(samples.len() - used);
            let pilots = is_pilot_symbol(self.rx_symbol);
            let symbols = self.sync.execute(&samples[used..used + n], pilots);
            used += n;
            self.rx_sample_phase = (self.rx_sample_phase + n) % SYMBOL_LEN;

            for symbol in symbols {
                self.on_rx_symbol(&symbol);
            }
        }
        used
    }

    fn track_reacquisition(&mut self, searched: usize) {
        let Some(samples) = self.reacquire_samples.as_mut() else {
            return;
        };
        *samples += searched;
        if *samples > REACQUIRE_WINDOW && !self.sync_lost {
            self.sync_lost = true;
            self.stats.sync_losses += 1;
            warn!("{} after {} samples without re-acquisition", LayerError::SyncLost, samples);
        }
    }

    fn initial_sync(&mut self) {
        self.stats.sync_acquisitions += 1;
        self.reacquire_samples = None;
        if self.sync_lost {
            self.sync_lost = false;
            info!("Sync recovered");
        }
        // The first post-sync subframe carries one extra guard symbol
        self.rx_symbol = SUBFRAME_LEN - 1;
        self.rx_subframe = 0;
        self.rx_sample_phase = 0;

        let estimate = self.sync.cfo();
        match self.tx {
            None => {
                let symbol = self.config.tx_initial_symbol();
                self.tx = Some(TxPosition { subframe: 0, symbol });
                self.prev_cfo = estimate;
                info!("Acquired sync, cfo {:.5} rad/sample, tx timeline at symbol {}", estimate, symbol);
            }
            Some(_) => {
                let a = self.config.cfo_filter;
                let filtered = (1.0 - a) * self.prev_cfo + a * estimate;
                self.sync.set_cfo(filtered);
                self.prev_cfo = filtered;
                debug!("Re-acquired sync, cfo estimate {:.5}, filtered {:.5}", estimate, filtered);
            }
        }
    }

    fn on_rx_symbol(&mut self, symbol: &[Complex32]) {
        let parity = SubframeParity::of(self.rx_subframe);
        self.rx_grid.lock().store_symbol(parity, self.rx_symbol, symbol);
        self.stats.symbols_received += 1;
        self.rx_symbol += 1;

        match self.schedule.boundary_at(self.rx_symbol) {
            Some(RxBoundary::ControlComplete) => self.process_control_slot(parity),
            Some(RxBoundary::DataSlotComplete(slot)) => self.dispatch_data_slot(slot, parity),
            None => {}
        }

        if self.schedule.is_resync_point(self.rx_subframe, self.rx_symbol) {
            trace!("Dropping sync for periodic re-acquisition");
            self.prev_cfo = self.sync.cfo();
            self.sync.reset();
            self.rx_sample_phase = 0;
            self.reacquire_samples = Some(0);
            return;
        }

        if self.rx_symbol >= SUBFRAME_LEN {
            self.rx_symbol = 0;
            self.rx_subframe = (self.rx_subframe + 1) % FRAME_LEN;
        }
    }

    fn dispatch_data_slot(&mut self, slot: usize, parity: SubframeParity) {
        if !self.assignments.read(parity).dl_data[slot] {
            trace!("Downlink slot {} not assigned", slot);
            return;
        }
        let Some(mac) = self.mac_interface.clone() else {
            return;
        };

        if let Some(jobs) = &self.slot_jobs {
            match jobs.try_send(RxSlotJob { slot, parity }) {
                Ok(()) => {
                    self.stats.slots_offloaded += 1;
                    return;
                }
                Err(TrySendError::Full(_)) => {
                    self.stats.worker_drops += 1;
                    warn!("Slot decode queue full, dropping downlink slot {}", slot);
                    return;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("Slot decode worker gone, decoding inline");
                    self.slot_jobs = None;
                }
            }
        }

        match worker::decode_dl_slot(&self.rx_grid, parity, slot, mac.dl_mcs()) {
            Ok(channel) => {
                self.stats.slots_decoded += 1;
                mac.receive_channel(channel);
            }
            Err(e) => warn!("Decoding downlink slot {} failed: {}", slot, e),
        }
    }

    /// Subframe whose assignments were decoded since the last call, if any;
    /// the caller runs the scheduler for it
    pub fn take_schedule_request(&mut self) -> Option<u32> {
        self.pending_schedule.take()
    }

    /// Clear the transmit grid for `subframe` and direct slot mappings to it
    pub fn begin_subframe(&mut self, subframe: u32) {
        let parity = SubframeParity::of(subframe);
        self.tx_grid.clear(parity);
        self.scheduled_parity = parity;
    }

    /// Produce the next `SYMBOL_LEN` transmit samples
    pub fn write_symbol(&mut self, out: &mut [Complex32]) {
        out.fill(Complex32::new(0.0, 0.0));
        let Some(position) = self.tx else {
            return;
        };
        if let Some(tx) = self.tx.as_mut() {
            tx.advance();
        }

        let parity = SubframeParity::of(position.subframe);
        let associated = self.mac_interface.as_ref().is_some_and(|mac| mac.is_associated());
        if associated {
            if self.rach_user_id.take().is_some() {
                self.rach_attempts = 0;
            }
            if self.tx_grid.is_data(parity, position.symbol) {
                let freq = self.tx_grid.symbol(parity, position.symbol);
                self.framegen.write_symbol(&freq, is_pilot_symbol(position.symbol), out);
                self.stats.symbols_transmitted += 1;
            }
        } else if position.subframe == 0 {
            self.write_rach_symbol(position.symbol, out);
        }

        // A mapping is sent once; the next subframe of this parity starts silent
        if position.symbol == SUBFRAME_LEN - 1 {
            self.tx_grid.clear(parity);
        }
    }

    /// Random-access burst: S0, S0, S1, then the request
    fn write_rach_symbol(&mut self, symbol: usize, out: &mut [Complex32]) {
        match symbol.checked_sub(RACH_FIRST_SYMBOL) {
            Some(0) => {
                self.framegen.reset();
                self.framegen.write_sync_short(out);
            }
            Some(1) => self.framegen.write_sync_short(out),
            Some(2) => self.framegen.write_sync_long(out),
            Some(3) => {
                if let Err(e) = self.write_rach_request(symbol, out) {
                    warn!("RACH request not sent: {}", e);
                    return;
                }
            }
            _ => return,
        }
        self.stats.symbols_transmitted += 1;
    }

    fn write_rach_request(&mut self, symbol: usize, out: &mut [Complex32]) -> Result<(), LayerError> {
        let rach_id = *self
            .rach_user_id
            .get_or_insert_with(|| UserId(rand::thread_rng().gen_range(1..=UserId::MAX)));
        // The request carries the number of earlier attempts
        let previous = self.rach_attempts;
        self.rach_attempts = self.rach_attempts.saturating_add(1);

        let tbs = transport_block_size(CONTROL_MCS, SlotClass::UlControl)?;
        let payload_len = tbs - CrcWidth::Crc8.bytes();
        let mut block = vec![0u8; tbs];
        block[0] = rach_id.value();
        block[1] = previous as u8;
        block[payload_len] = crc8(&block[..payload_len]);

        let scheme = mcs_scheme(CONTROL_MCS)?;
        let units = encode_transport_block(&block, scheme, false);
        let mut freq = vec![Complex32::new(0.0, 0.0); NFFT];
        for (k, unit) in data_subcarriers().zip(units) {
            freq[k] = scheme.modulation.modulate(unit);
        }
        self.framegen.write_symbol(&freq, is_pilot_symbol(symbol), out);

        self.stats.rach_attempts += 1;
        debug!("RACH attempt {} with rach id {}", self.rach_attempts, rach_id.value());
        if let Some(mac) = &self.mac_interface {
            mac.rach_attempt(rach_id, u8::try_from(self.rach_attempts).unwrap_or(u8::MAX));
        }
        Ok(())
    }
}
