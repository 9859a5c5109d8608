//! Slot Decode Worker
//!
//! Downlink data slots are too slow to decode inside the per-symbol receive
//! path. The PHY hands finished slots to a dedicated thread over a bounded
//! channel; the thread decodes them from the shared receive grid and passes
//! the channel to the MAC.

use super::frame_structure::dl_slot_symbols;
use super::mcs::{mcs_scheme, transport_block_size, SlotClass};
use super::resource_grid::RxGrid;
use super::slot_mapping::decode_transport_block;
use crate::mac::{LogicalChannel, MacPhyInterface};
use crate::LayerError;
use common::types::{CrcWidth, Mcs, SubframeParity};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// A received downlink slot waiting for decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxSlotJob {
    pub slot: usize,
    pub parity: SubframeParity,
}

/// Decode one downlink data slot from the receive grid into a CRC-16 channel.
///
/// The grid lock is held only while demodulating.
pub fn decode_dl_slot(
    grid: &Mutex<RxGrid>,
    parity: SubframeParity,
    slot: usize,
    mcs: Mcs,
) -> Result<LogicalChannel, LayerError> {
    let scheme = mcs_scheme(mcs)?;
    let tbs = transport_block_size(mcs, SlotClass::Data)?;
    let soft = grid.lock().demodulate_region(parity, dl_slot_symbols(slot), scheme.modulation);
    let block = decode_transport_block(&soft, tbs, scheme, true);
    LogicalChannel::from_received(block, CrcWidth::Crc16)
}

/// Handle to the decode thread
pub struct SlotDecodeWorker {
    sender: Sender<RxSlotJob>,
    handle: JoinHandle<()>,
}

impl SlotDecodeWorker {
    /// Spawn the worker with room for `depth` pending slots
    pub fn spawn(
        rx_grid: Arc<Mutex<RxGrid>>,
        mac: Arc<dyn MacPhyInterface>,
        depth: usize,
    ) -> io::Result<Self> {
        let (sender, receiver) = bounded::<RxSlotJob>(depth.max(1));

        let handle = thread::Builder::new()
            .name("slot-decode".to_string())
            .spawn(move || {
                info!("Slot decode worker started");
                for job in receiver.iter() {
                    match decode_dl_slot(&rx_grid, job.parity, job.slot, mac.dl_mcs()) {
                        Ok(channel) => mac.receive_channel(channel),
                        Err(e) => warn!("Decoding downlink slot {} failed: {}", job.slot, e),
                    }
                }
                debug!("Slot decode worker stopped");
            })?;

        Ok(Self { sender, handle })
    }

    /// Job queue handle for the receive path
    pub fn sender(&self) -> Sender<RxSlotJob> {
        self.sender.clone()
    }

    /// Close the queue and wait for queued jobs to finish.
    ///
    /// Every other sender (the PHY's) must be dropped first.
    pub fn shutdown(self) {
        drop(self.sender);
        if self.handle.join().is_err() {
            warn!("Slot decode worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacMessage;
    use crate::phy::assignments::SlotAssignments;
    use crate::phy::resource_grid::TxResourceGrid;
    use crate::phy::slot_mapping::encode_transport_block;
    use common::types::UserId;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectingMac {
        channels: Mutex<Vec<LogicalChannel>>,
    }

    impl MacPhyInterface for CollectingMac {
        fn set_assignments(&self, _assignments: SlotAssignments) {}
        fn receive_channel(&self, channel: LogicalChannel) {
            self.channels.lock().push(channel);
        }
        fn is_associated(&self) -> bool {
            true
        }
        fn user_id(&self) -> Option<UserId> {
            Some(UserId(1))
        }
        fn dl_mcs(&self) -> Mcs {
            Mcs(1)
        }
        fn rach_attempt(&self, _rach_user_id: UserId, _attempt: u8) {}
    }

    fn loaded_grid(slot: usize, mcs: Mcs) -> (RxGrid, LogicalChannel) {
        let tbs = transport_block_size(mcs, SlotClass::Data).unwrap();
        let mut channel = LogicalChannel::new(tbs - 2, CrcWidth::Crc16);
        channel.add_message(&MacMessage::dl_mcs_info(2)).unwrap();
        channel.calc_crc();

        let scheme = mcs_scheme(mcs).unwrap();
        let units = encode_transport_block(channel.as_bytes(), scheme, true);
        let mut tx = TxResourceGrid::new();
        tx.modulate_region(SubframeParity::Even, dl_slot_symbols(slot), scheme.modulation, &units);

        let mut rx = RxGrid::new();
        for symbol in dl_slot_symbols(slot) {
            rx.store_symbol(SubframeParity::Even, symbol, &tx.symbol(SubframeParity::Even, symbol));
        }
        (rx, channel)
    }

    #[test]
    fn test_decode_dl_slot() {
        let (rx, sent) = loaded_grid(3, Mcs(3));
        let received = decode_dl_slot(&Mutex::new(rx), SubframeParity::Even, 3, Mcs(3)).unwrap();
        assert!(received.verify_crc());
        assert_eq!(received.as_bytes(), sent.as_bytes());
    }

    #[test]
    fn test_worker_delivers_to_mac() {
        let (rx, sent) = loaded_grid(1, Mcs(1));
        let mac = Arc::new(CollectingMac::default());
        let worker = SlotDecodeWorker::spawn(Arc::new(Mutex::new(rx)), mac.clone(), 4).unwrap();

        worker.sender().send(RxSlotJob { slot: 1, parity: SubframeParity::Even }).unwrap();
        worker.shutdown();

        let channels = mac.channels.lock();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].as_bytes(), sent.as_bytes());
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let grid = Arc::new(Mutex::new(RxGrid::new()));
        let mac = Arc::new(CollectingMac::default());
        // Hold the grid so the worker stalls on its first job
        let guard = grid.lock();
        let worker = SlotDecodeWorker::spawn(grid.clone(), mac, 1).unwrap();
        let sender = worker.sender();

        let job = RxSlotJob { slot: 0, parity: SubframeParity::Odd };
        sender.send(job).unwrap();
        let mut rejected = false;
        for _ in 0..100 {
            if sender.try_send(job).is_err() {
                rejected = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(rejected);

        drop(guard);
        drop(sender);
        worker.shutdown();
    }
}
