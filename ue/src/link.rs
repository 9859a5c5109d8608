//! Sample-Clocked Link Loop
//!
//! Pulls received blocks from the radio, runs them through the PHY, lets the
//! MAC schedule whenever a control slot has been decoded, and emits one
//! transmit symbol for every received symbol's worth of samples.

use anyhow::{Context, Result};
use interfaces::RadioPlatform;
use layers::mac::MacHandle;
use layers::phy::frame_structure::SYMBOL_LEN;
use layers::phy::{PhyStats, PhyUe};
use num_complex::Complex32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Samples requested from the radio per receive call
pub const RX_BLOCK_LEN: usize = 16 * SYMBOL_LEN;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Loop limits
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    /// Stop after this many receive blocks
    pub max_buffers: Option<u64>,
}

/// Final counters of a link run
#[derive(Debug, Clone, Default)]
pub struct LinkSummary {
    pub buffers: u64,
    pub rx_samples: u64,
    pub tx_symbols: u64,
    pub phy: PhyStats,
}

/// Run until end of input, `max_buffers`, or `running` is cleared
pub fn run_link(
    radio: &mut dyn RadioPlatform,
    phy: &mut PhyUe,
    mac: &MacHandle,
    options: &LinkOptions,
    running: &AtomicBool,
) -> Result<LinkSummary> {
    let mut rx = vec![Complex32::new(0.0, 0.0); RX_BLOCK_LEN];
    let mut symbol = vec![Complex32::new(0.0, 0.0); SYMBOL_LEN];
    let tx_capacity = radio.config().tx_buffer_len;
    if tx_capacity < SYMBOL_LEN {
        anyhow::bail!("transmit buffer of {} samples cannot hold a symbol", tx_capacity);
    }

    let mut summary = LinkSummary::default();
    let mut tx_credit = 0usize;
    let mut tx_offset = 0usize;
    let mut last_report = Instant::now();

    while running.load(Ordering::Relaxed) {
        if options.max_buffers.is_some_and(|max| summary.buffers >= max) {
            info!("Reached buffer limit of {}", summary.buffers);
            break;
        }

        let n = radio.receive(&mut rx).context("receiving samples")?;
        if n == 0 {
            info!("End of receive stream");
            break;
        }
        summary.buffers += 1;
        summary.rx_samples += n as u64;

        phy.do_rx(&rx[..n]);
        while let Some(subframe) = phy.take_schedule_request() {
            phy.begin_subframe(subframe);
            if let Err(e) = mac.run(phy) {
                warn!("Scheduling for subframe {} failed: {}", subframe, e);
            }
        }

        tx_credit += n;
        while tx_credit >= SYMBOL_LEN {
            tx_credit -= SYMBOL_LEN;
            phy.write_symbol(&mut symbol);
            radio.prepare_transmit(&symbol, tx_offset).context("staging transmit symbol")?;
            summary.tx_symbols += 1;
            tx_offset += SYMBOL_LEN;
            if tx_offset + SYMBOL_LEN > tx_capacity {
                radio.push_transmit().context("pushing transmit buffer")?;
                tx_offset = 0;
            }
        }

        if last_report.elapsed() >= STATS_INTERVAL {
            report(phy, mac);
            last_report = Instant::now();
        }
    }

    if tx_offset > 0 {
        radio.push_transmit().context("pushing final transmit buffer")?;
    }
    summary.phy = phy.stats().clone();
    debug!("Link loop finished: {:?}", summary);
    Ok(summary)
}

fn report(phy: &PhyUe, mac: &MacHandle) {
    let stats = phy.stats();
    let (subframe, symbol) = phy.rx_position();
    info!("PHY Statistics:");
    info!("  Synced: {}, CFO: {:.5}, Position: {}/{}", phy.is_synced(), phy.cfo(), subframe, symbol);
    info!(
        "  Acquisitions: {}, Sync losses: {}, Control CRC failures: {}",
        stats.sync_acquisitions, stats.sync_losses, stats.control_crc_failures
    );
    if let Err(e) = phy.sync_status() {
        warn!("  {}", e);
    }
    info!(
        "  Slots decoded: {}, offloaded: {}, worker drops: {}",
        stats.slots_decoded, stats.slots_offloaded, stats.worker_drops
    );

    let mac = mac.lock();
    let mac_stats = mac.stats();
    info!("MAC Statistics:");
    info!("  State: {:?}, User: {:?}", mac.state(), mac.user_id());
    info!(
        "  Channels received: {}, dropped: {}, frames delivered: {}",
        mac_stats.channels_received, mac_stats.channels_dropped, mac_stats.frames_delivered
    );
}
