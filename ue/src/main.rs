//! HNAP User Equipment
//!
//! Runs the user-side link layer against a radio platform: the PHY slot state
//! machine, the MAC scheduler and an optional slot-decode worker.

mod config;
mod link;

use anyhow::{Context, Result};
use clap::Parser;
use common::utils::bytes_to_hex;
use crossbeam_channel::unbounded;
use interfaces::{FileRadio, RadioPlatform};
use layers::mac::{DataFrame, MacHandle, MacPhyInterface, MacUe};
use layers::phy::{PhyUe, SlotDecodeWorker};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use config::UeConfig;
use link::{run_link, LinkOptions};

/// HNAP user equipment
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Received IQ file (interleaved little-endian f32)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Transmitted IQ file (interleaved little-endian f32)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Decode downlink slots on the receive thread
    #[arg(long)]
    no_worker: bool,

    /// Stop after this many receive buffers
    #[arg(long)]
    max_buffers: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting HNAP UE");

    let mut config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path.display());
            UeConfig::from_toml_file(path)?
        }
        None => UeConfig::default(),
    };
    if let Some(input) = args.input {
        config.radio.input = Some(input);
    }
    if let Some(output) = args.output {
        config.radio.output = Some(output);
    }
    if args.no_worker {
        config.phy.slot_worker = false;
    }

    info!("Radio configuration:");
    info!("  Sample rate: {} MHz", config.radio.sample_rate / 1e6);
    info!("  RX frequency: {} MHz", config.radio.rx_frequency / 1e6);
    info!("  TX frequency: {} MHz", config.radio.tx_frequency / 1e6);
    info!("  Duplex: {:?}", config.radio.duplex);

    let radio = FileRadio::open(config.radio.clone()).context("opening file radio")?;

    // Upper layer: log reassembled downlink frames
    let (frame_tx, frame_rx) = unbounded::<DataFrame>();
    let upper_layer = std::thread::Builder::new()
        .name("upper-layer".to_string())
        .spawn(move || {
            for frame in frame_rx.iter() {
                info!("Received frame of {} bytes", frame.len());
                debug!("Frame: {}", bytes_to_hex(frame.data()));
            }
        })
        .context("spawning upper-layer thread")?;

    let mac = MacHandle::new(MacUe::new(config.mac.to_mac_config(), Some(frame_tx))?);
    info!("MAC layer initialized");

    let mut phy = PhyUe::with_ofdm(config.phy.link.clone())?;
    let mac_interface: Arc<dyn MacPhyInterface> = Arc::new(mac.clone());
    phy.set_mac_interface(mac_interface.clone());

    let worker = if config.phy.slot_worker {
        let worker = SlotDecodeWorker::spawn(phy.rx_grid(), mac_interface, config.phy.worker_queue_depth)
            .context("spawning slot-decode worker")?;
        phy.set_slot_worker(worker.sender());
        Some(worker)
    } else {
        drop(mac_interface);
        None
    };
    info!("PHY layer initialized (slot worker: {})", worker.is_some());

    let running = Arc::new(AtomicBool::new(true));
    let options = LinkOptions { max_buffers: args.max_buffers };

    let mut link_handle = {
        let running = running.clone();
        let mac = mac.clone();
        tokio::task::spawn_blocking(move || {
            let mut radio = radio;
            let result = run_link(&mut radio, &mut phy, &mac, &options, &running);
            let radio_stats = radio.stats();
            // Release the PHY's job sender before the worker is joined
            drop(phy);
            (result, radio_stats)
        })
    };

    let joined = tokio::select! {
        joined = &mut link_handle => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            running.store(false, Ordering::Relaxed);
            link_handle.await
        }
    };
    let (result, radio_stats) = joined.context("link task failed")?;

    info!("Shutting down HNAP UE");
    if let Some(worker) = worker {
        worker.shutdown();
    }
    // Dropping the last MAC handle closes the upper-layer channel
    drop(mac);
    if upper_layer.join().is_err() {
        error!("Upper-layer thread panicked");
    }

    match result {
        Ok(summary) => {
            info!("Link loop finished after {} buffers", summary.buffers);
            info!("  RX samples: {}, TX symbols: {}", summary.rx_samples, summary.tx_symbols);
            info!("  TX samples: {}, TX overflows: {}", radio_stats.tx_samples, radio_stats.tx_overflows);
            info!("  PHY: {:?}", summary.phy);
        }
        Err(e) => {
            error!("Link loop error: {:#}", e);
            return Err(e);
        }
    }

    info!("HNAP UE shutdown complete");
    Ok(())
}
