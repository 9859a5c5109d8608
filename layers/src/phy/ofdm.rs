//! OFDM Frame Generation and Synchronization
//!
//! The PHY state machine talks to the symbol-level modem through the
//! `FrameGenerator` and `FrameSynchronizer` traits. The implementations here
//! use rustfft with a unitary scaling so a generated symbol demodulates back
//! to its subcarrier values.

use super::frame_structure::{
    data_subcarriers, pilot_subcarriers, subcarrier_type, SubcarrierType, CP_LEN, NFFT, SYMBOL_LEN,
};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::{debug, trace};

/// Minimum normalized correlation accepted as a long-sync hit
const SYNC_THRESHOLD: f32 = 0.6;

/// Value transmitted on every pilot subcarrier
const PILOT_VALUE: Complex32 = Complex32::new(1.0, 0.0);

/// Symbol-level transmitter
pub trait FrameGenerator: Send {
    /// Restart per-burst state; called at the start of every random-access burst
    fn reset(&mut self);

    /// Short sync symbol (S0); sent twice back to back
    fn write_sync_short(&mut self, out: &mut [Complex32]);

    /// Long sync symbol (S1)
    fn write_sync_long(&mut self, out: &mut [Complex32]);

    /// Modulate one frequency-domain symbol into `SYMBOL_LEN` samples
    fn write_symbol(&mut self, freq: &[Complex32], pilots: bool, out: &mut [Complex32]);
}

/// Symbol-level receiver
pub trait FrameSynchronizer: Send {
    /// Search for the sync sequence; on a hit returns the offset of the first
    /// sample after it and enters the synced state
    fn find_data_start(&mut self, samples: &[Complex32]) -> Option<usize>;

    /// Consume samples while synced, returning every completed
    /// frequency-domain symbol
    fn execute(&mut self, samples: &[Complex32], pilots: bool) -> Vec<Vec<Complex32>>;

    fn is_synced(&self) -> bool;

    /// Carrier frequency offset in radians per sample
    fn cfo(&self) -> f32;

    fn set_cfo(&mut self, cfo: f32);

    /// Drop sync and any buffered samples
    fn reset(&mut self);
}

/// Deterministic +/-1 sequence from a 7-bit LFSR
fn pn_signs(seed: u8, len: usize) -> Vec<f32> {
    let mut state = seed & 0x7F;
    (0..len)
        .map(|_| {
            let feedback = ((state >> 6) ^ (state >> 5)) & 1;
            state = ((state << 1) | feedback) & 0x7F;
            if feedback == 0 { 1.0 } else { -1.0 }
        })
        .collect()
}

/// Frequency-domain S0: non-null even bins only, so the time signal repeats
/// every NFFT/2 samples
pub fn sync_short_sequence() -> Vec<Complex32> {
    let signs = pn_signs(0x35, NFFT);
    (0..NFFT)
        .map(|k| {
            if k % 2 == 0 && subcarrier_type(k) != SubcarrierType::Null {
                Complex32::new(signs[k] * std::f32::consts::SQRT_2, 0.0)
            } else {
                Complex32::new(0.0, 0.0)
            }
        })
        .collect()
}

/// Frequency-domain S1 over every non-null bin
pub fn sync_long_sequence() -> Vec<Complex32> {
    let signs = pn_signs(0x4B, NFFT);
    (0..NFFT)
        .map(|k| {
            if subcarrier_type(k) != SubcarrierType::Null {
                Complex32::new(signs[k], 0.0)
            } else {
                Complex32::new(0.0, 0.0)
            }
        })
        .collect()
}

struct OfdmTransform {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scale: f32,
}

impl OfdmTransform {
    fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(NFFT),
            ifft: planner.plan_fft_inverse(NFFT),
            scale: 1.0 / (NFFT as f32).sqrt(),
        }
    }

    /// IFFT plus cyclic prefix
    fn to_time(&self, freq: &[Complex32], out: &mut [Complex32]) {
        let mut buf = freq.to_vec();
        buf.resize(NFFT, Complex32::new(0.0, 0.0));
        self.ifft.process(&mut buf);
        for s in buf.iter_mut() {
            *s *= self.scale;
        }
        out[..CP_LEN].copy_from_slice(&buf[NFFT - CP_LEN..]);
        out[CP_LEN..SYMBOL_LEN].copy_from_slice(&buf);
    }

    /// Drop the cyclic prefix and FFT
    fn to_freq(&self, symbol: &[Complex32]) -> Vec<Complex32> {
        let mut buf = symbol[CP_LEN..SYMBOL_LEN].to_vec();
        self.fft.process(&mut buf);
        for s in buf.iter_mut() {
            *s *= self.scale;
        }
        buf
    }
}

/// OFDM frame generator
pub struct OfdmFrameGen {
    transform: OfdmTransform,
    sync_short: Vec<Complex32>,
    sync_long: Vec<Complex32>,
}

impl OfdmFrameGen {
    pub fn new() -> Self {
        let transform = OfdmTransform::new();
        let mut sync_short = vec![Complex32::new(0.0, 0.0); SYMBOL_LEN];
        let mut sync_long = vec![Complex32::new(0.0, 0.0); SYMBOL_LEN];
        transform.to_time(&sync_short_sequence(), &mut sync_short);
        transform.to_time(&sync_long_sequence(), &mut sync_long);
        Self { transform, sync_short, sync_long }
    }
}

impl Default for OfdmFrameGen {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGenerator for OfdmFrameGen {
    /// Nothing to restart: every pilot symbol carries `PILOT_VALUE`, which the
    /// synchronizer's phase correction relies on, so the generator is stateless
    fn reset(&mut self) {
        trace!("Frame generator reset");
    }

    fn write_sync_short(&mut self, out: &mut [Complex32]) {
        out[..SYMBOL_LEN].copy_from_slice(&self.sync_short);
    }

    fn write_sync_long(&mut self, out: &mut [Complex32]) {
        out[..SYMBOL_LEN].copy_from_slice(&self.sync_long);
    }

    fn write_symbol(&mut self, freq: &[Complex32], pilots: bool, out: &mut [Complex32]) {
        let mut shaped = vec![Complex32::new(0.0, 0.0); NFFT];
        for k in data_subcarriers() {
            shaped[k] = freq.get(k).copied().unwrap_or_default();
        }
        if pilots {
            for k in pilot_subcarriers() {
                shaped[k] = PILOT_VALUE;
            }
        }
        self.transform.to_time(&shaped, out);
    }
}

/// OFDM frame synchronizer
pub struct OfdmFrameSync {
    transform: OfdmTransform,
    sync_long: Vec<Complex32>,
    sync_long_energy: f32,
    synced: bool,
    cfo: f32,
    phase: f32,
    pending: Vec<Complex32>,
}

impl OfdmFrameSync {
    pub fn new() -> Self {
        let transform = OfdmTransform::new();
        let mut sync_long = vec![Complex32::new(0.0, 0.0); SYMBOL_LEN];
        transform.to_time(&sync_long_sequence(), &mut sync_long);
        let sync_long_energy = sync_long.iter().map(|s| s.norm_sqr()).sum();
        Self {
            transform,
            sync_long,
            sync_long_energy,
            synced: false,
            cfo: 0.0,
            phase: 0.0,
            pending: Vec::with_capacity(SYMBOL_LEN),
        }
    }

    /// Phase drift between the two identical short sync symbols
    fn estimate_cfo(samples: &[Complex32], long_start: usize) -> Option<f32> {
        let first = long_start.checked_sub(2 * SYMBOL_LEN)?;
        let acc: Complex32 = (0..SYMBOL_LEN)
            .map(|n| samples[first + n].conj() * samples[first + SYMBOL_LEN + n])
            .sum();
        if acc.norm() < 1e-9 {
            return None;
        }
        Some(acc.arg() / SYMBOL_LEN as f32)
    }

    /// Rotate out the common phase error measured on the pilot subcarriers
    fn correct_common_phase(symbol: &mut [Complex32]) {
        let acc: Complex32 = pilot_subcarriers().map(|k| symbol[k] * PILOT_VALUE.conj()).sum();
        if acc.norm() < 1e-9 {
            return;
        }
        let correction = Complex32::from_polar(1.0, -acc.arg());
        for s in symbol.iter_mut() {
            *s *= correction;
        }
    }
}

impl Default for OfdmFrameSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSynchronizer for OfdmFrameSync {
    fn find_data_start(&mut self, samples: &[Complex32]) -> Option<usize> {
        if samples.len() < SYMBOL_LEN {
            return None;
        }

        let mut best: Option<(usize, f32)> = None;
        for start in 0..=samples.len() - SYMBOL_LEN {
            let window = &samples[start..start + SYMBOL_LEN];
            let energy: f32 = window.iter().map(|s| s.norm_sqr()).sum();
            if energy < 1e-9 {
                continue;
            }
            let corr: Complex32 = self
                .sync_long
                .iter()
                .zip(window)
                .map(|(t, x)| t.conj() * x)
                .sum();
            let metric = corr.norm_sqr() / (self.sync_long_energy * energy);
            if metric >= SYNC_THRESHOLD && best.map_or(true, |(_, m)| metric > m) {
                best = Some((start, metric));
            }
        }

        let (start, metric) = best?;
        if let Some(cfo) = Self::estimate_cfo(samples, start) {
            self.cfo = cfo;
        }
        self.synced = true;
        self.phase = 0.0;
        self.pending.clear();
        debug!("Long sync at sample {} (metric {:.3}, cfo {:.5})", start, metric, self.cfo);
        Some(start + SYMBOL_LEN)
    }

    fn execute(&mut self, samples: &[Complex32], pilots: bool) -> Vec<Vec<Complex32>> {
        let mut symbols = Vec::new();
        if !self.synced {
            return symbols;
        }

        for &sample in samples {
            let rotation = Complex32::from_polar(1.0, -self.phase);
            self.phase = (self.phase + self.cfo) % std::f32::consts::TAU;
            self.pending.push(sample * rotation);

            if self.pending.len() == SYMBOL_LEN {
                let mut symbol = self.transform.to_freq(&self.pending);
                if pilots {
                    Self::correct_common_phase(&mut symbol);
                }
                symbols.push(symbol);
                self.pending.clear();
            }
        }
        symbols
    }

    fn is_synced(&self) -> bool {
        self.synced
    }

    fn cfo(&self) -> f32 {
        self.cfo
    }

    fn set_cfo(&mut self, cfo: f32) {
        self.cfo = cfo;
    }

    fn reset(&mut self) {
        self.synced = false;
        self.phase = 0.0;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeros(n: usize) -> Vec<Complex32> {
        vec![Complex32::new(0.0, 0.0); n]
    }

    fn preamble(gen: &mut OfdmFrameGen) -> Vec<Complex32> {
        let mut out = zeros(3 * SYMBOL_LEN);
        gen.write_sync_short(&mut out[..SYMBOL_LEN]);
        gen.write_sync_short(&mut out[SYMBOL_LEN..2 * SYMBOL_LEN]);
        gen.write_sync_long(&mut out[2 * SYMBOL_LEN..]);
        out
    }

    fn test_symbol() -> Vec<Complex32> {
        let mut freq = zeros(NFFT);
        for (i, k) in data_subcarriers().enumerate() {
            freq[k] = if i % 3 == 0 { Complex32::new(0.7, -0.7) } else { Complex32::new(-0.7, 0.7) };
        }
        freq
    }

    #[test]
    fn test_pilot_symbols_unchanged_by_reset() {
        let mut gen = OfdmFrameGen::new();
        let mut first = zeros(SYMBOL_LEN);
        let mut second = zeros(SYMBOL_LEN);
        gen.write_symbol(&test_symbol(), true, &mut first);
        gen.write_symbol(&test_symbol(), true, &mut second);
        assert_eq!(first, second);

        gen.reset();
        gen.write_symbol(&test_symbol(), true, &mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn test_short_sync_is_half_periodic() {
        let mut gen = OfdmFrameGen::new();
        let mut s0 = zeros(SYMBOL_LEN);
        gen.write_sync_short(&mut s0);
        for n in CP_LEN..CP_LEN + NFFT / 2 {
            assert!((s0[n] - s0[n + NFFT / 2]).norm() < 1e-4);
        }
    }

    #[test]
    fn test_sync_and_demodulate() {
        let mut gen = OfdmFrameGen::new();
        let mut samples = zeros(100);
        samples.extend(preamble(&mut gen));
        let data_start = samples.len();
        let freq = test_symbol();
        let mut symbol = zeros(SYMBOL_LEN);
        gen.write_symbol(&freq, true, &mut symbol);
        samples.extend_from_slice(&symbol);

        let mut sync = OfdmFrameSync::new();
        assert_eq!(sync.find_data_start(&samples), Some(data_start));
        assert!(sync.is_synced());
        assert!(sync.cfo().abs() < 1e-4);

        // Feed in two parts to exercise the carry-over
        let (a, b) = samples[data_start..].split_at(30);
        assert!(sync.execute(a, true).is_empty());
        let out = sync.execute(b, true);
        assert_eq!(out.len(), 1);
        for k in data_subcarriers() {
            assert!((out[0][k] - freq[k]).norm() < 1e-3);
        }
        for k in pilot_subcarriers() {
            assert!((out[0][k] - PILOT_VALUE).norm() < 1e-3);
        }
    }

    #[test]
    fn test_cfo_estimate() {
        let mut gen = OfdmFrameGen::new();
        let cfo = 0.002f32;
        let mut samples = zeros(50);
        samples.extend(preamble(&mut gen));
        let rotated: Vec<Complex32> = samples
            .iter()
            .enumerate()
            .map(|(n, s)| s * Complex32::from_polar(1.0, cfo * n as f32))
            .collect();

        let mut sync = OfdmFrameSync::new();
        assert!(sync.find_data_start(&rotated).is_some());
        assert!((sync.cfo() - cfo).abs() < 1e-4);
    }

    #[test]
    fn test_no_sync_in_noise_free_silence() {
        let mut sync = OfdmFrameSync::new();
        assert_eq!(sync.find_data_start(&zeros(1000)), None);
        assert!(!sync.is_synced());
        assert!(sync.execute(&zeros(SYMBOL_LEN), false).is_empty());
    }

    #[test]
    fn test_reset_drops_sync() {
        let mut gen = OfdmFrameGen::new();
        let samples = preamble(&mut gen);
        let mut sync = OfdmFrameSync::new();
        sync.find_data_start(&samples).unwrap();
        sync.set_cfo(0.01);
        sync.reset();
        assert!(!sync.is_synced());
        assert_eq!(sync.cfo(), 0.01);
    }
}
