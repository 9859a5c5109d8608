//! Resource Grids
//!
//! Frequency-domain buffers for one subframe per parity: the transmit grid
//! with its per-symbol allocation bitmap, and the receive grid the slot
//! decoders read from.

use super::frame_structure::{data_subcarriers, NFFT, SUBFRAME_LEN};
use super::mcs::Modulation;
use common::types::SubframeParity;
use ndarray::Array2;
use num_complex::Complex32;
use std::ops::RangeInclusive;
use tracing::warn;

/// Use of one transmit symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolAllocation {
    Silent,
    Data,
}

/// Transmit grid, [symbol, subcarrier] per parity
#[derive(Debug, Clone)]
pub struct TxResourceGrid {
    grids: [Array2<Complex32>; 2],
    allocation: [[SymbolAllocation; SUBFRAME_LEN]; 2],
}

impl TxResourceGrid {
    pub fn new() -> Self {
        Self {
            grids: [Array2::zeros((SUBFRAME_LEN, NFFT)), Array2::zeros((SUBFRAME_LEN, NFFT))],
            allocation: [[SymbolAllocation::Silent; SUBFRAME_LEN]; 2],
        }
    }

    /// Clear one parity before new slot mappings are written
    pub fn clear(&mut self, parity: SubframeParity) {
        self.grids[parity.index()].fill(Complex32::new(0.0, 0.0));
        self.allocation[parity.index()] = [SymbolAllocation::Silent; SUBFRAME_LEN];
    }

    /// Map resource element
    pub fn map_re(&mut self, parity: SubframeParity, symbol: usize, subcarrier: usize, value: Complex32) {
        if let Some(re) = self.grids[parity.index()].get_mut((symbol, subcarrier)) {
            *re = value;
        } else {
            warn!("Attempting to map RE outside grid: symbol {}, subcarrier {}", symbol, subcarrier);
        }
    }

    pub fn mark_data(&mut self, parity: SubframeParity, symbol: usize) {
        if symbol < SUBFRAME_LEN {
            self.allocation[parity.index()][symbol] = SymbolAllocation::Data;
        }
    }

    pub fn allocation(&self, parity: SubframeParity, symbol: usize) -> SymbolAllocation {
        self.allocation[parity.index()]
            .get(symbol)
            .copied()
            .unwrap_or(SymbolAllocation::Silent)
    }

    pub fn is_data(&self, parity: SubframeParity, symbol: usize) -> bool {
        self.allocation(parity, symbol) == SymbolAllocation::Data
    }

    /// Get symbol data
    pub fn symbol(&self, parity: SubframeParity, symbol: usize) -> Vec<Complex32> {
        self.grids[parity.index()].row(symbol).to_vec()
    }

    /// Modulate code units onto the data subcarriers of a symbol range and
    /// mark those symbols as data; units beyond the region are ignored
    pub fn modulate_region(
        &mut self,
        parity: SubframeParity,
        symbols: RangeInclusive<usize>,
        modulation: Modulation,
        units: &[u8],
    ) {
        let mut units = units.iter();
        for symbol in symbols {
            for k in data_subcarriers() {
                let value = units
                    .next()
                    .map_or(Complex32::new(0.0, 0.0), |&u| modulation.modulate(u));
                self.map_re(parity, symbol, k, value);
            }
            self.mark_data(parity, symbol);
        }
    }
}

impl Default for TxResourceGrid {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive grid, [symbol, subcarrier] per parity
#[derive(Debug, Clone)]
pub struct RxGrid {
    grids: [Array2<Complex32>; 2],
}

impl RxGrid {
    pub fn new() -> Self {
        Self {
            grids: [Array2::zeros((SUBFRAME_LEN, NFFT)), Array2::zeros((SUBFRAME_LEN, NFFT))],
        }
    }

    pub fn store_symbol(&mut self, parity: SubframeParity, symbol: usize, values: &[Complex32]) {
        if symbol >= SUBFRAME_LEN || values.len() < NFFT {
            warn!("Dropping received symbol {} of {} bins", symbol, values.len());
            return;
        }
        let mut row = self.grids[parity.index()].row_mut(symbol);
        for (dst, src) in row.iter_mut().zip(values) {
            *dst = *src;
        }
    }

    pub fn get(&self, parity: SubframeParity, symbol: usize, subcarrier: usize) -> Complex32 {
        self.grids[parity.index()]
            .get((symbol, subcarrier))
            .copied()
            .unwrap_or_default()
    }

    /// Soft-demodulate the data subcarriers of a symbol range
    pub fn demodulate_region(
        &self,
        parity: SubframeParity,
        symbols: RangeInclusive<usize>,
        modulation: Modulation,
    ) -> Vec<u8> {
        let mut soft = Vec::new();
        for symbol in symbols {
            for k in data_subcarriers() {
                modulation.demodulate_soft(self.get(parity, symbol, k), &mut soft);
            }
        }
        soft
    }
}

impl Default for RxGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_resets_allocation_of_one_parity() {
        let mut grid = TxResourceGrid::new();
        grid.modulate_region(SubframeParity::Even, 3..=4, Modulation::Qpsk, &[1, 2, 3]);
        grid.modulate_region(SubframeParity::Odd, 3..=3, Modulation::Qpsk, &[1]);
        assert!(grid.is_data(SubframeParity::Even, 4));

        grid.clear(SubframeParity::Even);
        assert!(!grid.is_data(SubframeParity::Even, 3));
        assert!(!grid.is_data(SubframeParity::Even, 4));
        assert!(grid.symbol(SubframeParity::Even, 3).iter().all(|v| v.norm() == 0.0));
        assert!(grid.is_data(SubframeParity::Odd, 3));
    }

    #[test]
    fn test_rx_region_demodulates_tx_region() {
        let units: Vec<u8> = (0..96u8).map(|i| i % 4).collect();
        let mut tx = TxResourceGrid::new();
        tx.modulate_region(SubframeParity::Odd, 10..=11, Modulation::Qpsk, &units);

        let mut rx = RxGrid::new();
        for symbol in 10..=11 {
            rx.store_symbol(SubframeParity::Odd, symbol, &tx.symbol(SubframeParity::Odd, symbol));
        }
        let soft = rx.demodulate_region(SubframeParity::Odd, 10..=11, Modulation::Qpsk);
        assert_eq!(soft.len(), 192);
        let hard: Vec<u8> = soft
            .chunks(2)
            .map(|c| ((c[0] > 127) as u8) << 1 | (c[1] > 127) as u8)
            .collect();
        assert_eq!(hard, units);
    }
}
