//! Constellation Mapping
//!
//! Gray-coded BPSK/QPSK/16-QAM with unit average energy. Soft demodulation
//! produces 8-bit soft bits: 0 is a confident 0, 255 a confident 1.

use super::mcs::Modulation;
use num_complex::Complex32;
use std::f32::consts::FRAC_1_SQRT_2;

/// Soft bit value carrying no information
pub const SOFT_ERASURE: u8 = 127;

const QAM16_SCALE: f32 = 0.316_227_77; // 1/sqrt(10)

fn soft_bit(metric: f32) -> u8 {
    ((metric.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as u8
}

/// Gray-map a 2-bit pair onto one 16-QAM axis level
fn qam16_level(sign_bit: u8, magnitude_bit: u8) -> f32 {
    let magnitude = if magnitude_bit == 0 { 1.0 } else { 3.0 };
    let sign = if sign_bit == 0 { 1.0 } else { -1.0 };
    sign * magnitude * QAM16_SCALE
}

impl Modulation {
    /// Map one code unit (MSB first) onto the constellation
    pub fn modulate(self, unit: u8) -> Complex32 {
        match self {
            Modulation::Bpsk => Complex32::new(if unit & 1 == 0 { 1.0 } else { -1.0 }, 0.0),
            Modulation::Qpsk => {
                let i = if unit & 0b10 == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
                let q = if unit & 0b01 == 0 { FRAC_1_SQRT_2 } else { -FRAC_1_SQRT_2 };
                Complex32::new(i, q)
            }
            Modulation::Qam16 => Complex32::new(
                qam16_level((unit >> 3) & 1, (unit >> 2) & 1),
                qam16_level((unit >> 1) & 1, unit & 1),
            ),
        }
    }

    /// Append `bits_per_symbol` soft bits for one received sample
    pub fn demodulate_soft(self, sample: Complex32, out: &mut Vec<u8>) {
        match self {
            Modulation::Bpsk => out.push(soft_bit(-sample.re)),
            Modulation::Qpsk => {
                out.push(soft_bit(-sample.re / FRAC_1_SQRT_2));
                out.push(soft_bit(-sample.im / FRAC_1_SQRT_2));
            }
            Modulation::Qam16 => {
                for axis in [sample.re, sample.im] {
                    let level = axis / QAM16_SCALE;
                    out.push(soft_bit(-level));
                    out.push(soft_bit(level.abs() - 2.0));
                }
            }
        }
    }
}
