//! Channel Coding Primitives
//!
//! Repetition FEC with soft combining, a bit-level block interleaver and the
//! control-slot scrambler.

use super::mcs::FecScheme;
use super::modem::SOFT_ERASURE;
use common::utils::{pack_bits, unpack_bits};

impl FecScheme {
    pub fn encoded_len(self, msg_len: usize) -> usize {
        msg_len * self.repetition()
    }

    pub fn encode(self, msg: &[u8]) -> Vec<u8> {
        msg.repeat(self.repetition())
    }

    /// Decode `msg_len` bytes from soft bits; missing soft bits count as erasures
    pub fn decode_soft(self, soft: &[u8], msg_len: usize) -> Vec<u8> {
        let rep = self.repetition();
        let nbits = msg_len * 8;
        let mut out = vec![0u8; msg_len];

        for bit in 0..nbits {
            let sum: u32 = (0..rep)
                .map(|copy| soft.get(copy * nbits + bit).copied().unwrap_or(SOFT_ERASURE) as u32)
                .sum();
            if sum * 2 > 255 * rep as u32 {
                out[bit / 8] |= 0x80 >> (bit % 8);
            }
        }
        out
    }
}

/// Bit-level interleaver over a fixed block length.
///
/// Output bit `i` is input bit `(i * stride) mod n` with `stride` coprime to `n`.
#[derive(Debug, Clone)]
pub struct Interleaver {
    permutation: Vec<usize>,
}

impl Interleaver {
    pub fn new(len_bytes: usize) -> Self {
        let n = len_bytes * 8;
        let mut stride = ((n as f64).sqrt() as usize) | 1;
        while n > 1 && gcd(stride, n) != 1 {
            stride += 2;
        }
        let permutation = (0..n).map(|i| (i * stride) % n.max(1)).collect();
        Self { permutation }
    }

    pub fn len_bits(&self) -> usize {
        self.permutation.len()
    }

    pub fn interleave(&self, data: &[u8]) -> Vec<u8> {
        let bits = unpack_bits(data);
        let shuffled: Vec<bool> = self
            .permutation
            .iter()
            .map(|&src| bits.get(src).copied().unwrap_or(false))
            .collect();
        pack_bits(&shuffled).to_vec()
    }

    pub fn deinterleave_soft(&self, soft: &[u8]) -> Vec<u8> {
        let mut out = vec![SOFT_ERASURE; self.permutation.len()];
        for (i, &dst) in self.permutation.iter().enumerate() {
            if let Some(&s) = soft.get(i) {
                out[dst] = s;
            }
        }
        out
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// XOR `data` with the x^7 + x^4 + 1 whitening sequence; applying it twice
/// restores the input
pub fn scramble(data: &mut [u8]) {
    let mut state: u8 = 0x5D;
    for byte in data.iter_mut() {
        let mut mask = 0u8;
        for _ in 0..8 {
            let feedback = ((state >> 6) ^ (state >> 3)) & 1;
            state = ((state << 1) | feedback) & 0x7F;
            mask = (mask << 1) | feedback;
        }
        *byte ^= mask;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_soft(bytes: &[u8]) -> Vec<u8> {
        unpack_bits(bytes).into_iter().map(|b| if b { 255 } else { 0 }).collect()
    }

    #[test]
    fn test_repetition_soft_combining() {
        let msg = [0xA5, 0x3C];
        let encoded = FecScheme::Repetition2.encode(&msg);
        assert_eq!(encoded.len(), FecScheme::Repetition2.encoded_len(2));

        let mut soft = to_soft(&encoded);
        // Weak disagreement in the second copy loses to the confident first copy
        soft[16] = 100;
        assert_eq!(FecScheme::Repetition2.decode_soft(&soft, 2), msg.to_vec());
    }

    #[test]
    fn test_interleaver_is_permutation() {
        let interleaver = Interleaver::new(84);
        let mut seen = vec![false; interleaver.len_bits()];
        for &p in &interleaver.permutation {
            assert!(!seen[p]);
            seen[p] = true;
        }

        let data: Vec<u8> = (0..84u8).collect();
        let shuffled = interleaver.interleave(&data);
        assert_ne!(shuffled, data);
        let restored = FecScheme::Uncoded.decode_soft(&interleaver.deinterleave_soft(&to_soft(&shuffled)), 84);
        assert_eq!(restored, data);
    }

    #[test]
    fn test_scramble_is_involution() {
        let original = [0u8, 1, 2, 3, 250, 0xFF];
        let mut data = original;
        scramble(&mut data);
        assert_ne!(data, original);
        scramble(&mut data);
        assert_eq!(data, original);
    }
}
