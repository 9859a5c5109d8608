//! File-backed Radio
//!
//! Replays received IQ from a reader and records transmitted IQ to a writer,
//! both as interleaved little-endian f32 I/Q pairs.

use crate::platform::{db_to_amplitude, RadioConfig, RadioPlatform, RadioStats};
use crate::InterfaceError;
use bytes::{Buf, BufMut, BytesMut};
use common::types::DuplexMode;
use num_complex::Complex32;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use tracing::{debug, info, warn};

/// Bytes per complex sample
const SAMPLE_BYTES: usize = 8;

/// File-backed radio platform
pub struct FileRadio<R, W> {
    config: RadioConfig,
    reader: R,
    writer: W,
    raw: Vec<u8>,
    staged: Vec<Complex32>,
    staged_len: usize,
    stats: RadioStats,
}

impl FileRadio<BufReader<File>, BufWriter<File>> {
    /// Open the input and output files named in the configuration
    pub fn open(config: RadioConfig) -> Result<Self, InterfaceError> {
        let input = config
            .input
            .clone()
            .ok_or_else(|| InterfaceError::InvalidConfig("no IQ input file configured".to_string()))?;
        let output = config
            .output
            .clone()
            .ok_or_else(|| InterfaceError::InvalidConfig("no IQ output file configured".to_string()))?;

        let reader = BufReader::new(File::open(&input)?);
        let writer = BufWriter::new(File::create(&output)?);
        info!("File radio: reading {}, writing {}", input.display(), output.display());
        Ok(Self::new(config, reader, writer))
    }
}

impl<R: Read + Send, W: Write + Send> FileRadio<R, W> {
    pub fn new(config: RadioConfig, reader: R, writer: W) -> Self {
        let staged = vec![Complex32::new(0.0, 0.0); config.tx_buffer_len];
        Self {
            config,
            reader,
            writer,
            raw: Vec::new(),
            staged,
            staged_len: 0,
            stats: RadioStats::default(),
        }
    }

    /// Recover the writer, flushing staged samples first
    pub fn into_writer(mut self) -> Result<W, InterfaceError> {
        self.push_transmit()?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    /// Read until `len` bytes or end of stream
    fn read_raw(&mut self, len: usize) -> Result<usize, InterfaceError> {
        self.raw.resize(len, 0);
        let mut filled = 0;
        while filled < len {
            match self.reader.read(&mut self.raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<R: Read + Send, W: Write + Send> RadioPlatform for FileRadio<R, W> {
    fn receive(&mut self, buf: &mut [Complex32]) -> Result<usize, InterfaceError> {
        let filled = self.read_raw(buf.len() * SAMPLE_BYTES)?;
        let trailing = filled % SAMPLE_BYTES;
        if trailing != 0 {
            warn!("IQ input ends with a partial sample");
            return Err(InterfaceError::MalformedStream(trailing));
        }

        let gain = db_to_amplitude(self.config.rx_gain);
        let count = filled / SAMPLE_BYTES;
        let mut raw = &self.raw[..filled];
        for sample in buf.iter_mut().take(count) {
            let re = raw.get_f32_le();
            let im = raw.get_f32_le();
            *sample = Complex32::new(re, im) * gain;
        }
        self.stats.rx_samples += count as u64;
        Ok(count)
    }

    fn prepare_transmit(&mut self, samples: &[Complex32], offset: usize) -> Result<usize, InterfaceError> {
        let capacity = self.staged.len();
        if offset > capacity {
            return Err(InterfaceError::InvalidConfig(format!(
                "transmit offset {} beyond buffer of {} samples",
                offset, capacity
            )));
        }
        let n = samples.len().min(capacity - offset);
        if n < samples.len() {
            self.stats.tx_overflows += (samples.len() - n) as u64;
            debug!("Transmit buffer full, {} samples not staged", samples.len() - n);
        }
        self.staged[offset..offset + n].copy_from_slice(&samples[..n]);
        self.staged_len = self.staged_len.max(offset + n);
        Ok(n)
    }

    fn push_transmit(&mut self) -> Result<(), InterfaceError> {
        if self.staged_len == 0 {
            return Ok(());
        }
        let gain = db_to_amplitude(self.config.tx_gain);
        let mut out = BytesMut::with_capacity(self.staged_len * SAMPLE_BYTES);
        for sample in &self.staged[..self.staged_len] {
            out.put_f32_le(sample.re * gain);
            out.put_f32_le(sample.im * gain);
        }
        self.writer.write_all(&out)?;

        self.stats.tx_samples += self.staged_len as u64;
        self.stats.tx_buffers += 1;
        self.staged[..self.staged_len].fill(Complex32::new(0.0, 0.0));
        self.staged_len = 0;
        Ok(())
    }

    fn set_rx_gain(&mut self, gain_db: f32) {
        debug!("RX gain {} dB", gain_db);
        self.config.rx_gain = gain_db;
    }

    fn set_tx_gain(&mut self, gain_db: f32) {
        debug!("TX gain {} dB", gain_db);
        self.config.tx_gain = gain_db;
    }

    fn set_rx_frequency(&mut self, frequency_hz: f64) {
        debug!("RX frequency {} MHz (no effect on file input)", frequency_hz / 1e6);
        self.config.rx_frequency = frequency_hz;
    }

    fn set_tx_frequency(&mut self, frequency_hz: f64) {
        debug!("TX frequency {} MHz (no effect on file output)", frequency_hz / 1e6);
        self.config.tx_frequency = frequency_hz;
    }

    fn set_duplex_mode(&mut self, mode: DuplexMode) {
        debug!("Duplex mode {:?}", mode);
        self.config.duplex = mode;
    }

    fn config(&self) -> &RadioConfig {
        &self.config
    }

    fn stats(&self) -> RadioStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(samples: &[Complex32]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for s in samples {
            out.put_f32_le(s.re);
            out.put_f32_le(s.im);
        }
        out.to_vec()
    }

    fn radio(input: Vec<u8>) -> FileRadio<Cursor<Vec<u8>>, Vec<u8>> {
        let config = RadioConfig { tx_buffer_len: 4, ..Default::default() };
        FileRadio::new(config, Cursor::new(input), Vec::new())
    }

    #[test]
    fn test_receive_until_end_of_stream() {
        let samples: Vec<Complex32> = (0..5).map(|i| Complex32::new(i as f32, -(i as f32))).collect();
        let mut radio = radio(encode(&samples));

        let mut buf = vec![Complex32::new(0.0, 0.0); 3];
        assert_eq!(radio.receive(&mut buf).unwrap(), 3);
        assert_eq!(buf, samples[..3]);
        assert_eq!(radio.receive(&mut buf).unwrap(), 2);
        assert_eq!(buf[..2], samples[3..]);
        assert_eq!(radio.receive(&mut buf).unwrap(), 0);
        assert_eq!(radio.stats().rx_samples, 5);
    }

    #[test]
    fn test_partial_sample_is_an_error() {
        let mut bytes = encode(&[Complex32::new(1.0, 1.0)]);
        bytes.extend_from_slice(&[0, 0, 0]);
        let mut radio = radio(bytes);
        let mut buf = vec![Complex32::new(0.0, 0.0); 4];
        assert!(matches!(radio.receive(&mut buf), Err(InterfaceError::MalformedStream(3))));
    }

    #[test]
    fn test_rx_gain_scales_samples() {
        let mut radio = radio(encode(&[Complex32::new(1.0, -2.0)]));
        radio.set_rx_gain(20.0);
        let mut buf = vec![Complex32::new(0.0, 0.0); 1];
        radio.receive(&mut buf).unwrap();
        assert!((buf[0] - Complex32::new(10.0, -20.0)).norm() < 1e-3);
    }

    #[test]
    fn test_transmit_staging() {
        let mut radio = radio(Vec::new());
        let a = [Complex32::new(1.0, 0.0), Complex32::new(0.0, 1.0)];
        assert_eq!(radio.prepare_transmit(&a, 0).unwrap(), 2);
        // Only two of three fit behind offset 2
        assert_eq!(radio.prepare_transmit(&[Complex32::new(2.0, 2.0); 3], 2).unwrap(), 2);
        assert!(radio.prepare_transmit(&a, 5).is_err());
        radio.push_transmit().unwrap();
        // Nothing staged, nothing written
        radio.push_transmit().unwrap();
        assert_eq!(radio.stats().tx_overflows, 1);
        assert_eq!(radio.stats().tx_buffers, 1);

        let written = radio.into_writer().unwrap();
        let expected = encode(&[a[0], a[1], Complex32::new(2.0, 2.0), Complex32::new(2.0, 2.0)]);
        assert_eq!(written, expected);
    }
}
