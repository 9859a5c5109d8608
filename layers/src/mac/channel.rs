//! Logical Channel
//!
//! A fixed-capacity slot payload that packs one or more MAC messages followed
//! by a trailing CRC. This is the unit exchanged with the PHY.

use super::messages::MacMessage;
use crate::LayerError;
use common::types::{CrcWidth, Direction};
use common::utils::{crc16, crc8};
use std::collections::VecDeque;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalChannel {
    /// Payload bytes followed by the CRC
    data: Vec<u8>,
    capacity: usize,
    crc: CrcWidth,
    write_pos: usize,
    read_pos: usize,
}

impl LogicalChannel {
    /// Create an empty channel with `capacity` payload bytes plus the CRC
    pub fn new(capacity: usize, crc: CrcWidth) -> Self {
        Self {
            data: vec![0; capacity + crc.bytes()],
            capacity,
            crc,
            write_pos: 0,
            read_pos: 0,
        }
    }

    /// Wrap a decoded block whose last `crc.bytes()` bytes are the CRC
    pub fn from_received(data: Vec<u8>, crc: CrcWidth) -> Result<Self, LayerError> {
        if data.len() < crc.bytes() {
            return Err(LayerError::TruncatedHeader { needed: crc.bytes(), available: data.len() });
        }
        let capacity = data.len() - crc.bytes();
        Ok(Self {
            data,
            capacity,
            crc,
            write_pos: capacity,
            read_pos: 0,
        })
    }

    /// Payload capacity, excluding the CRC
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serialized length, payload plus CRC
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn crc_width(&self) -> CrcWidth {
        self.crc
    }

    /// Bytes still free for messages
    pub fn remaining(&self) -> usize {
        self.capacity - self.write_pos
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Serialize a message at the write cursor
    pub fn add_message(&mut self, message: &MacMessage) -> Result<(), LayerError> {
        let needed = message.encoded_len();
        if needed > self.remaining() {
            return Err(LayerError::SlotFull { needed, remaining: self.remaining() });
        }
        let written = message.serialize(&mut self.data[self.write_pos..self.capacity])?;
        self.write_pos += written;
        Ok(())
    }

    /// Move messages from the head of `queue` until it empties or the next one
    /// does not fit. A message that does not fit stays at the head.
    pub fn add_all_from_queue(&mut self, queue: &mut VecDeque<MacMessage>) -> usize {
        let mut added = 0;
        while let Some(message) = queue.front() {
            if self.add_message(message).is_err() {
                break;
            }
            queue.pop_front();
            added += 1;
        }
        trace!("Packed {} queued messages, {} bytes left", added, self.remaining());
        added
    }

    /// Compute the CRC over the payload and store it in the trailing bytes
    pub fn calc_crc(&mut self) {
        let (payload, trailer) = self.data.split_at_mut(self.capacity);
        match self.crc {
            CrcWidth::Crc8 => trailer[0] = crc8(payload),
            CrcWidth::Crc16 => trailer.copy_from_slice(&crc16(payload).to_be_bytes()),
        }
    }

    pub fn verify_crc(&self) -> bool {
        let (payload, trailer) = self.data.split_at(self.capacity);
        match self.crc {
            CrcWidth::Crc8 => trailer[0] == crc8(payload),
            CrcWidth::Crc16 => trailer == crc16(payload).to_be_bytes(),
        }
    }

    /// Decode the message at the read cursor.
    ///
    /// Returns `None` once only zero padding remains. After a parse error the
    /// rest of the channel is skipped.
    pub fn parse_next_message(&mut self, direction: Direction) -> Option<Result<MacMessage, LayerError>> {
        let rest = &self.data[self.read_pos..self.capacity];
        if rest.iter().all(|&b| b == 0) {
            return None;
        }
        match MacMessage::parse(rest, direction) {
            Ok(message) => {
                self.read_pos += message.encoded_len();
                Some(Ok(message))
            }
            Err(e) => {
                self.read_pos = self.capacity;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    #[test]
    fn test_pack_exactly_full() {
        let mut channel = LogicalChannel::new(20, CrcWidth::Crc8);
        assert_eq!(channel.len(), 21);

        for _ in 0..3 {
            channel.add_message(&MacMessage::keepalive()).unwrap();
        }
        let fragment = MacMessage::data(Direction::Uplink, 0, 0, true, Bytes::from(vec![0x5A; 14]));
        channel.add_message(&fragment).unwrap();
        assert_eq!(channel.remaining(), 0);

        let before = channel.clone();
        assert_eq!(
            channel.add_message(&MacMessage::keepalive()),
            Err(LayerError::SlotFull { needed: 1, remaining: 0 })
        );
        assert_eq!(channel, before);
    }

    #[test]
    fn test_queue_head_kept_when_not_fitting() {
        let mut channel = LogicalChannel::new(4, CrcWidth::Crc8);
        let mut queue: VecDeque<MacMessage> = VecDeque::new();
        queue.push_back(MacMessage::ul_req(10));
        queue.push_back(MacMessage::ul_req(20));
        queue.push_back(MacMessage::keepalive());

        assert_eq!(channel.add_all_from_queue(&mut queue), 2);
        assert_eq!(queue.front(), Some(&MacMessage::keepalive()));

        // The head is the first candidate for the next channel
        let mut next = LogicalChannel::new(4, CrcWidth::Crc8);
        queue.push_front(MacMessage::ul_req(30));
        assert_eq!(next.add_all_from_queue(&mut queue), 2);
        assert!(queue.is_empty());
        assert_eq!(next.parse_next_message(Direction::Uplink), Some(Ok(MacMessage::UlReq { queue_size: 30 })));
    }

    #[test]
    fn test_crc_roundtrip_and_received() {
        let mut channel = LogicalChannel::new(10, CrcWidth::Crc16);
        channel.add_message(&MacMessage::dl_mcs_info(2)).unwrap();
        channel.add_message(&MacMessage::timing_advance(1000)).unwrap();
        channel.calc_crc();
        assert!(channel.verify_crc());

        let mut received = LogicalChannel::from_received(channel.as_bytes().to_vec(), CrcWidth::Crc16).unwrap();
        assert!(received.verify_crc());
        assert_eq!(received.parse_next_message(Direction::Downlink), Some(Ok(MacMessage::DlMcsInfo { mcs: 2 })));
        assert_eq!(
            received.parse_next_message(Direction::Downlink),
            Some(Ok(MacMessage::TimingAdvance { advance: 1000 }))
        );
        assert_eq!(received.parse_next_message(Direction::Downlink), None);
    }

    #[test]
    fn test_parse_error_skips_rest() {
        let mut data = vec![0u8; 6];
        data[0] = 0b110_00000; // tag 6 is not a downlink kind
        data[1] = 0x20;
        let mut channel = LogicalChannel::from_received(data, CrcWidth::Crc8).unwrap();
        assert_eq!(
            channel.parse_next_message(Direction::Downlink),
            Some(Err(LayerError::UnknownMessageKind(6)))
        );
        assert_eq!(channel.parse_next_message(Direction::Downlink), None);
    }

    proptest! {
        #[test]
        fn prop_single_bit_flip_breaks_crc(
            payload in proptest::collection::vec(any::<u8>(), 1..40),
            wide in any::<bool>(),
            bit in any::<proptest::sample::Index>(),
        ) {
            let width = if wide { CrcWidth::Crc16 } else { CrcWidth::Crc8 };
            let mut channel = LogicalChannel::new(payload.len(), width);
            channel.data[..payload.len()].copy_from_slice(&payload);
            channel.calc_crc();
            prop_assert!(channel.verify_crc());

            let bit = bit.index(payload.len() * 8);
            channel.data[bit / 8] ^= 1 << (bit % 8);
            prop_assert!(!channel.verify_crc());
        }
    }
}
