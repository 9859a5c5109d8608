//! Frame Fragmentation and Reassembly
//!
//! Splits higher-layer frames into sequenced data fragments sized to the room
//! left in a slot, and stitches received fragments back into frames.

use super::messages::{DataFragment, MacMessage, MAX_DATA_LEN};
use bytes::{Bytes, BytesMut};
use common::types::Direction;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// A higher-layer transmit/receive unit, opaque beyond its length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    data: Bytes,
}

impl DataFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Outbound fragmenter
#[derive(Debug)]
pub struct Fragmenter {
    direction: Direction,
    queue: VecDeque<DataFrame>,
    /// Offset into the frame at the head of the queue
    offset: usize,
    next_seq: u8,
    next_frag: u8,
}

impl Fragmenter {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            queue: VecDeque::new(),
            offset: 0,
            next_seq: 0,
            next_frag: 0,
        }
    }

    /// Enqueue a frame at the tail
    pub fn add_frame(&mut self, frame: DataFrame) {
        if frame.is_empty() {
            debug!("Ignoring empty frame");
            return;
        }
        trace!("Queued frame of {} bytes", frame.len());
        self.queue.push_back(frame);
    }

    /// Remaining unfragmented bytes across all queued frames
    pub fn buffer_size(&self) -> usize {
        self.queue.iter().map(DataFrame::len).sum::<usize>() - self.offset
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Take the next fragment carrying at most `max_payload` bytes.
    ///
    /// The sequence number is shared by all fragments of a frame and advances
    /// once the frame is exhausted.
    pub fn get_fragment(&mut self, max_payload: usize) -> Option<MacMessage> {
        let max_payload = max_payload.min(MAX_DATA_LEN);
        if max_payload == 0 {
            return None;
        }
        let frame = self.queue.front()?;

        let take = (frame.len() - self.offset).min(max_payload);
        let payload = frame.data.slice(self.offset..self.offset + take);
        let final_flag = self.offset + take == frame.len();
        let fragment = MacMessage::data(self.direction, self.next_seq, self.next_frag, final_flag, payload);

        if final_flag {
            self.queue.pop_front();
            self.offset = 0;
            self.next_seq = (self.next_seq + 1) & 0x0F;
            self.next_frag = 0;
        } else {
            self.offset += take;
            self.next_frag = (self.next_frag + 1) & 0x3F;
        }

        Some(fragment)
    }
}

#[derive(Debug)]
struct PartialFrame {
    seq_nr: u8,
    next_frag: u8,
    data: BytesMut,
}

/// Inbound reassembler holding one in-progress frame
#[derive(Debug, Default)]
pub struct Reassembler {
    current: Option<PartialFrame>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the completed frame on the final fragment.
    ///
    /// A fragment with a different sequence number starts a new frame and the
    /// incomplete one is discarded. A fragment whose index is not the next
    /// expected one is dropped.
    pub fn accept(&mut self, fragment: DataFragment) -> Option<DataFrame> {
        let restart = match &self.current {
            Some(partial) => partial.seq_nr != fragment.seq_nr,
            None => true,
        };
        if restart {
            if let Some(stale) = self.current.take() {
                debug!(
                    "Discarding incomplete frame seq={} ({} bytes)",
                    stale.seq_nr,
                    stale.data.len()
                );
            }
            self.current = Some(PartialFrame {
                seq_nr: fragment.seq_nr,
                next_frag: 0,
                data: BytesMut::new(),
            });
        }

        let partial = self.current.as_mut()?;
        if fragment.frag_nr != partial.next_frag {
            warn!(
                "Dropping fragment {} of seq={}, expected {}",
                fragment.frag_nr, fragment.seq_nr, partial.next_frag
            );
            return None;
        }
        partial.data.extend_from_slice(&fragment.payload);
        partial.next_frag = (fragment.frag_nr + 1) & 0x3F;

        if fragment.final_flag {
            let done = self.current.take()?;
            trace!("Reassembled frame seq={} ({} bytes)", done.seq_nr, done.data.len());
            return Some(DataFrame::new(done.data.freeze()));
        }
        None
    }

    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }
}
