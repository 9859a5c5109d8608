//! MAC Message Codec
//!
//! Fixed-format control and data messages. Byte 0 always carries the 3-bit
//! kind tag in its top bits; uplink kinds reuse the downlink tag space and are
//! told apart by the direction the caller supplies.

use crate::LayerError;
use bytes::{Bytes, BytesMut, BufMut};
use common::types::Direction;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Offset added to the wire tag of uplink kinds
pub const UPLINK_TAG_OFFSET: u8 = 8;

/// Header length of dl_data / ul_data messages
pub const DATA_HEADER_LEN: usize = 3;

/// Largest payload a data header can describe (10-bit length field)
pub const MAX_DATA_LEN: usize = 0x3FF;

/// Largest queue size an ul_req can report (13-bit field)
pub const MAX_UL_REQ_SIZE: u16 = 0x1FFF;

/// Message kind identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum MessageKind {
    AssociateResponse = 0,
    DlMcsInfo = 1,
    UlMcsInfo = 2,
    TimingAdvance = 3,
    DlData = 4,
    UlReq = 8,
    ChannelQuality = 9,
    Keepalive = 10,
    ControlAck = 11,
    UlData = 12,
}

impl MessageKind {
    /// Resolve a wire tag read in the given direction
    pub fn from_tag(tag: u8, direction: Direction) -> Result<Self, LayerError> {
        let id = match direction {
            Direction::Downlink => tag & 0x07,
            Direction::Uplink => (tag & 0x07) + UPLINK_TAG_OFFSET,
        };
        Self::from_id(id)
    }

    /// Resolve a kind from its full identifier (tag plus uplink offset)
    pub fn from_id(id: u8) -> Result<Self, LayerError> {
        MessageKind::from_u8(id).ok_or(LayerError::UnknownMessageKind(id))
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// The 3-bit tag written on the wire
    pub fn tag(self) -> u8 {
        (self as u8) & 0x07
    }

    pub fn direction(self) -> Direction {
        if (self as u8) >= UPLINK_TAG_OFFSET {
            Direction::Uplink
        } else {
            Direction::Downlink
        }
    }

    /// Fixed header length in bytes
    pub fn header_len(self) -> usize {
        match self {
            MessageKind::AssociateResponse => 2,
            MessageKind::DlMcsInfo | MessageKind::UlMcsInfo => 1,
            MessageKind::TimingAdvance => 2,
            MessageKind::DlData | MessageKind::UlData => DATA_HEADER_LEN,
            MessageKind::UlReq => 2,
            MessageKind::ChannelQuality => 1,
            MessageKind::Keepalive => 1,
            MessageKind::ControlAck => 1,
        }
    }
}

/// Header length for a raw kind identifier
pub fn header_length(id: u8) -> Result<usize, LayerError> {
    MessageKind::from_id(id).map(MessageKind::header_len)
}

/// Association response codes (2-bit field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum AssociationResponse {
    Success = 0,
    Nack = 1,
    NetworkFull = 2,
    Unsupported = 3,
}

/// Payload-carrying part of a dl_data / ul_data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragment {
    /// Frame identity, shared by all fragments of one frame (4 bits)
    pub seq_nr: u8,
    /// Fragment index within the frame (6 bits)
    pub frag_nr: u8,
    /// Set on the last fragment of a frame
    pub final_flag: bool,
    pub payload: Bytes,
}

/// A MAC message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacMessage {
    AssociateResponse {
        user_id: u8,
        rach_user_id: u8,
        response: AssociationResponse,
        protocol_version: u8,
    },
    DlMcsInfo { mcs: u8 },
    UlMcsInfo { mcs: u8 },
    TimingAdvance { advance: u16 },
    DlData(DataFragment),
    UlReq { queue_size: u16 },
    ChannelQuality { quality: u8 },
    Keepalive,
    ControlAck { acked_kind: u8 },
    UlData(DataFragment),
}

impl MacMessage {
    pub fn associate_response(
        user_id: u8,
        rach_user_id: u8,
        response: AssociationResponse,
        protocol_version: u8,
    ) -> Self {
        MacMessage::AssociateResponse {
            user_id: user_id & 0x0F,
            rach_user_id: rach_user_id & 0x0F,
            response,
            protocol_version: protocol_version & 0x07,
        }
    }

    pub fn dl_mcs_info(mcs: u8) -> Self {
        MacMessage::DlMcsInfo { mcs: mcs & 0x1F }
    }

    pub fn ul_mcs_info(mcs: u8) -> Self {
        MacMessage::UlMcsInfo { mcs: mcs & 0x1F }
    }

    pub fn timing_advance(advance: u16) -> Self {
        MacMessage::TimingAdvance { advance: advance & 0x1FFF }
    }

    /// Request uplink capacity; sizes beyond the field width saturate
    pub fn ul_req(queue_size: usize) -> Self {
        let queue_size = queue_size.min(MAX_UL_REQ_SIZE as usize) as u16;
        MacMessage::UlReq { queue_size }
    }

    pub fn channel_quality(quality: u8) -> Self {
        MacMessage::ChannelQuality { quality: quality & 0x1F }
    }

    pub fn keepalive() -> Self {
        MacMessage::Keepalive
    }

    pub fn control_ack(acked: MessageKind) -> Self {
        MacMessage::ControlAck { acked_kind: acked.id() & 0x1F }
    }

    /// Build a data fragment for the given direction
    pub fn data(direction: Direction, seq_nr: u8, frag_nr: u8, final_flag: bool, payload: Bytes) -> Self {
        let fragment = DataFragment {
            seq_nr: seq_nr & 0x0F,
            frag_nr: frag_nr & 0x3F,
            final_flag,
            payload,
        };
        match direction {
            Direction::Downlink => MacMessage::DlData(fragment),
            Direction::Uplink => MacMessage::UlData(fragment),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MacMessage::AssociateResponse { .. } => MessageKind::AssociateResponse,
            MacMessage::DlMcsInfo { .. } => MessageKind::DlMcsInfo,
            MacMessage::UlMcsInfo { .. } => MessageKind::UlMcsInfo,
            MacMessage::TimingAdvance { .. } => MessageKind::TimingAdvance,
            MacMessage::DlData(_) => MessageKind::DlData,
            MacMessage::UlReq { .. } => MessageKind::UlReq,
            MacMessage::ChannelQuality { .. } => MessageKind::ChannelQuality,
            MacMessage::Keepalive => MessageKind::Keepalive,
            MacMessage::ControlAck { .. } => MessageKind::ControlAck,
            MacMessage::UlData(_) => MessageKind::UlData,
        }
    }

    pub fn header_len(&self) -> usize {
        self.kind().header_len()
    }

    pub fn payload_len(&self) -> usize {
        match self {
            MacMessage::DlData(fragment) | MacMessage::UlData(fragment) => fragment.payload.len(),
            _ => 0,
        }
    }

    /// Total serialized size
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.payload_len()
    }

    /// Serialize into `buf`, returning the number of bytes written.
    ///
    /// `buf` is left untouched on failure.
    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, LayerError> {
        let needed = self.encoded_len();
        if buf.len() < needed {
            return Err(LayerError::BufferTooSmall { needed, available: buf.len() });
        }
        if self.payload_len() > MAX_DATA_LEN {
            return Err(LayerError::PayloadOverflow {
                header: self.header_len(),
                payload: self.payload_len(),
                available: DATA_HEADER_LEN + MAX_DATA_LEN,
            });
        }

        let tag = self.kind().tag() << 5;
        match self {
            MacMessage::AssociateResponse { user_id, rach_user_id, response, protocol_version } => {
                buf[0] = tag | (user_id & 0x0F) << 1 | (rach_user_id >> 3) & 0x01;
                buf[1] = (rach_user_id & 0x07) << 5 | (*response as u8 & 0x03) << 3 | (protocol_version & 0x07);
            }
            MacMessage::DlMcsInfo { mcs } | MacMessage::UlMcsInfo { mcs } => {
                buf[0] = tag | (mcs & 0x1F);
            }
            MacMessage::TimingAdvance { advance: value } | MacMessage::UlReq { queue_size: value } => {
                buf[0] = tag | ((value >> 8) as u8 & 0x1F);
                buf[1] = (value & 0xFF) as u8;
            }
            MacMessage::ChannelQuality { quality } => {
                buf[0] = tag | (quality & 0x1F);
            }
            MacMessage::Keepalive => {
                buf[0] = tag;
            }
            MacMessage::ControlAck { acked_kind } => {
                buf[0] = tag | (acked_kind & 0x1F);
            }
            MacMessage::DlData(fragment) | MacMessage::UlData(fragment) => {
                let len = fragment.payload.len();
                buf[0] = tag | (fragment.final_flag as u8) << 4 | (fragment.seq_nr & 0x0F);
                buf[1] = (fragment.frag_nr & 0x3F) << 2 | ((len >> 8) as u8 & 0x03);
                buf[2] = (len & 0xFF) as u8;
                buf[DATA_HEADER_LEN..needed].copy_from_slice(&fragment.payload);
            }
        }

        Ok(needed)
    }

    /// Serialize into a freshly allocated buffer
    pub fn to_bytes(&self) -> Result<Bytes, LayerError> {
        let mut buf = BytesMut::zeroed(self.encoded_len());
        self.serialize(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parse one message from the start of `buf`
    pub fn parse(buf: &[u8], direction: Direction) -> Result<Self, LayerError> {
        let first = *buf
            .first()
            .ok_or(LayerError::TruncatedHeader { needed: 1, available: 0 })?;
        let kind = MessageKind::from_tag(first >> 5, direction)?;
        let header = kind.header_len();
        if buf.len() < header {
            return Err(LayerError::TruncatedHeader { needed: header, available: buf.len() });
        }

        let message = match kind {
            MessageKind::AssociateResponse => {
                let response = AssociationResponse::from_u8((buf[1] >> 3) & 0x03)
                    .ok_or(LayerError::UnknownMessageKind(kind.id()))?;
                MacMessage::AssociateResponse {
                    user_id: (buf[0] >> 1) & 0x0F,
                    rach_user_id: (buf[0] & 0x01) << 3 | buf[1] >> 5,
                    response,
                    protocol_version: buf[1] & 0x07,
                }
            }
            MessageKind::DlMcsInfo => MacMessage::DlMcsInfo { mcs: buf[0] & 0x1F },
            MessageKind::UlMcsInfo => MacMessage::UlMcsInfo { mcs: buf[0] & 0x1F },
            MessageKind::TimingAdvance => MacMessage::TimingAdvance { advance: read_13bit(buf) },
            MessageKind::UlReq => MacMessage::UlReq { queue_size: read_13bit(buf) },
            MessageKind::ChannelQuality => MacMessage::ChannelQuality { quality: buf[0] & 0x1F },
            MessageKind::Keepalive => MacMessage::Keepalive,
            MessageKind::ControlAck => MacMessage::ControlAck { acked_kind: buf[0] & 0x1F },
            MessageKind::DlData | MessageKind::UlData => {
                let len = ((buf[1] & 0x03) as usize) << 8 | buf[2] as usize;
                if header + len > buf.len() {
                    return Err(LayerError::PayloadOverflow {
                        header,
                        payload: len,
                        available: buf.len(),
                    });
                }
                let fragment = DataFragment {
                    seq_nr: buf[0] & 0x0F,
                    frag_nr: buf[1] >> 2,
                    final_flag: buf[0] & 0x10 != 0,
                    payload: Bytes::copy_from_slice(&buf[header..header + len]),
                };
                if kind == MessageKind::DlData {
                    MacMessage::DlData(fragment)
                } else {
                    MacMessage::UlData(fragment)
                }
            }
        };

        Ok(message)
    }
}

fn read_13bit(buf: &[u8]) -> u16 {
    ((buf[0] & 0x1F) as u16) << 8 | buf[1] as u16
}

/// Append a message to a growable buffer
pub fn put_message(dst: &mut BytesMut, message: &MacMessage) -> Result<(), LayerError> {
    let start = dst.len();
    dst.put_bytes(0, message.encoded_len());
    message.serialize(&mut dst[start..])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ul_req_wire_format() {
        let msg = MacMessage::ul_req(37);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.len(), 2);
        assert_eq!(bytes[0] >> 5, MessageKind::UlReq.tag());
        let size = ((bytes[0] & 0x1F) as u16) << 8 | bytes[1] as u16;
        assert_eq!(size, 37);

        let parsed = MacMessage::parse(&bytes, Direction::Uplink).unwrap();
        assert_eq!(parsed, MacMessage::UlReq { queue_size: 37 });
    }

    #[test]
    fn test_ul_req_saturates() {
        assert_eq!(MacMessage::ul_req(100_000), MacMessage::UlReq { queue_size: MAX_UL_REQ_SIZE });
    }

    #[test]
    fn test_header_lengths() {
        assert_eq!(header_length(0).unwrap(), 2);
        assert_eq!(header_length(4).unwrap(), 3);
        assert_eq!(header_length(10).unwrap(), 1);
        assert_eq!(header_length(5), Err(LayerError::UnknownMessageKind(5)));
        assert_eq!(header_length(13), Err(LayerError::UnknownMessageKind(13)));
    }

    #[test]
    fn test_associate_response_fields() {
        let msg = MacMessage::associate_response(9, 13, AssociationResponse::NetworkFull, 5);
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(MacMessage::parse(&bytes, Direction::Downlink).unwrap(), msg);
    }

    #[test]
    fn test_data_fragment_fields() {
        let msg = MacMessage::data(Direction::Downlink, 11, 42, true, Bytes::from_static(b"payload"));
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(bytes.len(), DATA_HEADER_LEN + 7);

        match MacMessage::parse(&bytes, Direction::Downlink).unwrap() {
            MacMessage::DlData(fragment) => {
                assert_eq!(fragment.seq_nr, 11);
                assert_eq!(fragment.frag_nr, 42);
                assert!(fragment.final_flag);
                assert_eq!(&fragment.payload[..], b"payload");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_direction_selects_tag_space() {
        // Tag 2 is ul_mcs_info downlink and keepalive uplink
        let bytes = MacMessage::keepalive().to_bytes().unwrap();
        assert_eq!(MacMessage::parse(&bytes, Direction::Uplink).unwrap(), MacMessage::Keepalive);
        assert_eq!(
            MacMessage::parse(&bytes, Direction::Downlink).unwrap(),
            MacMessage::UlMcsInfo { mcs: 0 }
        );
    }

    #[test]
    fn test_parse_unknown_kind() {
        let buf = [0b101_00000, 0, 0];
        assert_eq!(
            MacMessage::parse(&buf, Direction::Downlink),
            Err(LayerError::UnknownMessageKind(5))
        );
        assert_eq!(
            MacMessage::parse(&buf, Direction::Uplink),
            Err(LayerError::UnknownMessageKind(13))
        );
    }

    #[test]
    fn test_parse_truncated_header() {
        let bytes = MacMessage::timing_advance(300).to_bytes().unwrap();
        assert_eq!(
            MacMessage::parse(&bytes[..1], Direction::Downlink),
            Err(LayerError::TruncatedHeader { needed: 2, available: 1 })
        );
        assert!(matches!(
            MacMessage::parse(&[], Direction::Downlink),
            Err(LayerError::TruncatedHeader { .. })
        ));
    }

    #[test]
    fn test_parse_payload_overflow() {
        let bytes = MacMessage::data(Direction::Uplink, 1, 0, false, Bytes::from_static(b"abcdef"))
            .to_bytes()
            .unwrap();
        assert_eq!(
            MacMessage::parse(&bytes[..5], Direction::Uplink),
            Err(LayerError::PayloadOverflow { header: 3, payload: 6, available: 5 })
        );
    }

    #[test]
    fn test_serialize_buffer_too_small_leaves_buffer() {
        let msg = MacMessage::data(Direction::Uplink, 0, 0, true, Bytes::from_static(b"xyz"));
        let mut buf = [0xEEu8; 5];
        assert_eq!(
            msg.serialize(&mut buf),
            Err(LayerError::BufferTooSmall { needed: 6, available: 5 })
        );
        assert_eq!(buf, [0xEE; 5]);
    }

    #[test]
    fn test_control_ack_and_quality() {
        let mut buf = BytesMut::new();
        put_message(&mut buf, &MacMessage::control_ack(MessageKind::DlMcsInfo)).unwrap();
        put_message(&mut buf, &MacMessage::channel_quality(17)).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(
            MacMessage::parse(&buf, Direction::Uplink).unwrap(),
            MacMessage::ControlAck { acked_kind: 1 }
        );
        assert_eq!(
            MacMessage::parse(&buf[1..], Direction::Uplink).unwrap(),
            MacMessage::ChannelQuality { quality: 17 }
        );
    }
}
