//! Framed packet header
//!
//! Every peer message is framed by an 8-byte header: a 24-bit total size
//! (header included), an 8-bit packet type, and a 32-bit dejavu nonce
//! used to correlate responses with outstanding requests. The pipeline
//! consumes already-framed packets; this module only frames and
//! classifies them.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{TickwatchError, TickwatchResult};

/// Framing header length.
pub const HEADER_SIZE: usize = 8;

/// Largest packet the receiver will accept (24-bit size field).
pub const MAX_PACKET_SIZE: usize = 0x00FF_FFFF;

/// Wire packet types exchanged with peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Handshake: exchange known peer addresses.
    ExchangePeers = 0,
    /// Committee blob signed by the arbitrator.
    Computors = 2,
    /// One committee member's vote for a tick.
    TickVote = 3,
    /// A tick-data proposal.
    TickData = 8,
    /// Ask for the committee of the current epoch.
    RequestComputors = 11,
    /// Ask for the votes of one tick.
    RequestTickVotes = 14,
    /// Ask for the tick-data of one tick.
    RequestTickData = 16,
    /// A transaction envelope.
    Transaction = 24,
    /// Bootstrap: ask for the peer's current tick/epoch.
    RequestTickInfo = 27,
    /// Bootstrap response.
    TickInfo = 28,
    /// Ask for the transactions referenced by one tick.
    RequestTickTransactions = 29,
    /// End-of-response marker; also used as a NOP.
    EndResponse = 35,
    /// Forwarded contract-function query.
    RequestContractFunction = 42,
    /// Contract-function response.
    ContractFunction = 43,
    /// Log-event bytes.
    LogEvents = 44,
    /// Ask for the log events of a log-id range.
    RequestLogEvents = 45,
    /// Per-transaction log-id ranges for one tick.
    LogIdRanges = 51,
    /// Ask for the log-id ranges of one tick.
    RequestLogIdRanges = 52,
    /// End-of-epoch marker carried in verified data.
    EndEpoch = 253,
}

impl PacketType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::ExchangePeers,
            2 => Self::Computors,
            3 => Self::TickVote,
            8 => Self::TickData,
            11 => Self::RequestComputors,
            14 => Self::RequestTickVotes,
            16 => Self::RequestTickData,
            24 => Self::Transaction,
            27 => Self::RequestTickInfo,
            28 => Self::TickInfo,
            29 => Self::RequestTickTransactions,
            35 => Self::EndResponse,
            42 => Self::RequestContractFunction,
            43 => Self::ContractFunction,
            44 => Self::LogEvents,
            45 => Self::RequestLogEvents,
            51 => Self::LogIdRanges,
            52 => Self::RequestLogIdRanges,
            253 => Self::EndEpoch,
            _ => return None,
        })
    }
}

/// The 8-byte framing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub size: u32,
    pub packet_type: u8,
    pub dejavu: u32,
}

impl PacketHeader {
    pub fn new(packet_type: PacketType, payload_len: usize, dejavu: u32) -> Self {
        Self {
            size: (HEADER_SIZE + payload_len) as u32,
            packet_type: packet_type as u8,
            dejavu,
        }
    }

    pub fn decode(buf: &[u8]) -> TickwatchResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(TickwatchError::Decode("short packet header".to_string()));
        }
        let mut cursor = buf;
        let size = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], 0]);
        cursor.advance(3);
        let packet_type = cursor.get_u8();
        let dejavu = cursor.get_u32_le();
        if (size as usize) < HEADER_SIZE {
            return Err(TickwatchError::Decode(format!(
                "declared size {} below header size",
                size
            )));
        }
        Ok(Self {
            size,
            packet_type,
            dejavu,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.size.to_le_bytes()[..3]);
        buf.put_u8(self.packet_type);
        buf.put_u32_le(self.dejavu);
    }

    pub fn payload_len(&self) -> usize {
        self.size as usize - HEADER_SIZE
    }

    pub fn classify(&self) -> Option<PacketType> {
        PacketType::from_u8(self.packet_type)
    }
}

/// Bootstrap payload: a peer's view of the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    pub tick: u32,
    pub epoch: u16,
    pub initial_tick: u32,
}

impl TickInfo {
    pub const SIZE: usize = 10;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32_le(self.tick);
        buf.put_u16_le(self.epoch);
        buf.put_u32_le(self.initial_tick);
        buf.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> TickwatchResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(TickwatchError::Decode("short tick info".to_string()));
        }
        let mut buf = bytes;
        Ok(Self {
            tick: buf.get_u32_le(),
            epoch: buf.get_u16_le(),
            initial_tick: buf.get_u32_le(),
        })
    }
}

/// Frame a payload into a complete packet.
pub fn frame(packet_type: PacketType, dejavu: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    PacketHeader::new(packet_type, payload.len(), dejavu).encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Frame a request that carries a single tick number.
pub fn frame_tick_request(packet_type: PacketType, dejavu: u32, tick: u32) -> Bytes {
    frame(packet_type, dejavu, &tick.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let framed = frame(PacketType::TickVote, 0xDEAD_BEEF, &[1, 2, 3, 4]);
        let header = PacketHeader::decode(&framed).unwrap();
        assert_eq!(header.size as usize, HEADER_SIZE + 4);
        assert_eq!(header.classify(), Some(PacketType::TickVote));
        assert_eq!(header.dejavu, 0xDEAD_BEEF);
        assert_eq!(header.payload_len(), 4);
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(PacketHeader::decode(&[0u8; 4]).is_err());
    }

    #[test]
    fn undersized_declared_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[3, 0, 0]); // size 3 < HEADER_SIZE
        buf.put_u8(35);
        buf.put_u32_le(0);
        assert!(PacketHeader::decode(&buf).is_err());
    }

    #[test]
    fn unknown_type_classifies_as_none() {
        let framed = frame(PacketType::EndResponse, 0, &[]);
        let mut bytes = framed.to_vec();
        bytes[3] = 199;
        let header = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(header.classify(), None);
    }
}
