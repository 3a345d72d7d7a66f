//! Data-plane datagrams
//!
//! Layout: 6-byte header (`packet_type`, `payload_size`, `sequence_id`),
//! payload, then a CRC32 over every preceding byte. A datagram whose checksum
//! does not match is rejected before any other field is looked at.

use crate::codec::{self, PayloadReader, WireSize};
use crate::error::CodecError;
use crate::snapshot::VehicleStateSnapshot;
use serde::{Deserialize, Serialize};

pub const CHECKSUM_SIZE: usize = 4;

/// Largest fixed payload, a single vehicle snapshot.
pub const MAX_UDP_PAYLOAD_SIZE: usize = VehicleStateSnapshot::WIRE_SIZE;

/// Opponent states carried by one `OpponentStates` datagram.
pub const MAX_STATES_PER_PACKET: usize = 5;

pub const MAX_UDP_PACKET_SIZE: usize =
    UdpHeader::WIRE_SIZE + 1 + MAX_STATES_PER_PACKET * ClientState::WIRE_SIZE + CHECKSUM_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UdpPacketType {
    State = 0,
    OpponentStates = 1,
    Ping = 2,
}

impl TryFrom<u8> for UdpPacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::State),
            1 => Ok(Self::OpponentStates),
            2 => Ok(Self::Ping),
            other => Err(CodecError::UnknownPacketType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpHeader {
    pub packet_type: u8,
    /// Payload bytes, except for `OpponentStates` where it is the entry count.
    pub payload_size: u8,
    pub sequence_id: u32,
}

impl WireSize for UdpHeader {
    const WIRE_SIZE: usize = 6;
}

/// One opponent entry inside an `OpponentStates` datagram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub client_id: u16,
    pub snapshot: VehicleStateSnapshot,
}

impl WireSize for ClientState {
    const WIRE_SIZE: usize = 2 + VehicleStateSnapshot::WIRE_SIZE;
}

#[derive(Debug, Clone, PartialEq)]
pub enum UdpPacket {
    /// Client → server: the sender's own vehicle.
    State {
        sequence_id: u32,
        snapshot: VehicleStateSnapshot,
    },
    /// Server → client: up to five other vehicles. The sequence id is the tick number.
    OpponentStates {
        sequence_id: u32,
        states: Vec<ClientState>,
    },
    /// Handshake. Replies from the server carry the client id as sequence id.
    Ping { sequence_id: u32 },
}

impl UdpPacket {
    pub fn packet_type(&self) -> UdpPacketType {
        match self {
            UdpPacket::State { .. } => UdpPacketType::State,
            UdpPacket::OpponentStates { .. } => UdpPacketType::OpponentStates,
            UdpPacket::Ping { .. } => UdpPacketType::Ping,
        }
    }

    pub fn sequence_id(&self) -> u32 {
        match self {
            UdpPacket::State { sequence_id, .. }
            | UdpPacket::OpponentStates { sequence_id, .. }
            | UdpPacket::Ping { sequence_id } => *sequence_id,
        }
    }

    /// Encodes the datagram and appends its checksum.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let (payload_size, payload) = match self {
            UdpPacket::State { snapshot, .. } => {
                (VehicleStateSnapshot::WIRE_SIZE as u8, codec::serialize(snapshot)?)
            }
            UdpPacket::OpponentStates { states, .. } => {
                if states.len() > MAX_STATES_PER_PACKET {
                    return Err(CodecError::PayloadTooLarge {
                        size: states.len(),
                        max: MAX_STATES_PER_PACKET,
                    });
                }
                let mut payload = Vec::with_capacity(1 + states.len() * ClientState::WIRE_SIZE);
                payload.push(states.len() as u8);
                for state in states {
                    payload.extend_from_slice(&codec::serialize(state)?);
                }
                (states.len() as u8, payload)
            }
            UdpPacket::Ping { .. } => (0, Vec::new()),
        };

        let header = UdpHeader {
            packet_type: self.packet_type() as u8,
            payload_size,
            sequence_id: self.sequence_id(),
        };
        let body_len = UdpHeader::WIRE_SIZE + payload.len();
        let mut bytes = codec::serialize_with_size(&header, body_len)?;
        bytes[UdpHeader::WIRE_SIZE..].copy_from_slice(&payload);

        let crc = checksum(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    /// Verifies the checksum, then decodes the datagram.
    pub fn decode(bytes: &[u8]) -> Result<UdpPacket, CodecError> {
        let minimum = UdpHeader::WIRE_SIZE + CHECKSUM_SIZE;
        if bytes.len() < minimum || bytes.len() > MAX_UDP_PACKET_SIZE {
            return Err(CodecError::SizeMismatch {
                expected: minimum,
                actual: bytes.len(),
            });
        }

        let split = bytes.len() - CHECKSUM_SIZE;
        let (body, trailer) = bytes.split_at(split);
        let received = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = checksum(body);
        if received != computed {
            return Err(CodecError::ChecksumMismatch { received, computed });
        }

        let header: UdpHeader = codec::deserialize(&body[..UdpHeader::WIRE_SIZE], UdpHeader::WIRE_SIZE)?;
        let payload = &body[UdpHeader::WIRE_SIZE..];
        let sequence_id = header.sequence_id;

        match UdpPacketType::try_from(header.packet_type)? {
            UdpPacketType::State => {
                if header.payload_size as usize != VehicleStateSnapshot::WIRE_SIZE {
                    return Err(CodecError::SizeMismatch {
                        expected: VehicleStateSnapshot::WIRE_SIZE,
                        actual: header.payload_size as usize,
                    });
                }
                let snapshot = codec::deserialize(payload, VehicleStateSnapshot::WIRE_SIZE)?;
                Ok(UdpPacket::State {
                    sequence_id,
                    snapshot,
                })
            }
            UdpPacketType::OpponentStates => {
                let mut reader = PayloadReader::new(payload);
                let count = reader.read_u8()?;
                if count != header.payload_size {
                    return Err(CodecError::SizeMismatch {
                        expected: header.payload_size as usize,
                        actual: count as usize,
                    });
                }
                if count as usize > MAX_STATES_PER_PACKET {
                    return Err(CodecError::PayloadTooLarge {
                        size: count as usize,
                        max: MAX_STATES_PER_PACKET,
                    });
                }
                let mut states = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    states.push(reader.read::<ClientState>()?);
                }
                reader.finish()?;
                Ok(UdpPacket::OpponentStates {
                    sequence_id,
                    states,
                })
            }
            UdpPacketType::Ping => {
                if header.payload_size != 0 || !payload.is_empty() {
                    return Err(CodecError::SizeMismatch {
                        expected: 0,
                        actual: payload.len(),
                    });
                }
                Ok(UdpPacket::Ping { sequence_id })
            }
        }
    }
}

/// CRC32 (IEEE) of `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// True if the trailing checksum matches the bytes before it.
pub fn validate(bytes: &[u8]) -> bool {
    if bytes.len() < CHECKSUM_SIZE {
        return false;
    }
    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let received = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    checksum(body) == received
}

/// Splits a fan-out set into `OpponentStates` datagrams of at most five entries.
pub fn opponent_state_packets(sequence_id: u32, states: &[ClientState]) -> Vec<UdpPacket> {
    states
        .chunks(MAX_STATES_PER_PACKET)
        .map(|chunk| UdpPacket::OpponentStates {
            sequence_id,
            states: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{InputBitmap, Transform};

    fn snapshot(x: f32) -> VehicleStateSnapshot {
        VehicleStateSnapshot {
            transform: Transform::from_translation([x, 0.5, -x]),
            velocity: [x, 0.0, 1.0],
            steering_angle: -0.1,
            inputs: InputBitmap(InputBitmap::THROTTLE),
        }
    }

    fn states(count: u16) -> Vec<ClientState> {
        (0..count)
            .map(|id| ClientState {
                client_id: id,
                snapshot: snapshot(id as f32),
            })
            .collect()
    }

    #[test]
    fn test_sizes() {
        assert_eq!(ClientState::WIRE_SIZE, 83);
        assert_eq!(MAX_UDP_PACKET_SIZE, 426);

        let ping = UdpPacket::Ping { sequence_id: 7 }.encode().unwrap();
        assert_eq!(ping.len(), 10);
        assert_eq!(&ping[..6], &[2, 0, 7, 0, 0, 0]);

        let state = UdpPacket::State {
            sequence_id: 1,
            snapshot: snapshot(1.0),
        }
        .encode()
        .unwrap();
        assert_eq!(state.len(), 6 + 81 + 4);
        assert_eq!(state[1], 81);
    }

    #[test]
    fn test_every_encoded_packet_validates() {
        let packets = vec![
            UdpPacket::Ping { sequence_id: 3 },
            UdpPacket::State {
                sequence_id: 42,
                snapshot: snapshot(2.0),
            },
            UdpPacket::OpponentStates {
                sequence_id: 100,
                states: states(5),
            },
        ];

        for packet in packets {
            let bytes = packet.encode().unwrap();
            assert!(validate(&bytes));
            assert_eq!(UdpPacket::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_flipping_any_byte_breaks_checksum() {
        let bytes = UdpPacket::State {
            sequence_id: 9,
            snapshot: snapshot(3.0),
        }
        .encode()
        .unwrap();

        for i in 0..bytes.len() - CHECKSUM_SIZE {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x01;
            assert!(!validate(&corrupted), "flip at byte {} went unnoticed", i);
            assert!(matches!(
                UdpPacket::decode(&corrupted),
                Err(CodecError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn test_opponent_states_roundtrip_one_to_five() {
        for count in 1..=5 {
            let packet = UdpPacket::OpponentStates {
                sequence_id: count as u32,
                states: states(count),
            };
            let bytes = packet.encode().unwrap();
            assert_eq!(bytes[1], count as u8);
            assert_eq!(bytes[6], count as u8);
            assert_eq!(UdpPacket::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_six_states_split_into_two_packets() {
        let packets = opponent_state_packets(12, &states(6));
        assert_eq!(packets.len(), 2);

        match (&packets[0], &packets[1]) {
            (
                UdpPacket::OpponentStates { states: first, .. },
                UdpPacket::OpponentStates { states: second, .. },
            ) => {
                assert_eq!(first.len(), 5);
                assert_eq!(second.len(), 1);
                assert_eq!(second[0].client_id, 5);
            }
            other => panic!("unexpected packets {:?}", other),
        }
        assert!(packets.iter().all(|p| p.sequence_id() == 12));
    }

    #[test]
    fn test_too_many_states_rejected() {
        let packet = UdpPacket::OpponentStates {
            sequence_id: 0,
            states: states(6),
        };
        assert!(packet.encode().is_err());
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let mut bytes = UdpPacket::OpponentStates {
            sequence_id: 1,
            states: states(2),
        }
        .encode()
        .unwrap();

        // Claim three entries in the header, then re-seal the checksum
        bytes[1] = 3;
        let split = bytes.len() - CHECKSUM_SIZE;
        let crc = checksum(&bytes[..split]).to_le_bytes();
        bytes[split..].copy_from_slice(&crc);

        assert!(validate(&bytes));
        assert!(UdpPacket::decode(&bytes).is_err());
    }

    #[test]
    fn test_short_datagram_rejected() {
        assert!(!validate(&[1, 2]));
        assert!(UdpPacket::decode(&[0; 5]).is_err());
    }
}
