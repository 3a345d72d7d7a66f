//! Control-plane packets carried over the reliable stream
//!
//! Every packet is a 2-byte header (`packet_type`, `payload_size`) followed by
//! exactly `payload_size` bytes of payload. Payloads are capped at 255 bytes by
//! the width of the size field.

use crate::codec::{self, PayloadReader, WireSize};
use crate::error::CodecError;
use crate::opponent::{OpponentInfo, VehicleColor};
use serde::{Deserialize, Serialize};

pub const MAX_TCP_PAYLOAD_SIZE: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TcpPacketType {
    Name = 0,
    ProvideName = 1,
    NameTaken = 2,
    NameAccepted = 3,
    TimeUntilStart = 4,
    RaceStartCountdown = 5,
    ClientConnected = 6,
    ClientDisconnected = 7,
    LobbyClientList = 8,
    UdpInfo = 9,
    ClientGameLoaded = 10,
    StartGame = 11,
    OpponentsInfo = 12,
    LapCount = 13,
    LapsUpdate = 14,
}

impl TryFrom<u8> for TcpPacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Name,
            1 => Self::ProvideName,
            2 => Self::NameTaken,
            3 => Self::NameAccepted,
            4 => Self::TimeUntilStart,
            5 => Self::RaceStartCountdown,
            6 => Self::ClientConnected,
            7 => Self::ClientDisconnected,
            8 => Self::LobbyClientList,
            9 => Self::UdpInfo,
            10 => Self::ClientGameLoaded,
            11 => Self::StartGame,
            12 => Self::OpponentsInfo,
            13 => Self::LapCount,
            14 => Self::LapsUpdate,
            other => return Err(CodecError::UnknownPacketType(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpHeader {
    pub packet_type: u8,
    pub payload_size: u8,
}

impl WireSize for TcpHeader {
    const WIRE_SIZE: usize = 2;
}

/// A decoded control packet.
///
/// Which side sends which variant:
/// - client → server: `Name`, `UdpInfo`, `ClientGameLoaded`, `LapCount`
/// - server → client: everything else
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpPacket {
    Name(String),
    ProvideName,
    NameTaken,
    NameAccepted,
    TimeUntilStart(u32),
    RaceStartCountdown(u8),
    ClientConnected(String),
    ClientDisconnected(String),
    /// Nicknames of the other lobby members, NUL-terminated on the wire.
    LobbyClientList(Vec<String>),
    UdpInfo(u16),
    ClientGameLoaded,
    StartGame {
        grid_position: u8,
        color: VehicleColor,
    },
    OpponentsInfo(Vec<OpponentInfo>),
    LapCount(u8),
    LapsUpdate {
        client_id: u16,
        laps: u8,
    },
}

impl TcpPacket {
    pub fn packet_type(&self) -> TcpPacketType {
        match self {
            TcpPacket::Name(_) => TcpPacketType::Name,
            TcpPacket::ProvideName => TcpPacketType::ProvideName,
            TcpPacket::NameTaken => TcpPacketType::NameTaken,
            TcpPacket::NameAccepted => TcpPacketType::NameAccepted,
            TcpPacket::TimeUntilStart(_) => TcpPacketType::TimeUntilStart,
            TcpPacket::RaceStartCountdown(_) => TcpPacketType::RaceStartCountdown,
            TcpPacket::ClientConnected(_) => TcpPacketType::ClientConnected,
            TcpPacket::ClientDisconnected(_) => TcpPacketType::ClientDisconnected,
            TcpPacket::LobbyClientList(_) => TcpPacketType::LobbyClientList,
            TcpPacket::UdpInfo(_) => TcpPacketType::UdpInfo,
            TcpPacket::ClientGameLoaded => TcpPacketType::ClientGameLoaded,
            TcpPacket::StartGame { .. } => TcpPacketType::StartGame,
            TcpPacket::OpponentsInfo(_) => TcpPacketType::OpponentsInfo,
            TcpPacket::LapCount(_) => TcpPacketType::LapCount,
            TcpPacket::LapsUpdate { .. } => TcpPacketType::LapsUpdate,
        }
    }

    /// Encodes header and payload into one buffer.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let payload = self.encode_payload()?;
        if payload.len() > MAX_TCP_PAYLOAD_SIZE {
            return Err(CodecError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_TCP_PAYLOAD_SIZE,
            });
        }

        let header = TcpHeader {
            packet_type: self.packet_type() as u8,
            payload_size: payload.len() as u8,
        };
        let mut bytes = codec::serialize_with_size(&header, TcpHeader::WIRE_SIZE + payload.len())?;
        bytes[TcpHeader::WIRE_SIZE..].copy_from_slice(&payload);
        Ok(bytes)
    }

    fn encode_payload(&self) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        match self {
            TcpPacket::ProvideName
            | TcpPacket::NameTaken
            | TcpPacket::NameAccepted
            | TcpPacket::ClientGameLoaded => {}
            TcpPacket::Name(name)
            | TcpPacket::ClientConnected(name)
            | TcpPacket::ClientDisconnected(name) => payload.extend_from_slice(name.as_bytes()),
            TcpPacket::TimeUntilStart(secs) => payload.extend_from_slice(&secs.to_le_bytes()),
            TcpPacket::RaceStartCountdown(secs) => payload.push(*secs),
            TcpPacket::LobbyClientList(names) => {
                for name in names {
                    payload.extend_from_slice(name.as_bytes());
                    payload.push(0);
                }
            }
            TcpPacket::UdpInfo(port) => payload.extend_from_slice(&port.to_le_bytes()),
            TcpPacket::StartGame {
                grid_position,
                color,
            } => {
                payload.push(*grid_position);
                payload.extend_from_slice(&codec::serialize(color)?);
            }
            TcpPacket::OpponentsInfo(infos) => {
                for info in infos {
                    encode_opponent_info(info, &mut payload)?;
                }
            }
            TcpPacket::LapCount(laps) => payload.push(*laps),
            TcpPacket::LapsUpdate { client_id, laps } => {
                payload.extend_from_slice(&client_id.to_le_bytes());
                payload.push(*laps);
            }
        }
        Ok(payload)
    }

    /// Decodes a packet whose header has already been read off the stream.
    pub fn decode(header: &TcpHeader, payload: &[u8]) -> Result<TcpPacket, CodecError> {
        if payload.len() != header.payload_size as usize {
            return Err(CodecError::SizeMismatch {
                expected: header.payload_size as usize,
                actual: payload.len(),
            });
        }

        let packet_type = TcpPacketType::try_from(header.packet_type)?;
        let mut reader = PayloadReader::new(payload);
        let packet = match packet_type {
            TcpPacketType::ProvideName => TcpPacket::ProvideName,
            TcpPacketType::NameTaken => TcpPacket::NameTaken,
            TcpPacketType::NameAccepted => TcpPacket::NameAccepted,
            TcpPacketType::ClientGameLoaded => TcpPacket::ClientGameLoaded,
            // Requested names are validated by the server, so any byte
            // sequence decodes and invalid characters fail validation there.
            TcpPacketType::Name => {
                return Ok(TcpPacket::Name(String::from_utf8_lossy(payload).into_owned()))
            }
            TcpPacketType::ClientConnected => return Ok(TcpPacket::ClientConnected(text(payload)?)),
            TcpPacketType::ClientDisconnected => {
                return Ok(TcpPacket::ClientDisconnected(text(payload)?))
            }
            TcpPacketType::LobbyClientList => return decode_client_list(payload),
            TcpPacketType::OpponentsInfo => return decode_opponents_info(payload),
            TcpPacketType::TimeUntilStart => {
                TcpPacket::TimeUntilStart(codec::deserialize(reader.take(4)?, 4)?)
            }
            TcpPacketType::RaceStartCountdown => TcpPacket::RaceStartCountdown(reader.read_u8()?),
            TcpPacketType::UdpInfo => TcpPacket::UdpInfo(reader.read_u16()?),
            TcpPacketType::StartGame => TcpPacket::StartGame {
                grid_position: reader.read_u8()?,
                color: reader.read()?,
            },
            TcpPacketType::LapCount => TcpPacket::LapCount(reader.read_u8()?),
            TcpPacketType::LapsUpdate => TcpPacket::LapsUpdate {
                client_id: reader.read_u16()?,
                laps: reader.read_u8()?,
            },
        };
        reader.finish()?;
        Ok(packet)
    }
}

fn text(bytes: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidText)
}

fn decode_client_list(payload: &[u8]) -> Result<TcpPacket, CodecError> {
    let mut names = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Truncated {
                offset: payload.len() - rest.len(),
                needed: rest.len() + 1,
                size: payload.len(),
            })?;
        names.push(text(&rest[..end])?);
        rest = &rest[end + 1..];
    }
    Ok(TcpPacket::LobbyClientList(names))
}

fn encode_opponent_info(info: &OpponentInfo, payload: &mut Vec<u8>) -> Result<(), CodecError> {
    let name = info.nickname.as_bytes();
    if name.len() > u8::MAX as usize {
        return Err(CodecError::PayloadTooLarge {
            size: name.len(),
            max: u8::MAX as usize,
        });
    }
    payload.extend_from_slice(&info.id.to_le_bytes());
    payload.extend_from_slice(&codec::serialize(&info.color)?);
    payload.push(info.grid_position);
    payload.push(name.len() as u8);
    payload.extend_from_slice(name);
    Ok(())
}

fn decode_opponents_info(payload: &[u8]) -> Result<TcpPacket, CodecError> {
    let mut reader = PayloadReader::new(payload);
    let mut infos = Vec::new();
    while !reader.is_empty() {
        let id = reader.read_u16()?;
        let color = reader.read()?;
        let grid_position = reader.read_u8()?;
        let name_len = reader.read_u8()? as usize;
        let nickname = text(reader.take(name_len)?)?;
        infos.push(OpponentInfo {
            id,
            color,
            grid_position,
            nickname,
        });
    }
    Ok(TcpPacket::OpponentsInfo(infos))
}

/// Encoded size of one opponent entry.
fn opponent_info_size(info: &OpponentInfo) -> usize {
    2 + VehicleColor::WIRE_SIZE + 1 + 1 + info.nickname.len()
}

/// Splits opponent descriptions into as many packets as needed to keep each
/// payload within the size limit.
pub fn opponents_info_packets(infos: &[OpponentInfo]) -> Vec<TcpPacket> {
    let mut packets = Vec::new();
    let mut batch = Vec::new();
    let mut batch_size = 0;

    for info in infos {
        let size = opponent_info_size(info);
        if batch_size + size > MAX_TCP_PAYLOAD_SIZE && !batch.is_empty() {
            packets.push(TcpPacket::OpponentsInfo(std::mem::take(&mut batch)));
            batch_size = 0;
        }
        batch.push(info.clone());
        batch_size += size;
    }
    if !batch.is_empty() {
        packets.push(TcpPacket::OpponentsInfo(batch));
    }
    packets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: TcpPacket) -> TcpPacket {
        let bytes = packet.encode().unwrap();
        let header: TcpHeader = codec::deserialize(&bytes[..2], TcpHeader::WIRE_SIZE).unwrap();
        assert_eq!(header.payload_size as usize, bytes.len() - 2);
        TcpPacket::decode(&header, &bytes[2..]).unwrap()
    }

    fn opponent(id: u16, nickname: &str) -> OpponentInfo {
        OpponentInfo {
            id,
            color: VehicleColor::new(1, 2, 3),
            grid_position: id as u8,
            nickname: nickname.to_string(),
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = TcpPacket::TimeUntilStart(30).encode().unwrap();
        assert_eq!(bytes, vec![4, 4, 30, 0, 0, 0]);

        let bytes = TcpPacket::ProvideName.encode().unwrap();
        assert_eq!(bytes, vec![1, 0]);

        let bytes = TcpPacket::LapsUpdate {
            client_id: 0x0102,
            laps: 2,
        }
        .encode()
        .unwrap();
        assert_eq!(bytes, vec![14, 3, 0x02, 0x01, 2]);
    }

    #[test]
    fn test_lobby_list_is_nul_terminated() {
        let packet = TcpPacket::LobbyClientList(vec!["Alice".into(), "Bob".into()]);
        let bytes = packet.encode().unwrap();
        assert_eq!(&bytes[2..], b"Alice\0Bob\0");
        assert_eq!(roundtrip(packet.clone()), packet);

        let empty = TcpPacket::LobbyClientList(Vec::new());
        assert_eq!(empty.encode().unwrap(), vec![8, 0]);
        assert_eq!(roundtrip(empty.clone()), empty);
    }

    #[test]
    fn test_lobby_list_without_terminator_is_rejected() {
        let header = TcpHeader {
            packet_type: TcpPacketType::LobbyClientList as u8,
            payload_size: 3,
        };
        assert!(TcpPacket::decode(&header, b"Bob").is_err());
    }

    #[test]
    fn test_start_game_and_opponents_info() {
        let start = TcpPacket::StartGame {
            grid_position: 3,
            color: VehicleColor::new(10, 20, 30),
        };
        assert_eq!(start.encode().unwrap(), vec![11, 4, 3, 10, 20, 30]);
        assert_eq!(roundtrip(start.clone()), start);

        let info = TcpPacket::OpponentsInfo(vec![opponent(1, "Bob"), opponent(2, "Carol")]);
        assert_eq!(roundtrip(info.clone()), info);
    }

    #[test]
    fn test_payload_size_must_match_header() {
        let header = TcpHeader {
            packet_type: TcpPacketType::TimeUntilStart as u8,
            payload_size: 4,
        };
        assert!(TcpPacket::decode(&header, &[1, 0, 0]).is_err());

        // Header agrees with the buffer but the packet shape does not
        let header = TcpHeader {
            packet_type: TcpPacketType::LapCount as u8,
            payload_size: 2,
        };
        assert!(TcpPacket::decode(&header, &[1, 2]).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let header = TcpHeader {
            packet_type: 99,
            payload_size: 0,
        };
        match TcpPacket::decode(&header, &[]) {
            Err(CodecError::UnknownPacketType(99)) => {}
            other => panic!("expected unknown type, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_opponent_entry_rejected() {
        let mut payload = Vec::new();
        encode_opponent_info(&opponent(1, "Bob"), &mut payload).unwrap();
        payload.pop();

        let header = TcpHeader {
            packet_type: TcpPacketType::OpponentsInfo as u8,
            payload_size: payload.len() as u8,
        };
        assert!(matches!(
            TcpPacket::decode(&header, &payload),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let packet = TcpPacket::ClientConnected("x".repeat(300));
        assert!(matches!(
            packet.encode(),
            Err(CodecError::PayloadTooLarge { size: 300, .. })
        ));
    }

    #[test]
    fn test_opponents_info_split_keeps_every_entry() {
        let infos: Vec<_> = (0..12)
            .map(|id| opponent(id, &format!("racer-with-long-{:04}", id)))
            .collect();
        let packets = opponents_info_packets(&infos);
        assert!(packets.len() > 1);

        let mut collected = Vec::new();
        for packet in packets {
            let bytes = packet.encode().unwrap();
            assert!(bytes.len() - 2 <= MAX_TCP_PAYLOAD_SIZE);
            if let TcpPacket::OpponentsInfo(batch) = packet {
                collected.extend(batch);
            }
        }
        assert_eq!(collected, infos);
        assert!(opponents_info_packets(&[]).is_empty());
    }

    #[test]
    fn test_name_with_invalid_utf8_still_decodes() {
        let header = TcpHeader {
            packet_type: TcpPacketType::Name as u8,
            payload_size: 2,
        };
        match TcpPacket::decode(&header, &[0xff, b'a']).unwrap() {
            TcpPacket::Name(name) => assert!(!name.is_ascii()),
            other => panic!("unexpected packet {:?}", other),
        }
    }
}
