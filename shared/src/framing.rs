//! Async framing for control packets on a byte stream
//!
//! A frame is the 2-byte `TcpHeader` followed by exactly `payload_size` bytes.
//! Reads never hand back a partial frame: the header is read in full, then the
//! payload in full, or the call fails.

use crate::codec::{self, WireSize};
use crate::tcp::{TcpHeader, TcpPacket};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one raw frame.
///
/// Returns `UnexpectedEof` if the stream closes before or inside a frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<(TcpHeader, Vec<u8>)> {
    let mut header_buf = [0u8; TcpHeader::WIRE_SIZE];
    reader.read_exact(&mut header_buf).await?;
    let header: TcpHeader = codec::deserialize(&header_buf, TcpHeader::WIRE_SIZE)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut payload = vec![0u8; header.payload_size as usize];
    reader.read_exact(&mut payload).await?;
    Ok((header, payload))
}

/// Encodes `packet` and writes all of it.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &TcpPacket) -> io::Result<()> {
    let bytes = packet
        .encode()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::TcpPacketType;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_frame_across_partial_reads() {
        // Header and payload split over several reads
        let mut mock = Builder::new()
            .read(&[TcpPacketType::TimeUntilStart as u8])
            .read(&[4, 10])
            .read(&[0, 0])
            .read(&[0])
            .build();

        let (header, payload) = read_frame(&mut mock).await.unwrap();
        assert_eq!(header.packet_type, TcpPacketType::TimeUntilStart as u8);
        assert_eq!(
            TcpPacket::decode(&header, &payload).unwrap(),
            TcpPacket::TimeUntilStart(10)
        );
    }

    #[tokio::test]
    async fn test_read_frame_eof_inside_payload() {
        let mut mock = Builder::new().read(&[TcpPacketType::Name as u8, 5]).read(b"Ali").build();

        let err = read_frame(&mut mock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_consecutive_frames() {
        let mut mock = Builder::new()
            .read(&[TcpPacketType::ProvideName as u8, 0, TcpPacketType::Name as u8, 3])
            .read(b"Bob")
            .build();

        let (first, payload) = read_frame(&mut mock).await.unwrap();
        assert_eq!(TcpPacket::decode(&first, &payload).unwrap(), TcpPacket::ProvideName);

        let (second, payload) = read_frame(&mut mock).await.unwrap();
        assert_eq!(
            TcpPacket::decode(&second, &payload).unwrap(),
            TcpPacket::Name("Bob".to_string())
        );
    }

    #[tokio::test]
    async fn test_write_packet() {
        let mut mock = Builder::new().write(&[TcpPacketType::LapCount as u8, 1, 2]).build();
        write_packet(&mut mock, &TcpPacket::LapCount(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_oversized_packet_fails_before_writing() {
        let mut mock = Builder::new().build();
        let err = write_packet(&mut mock, &TcpPacket::Name("n".repeat(256)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
