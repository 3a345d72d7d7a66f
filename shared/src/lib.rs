//! Wire protocol shared by the race server and its clients
//!
//! Two transports carry the game:
//! - a reliable stream for the lobby and match control ([`tcp`], framed by [`framing`])
//! - checksummed datagrams for vehicle state ([`udp`])
//!
//! Both are encoded with the fixed-layout [`codec`]. Timing and limits that
//! both sides must agree on live here.

pub mod codec;
pub mod error;
pub mod framing;
pub mod opponent;
pub mod snapshot;
pub mod tcp;
pub mod udp;

use std::time::Duration;

pub use codec::WireSize;
pub use error::CodecError;
pub use opponent::{OpponentInfo, VehicleColor};
pub use snapshot::{ControlState, InputBitmap, Transform, VehicleStateSnapshot};
pub use tcp::TcpPacket;
pub use udp::{ClientState, UdpPacket};

/// State relay ticks per second.
pub const TICK_RATE: u32 = 32;

/// Time between two ticks, exactly 1/32 s.
pub const TICK_DURATION: Duration = Duration::from_nanos(1_000_000_000 / TICK_RATE as u64);

pub const MAX_NICKNAME_LENGTH: usize = 20;

pub const DEFAULT_PORT: u16 = 1313;

/// Size of the starting grid, and so of a race.
pub const MAX_PLAYERS: usize = opponent::STARTING_POSITIONS.len();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_duration() {
        assert_eq!(TICK_DURATION, Duration::from_micros(31_250));
        assert_eq!(TICK_DURATION * TICK_RATE, Duration::from_secs(1));
    }

    #[test]
    fn test_udp_datagram_fits_limit() {
        assert!(udp::MAX_UDP_PACKET_SIZE < 508);
        assert_eq!(MAX_PLAYERS, 8);
    }
}
