//! Client side of the UDP data channel
//!
//! A sender task pings until the server tells us our client id, then streams
//! the local vehicle's state once per tick. A receiver task validates every
//! datagram and applies opponent batches to the roster.

use crate::opponents::OpponentRoster;
use log::{debug, info, trace, warn};
use shared::udp::MAX_UDP_PACKET_SIZE;
use shared::{UdpPacket, VehicleStateSnapshot, TICK_DURATION};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Ticks between pings while the client id is unknown.
const PING_INTERVAL_TICKS: u64 = 8;

pub struct DataLink {
    socket: Arc<UdpSocket>,
}

impl DataLink {
    /// Binds an ephemeral port and connects it to the server's data address.
    pub async fn bind(server: SocketAddr) -> io::Result<Self> {
        let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!("Data channel bound to {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Starts the per-tick sender.
    ///
    /// States are only sent while `local_state` holds a snapshot.
    pub fn spawn_sender(
        &self,
        mut local_state: watch::Receiver<Option<VehicleStateSnapshot>>,
        roster: Arc<Mutex<OpponentRoster>>,
    ) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_DURATION);
            let mut tick: u64 = 0;
            let mut sequence_id: u32 = 0;

            loop {
                interval.tick().await;
                tick += 1;

                if tick % PING_INTERVAL_TICKS == 1 && roster.lock().await.local_id().is_none() {
                    send(&socket, &UdpPacket::Ping { sequence_id: 0 }).await;
                }

                let snapshot = *local_state.borrow_and_update();
                if let Some(snapshot) = snapshot {
                    sequence_id = sequence_id.wrapping_add(1);
                    send(&socket, &UdpPacket::State { sequence_id, snapshot }).await;
                }
            }
        })
    }

    /// Starts the receiver, which runs until the socket fails.
    pub fn spawn_receiver(&self, roster: Arc<Mutex<OpponentRoster>>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_UDP_PACKET_SIZE];
            let mut newest_sequence = None;

            loop {
                match socket.recv(&mut buf).await {
                    Ok(len) => {
                        let mut guard = roster.lock().await;
                        apply_datagram(&buf[..len], &mut newest_sequence, &mut guard);
                    }
                    Err(e) => {
                        warn!("Data channel receive error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }
}

async fn send(socket: &UdpSocket, packet: &UdpPacket) {
    match packet.encode() {
        Ok(bytes) => {
            if let Err(e) = socket.send(&bytes).await {
                debug!("Data channel send failed: {}", e);
            }
        }
        Err(e) => warn!("Failed to encode {:?}: {}", packet.packet_type(), e),
    }
}

/// Handles one received datagram. Returns how many opponent states were applied.
///
/// Corrupt datagrams are dropped. Batches older than the newest seen are
/// skipped; batches sharing the newest sequence id all apply, since one tick
/// may span several datagrams.
pub fn apply_datagram(bytes: &[u8], newest_sequence: &mut Option<u32>, roster: &mut OpponentRoster) -> usize {
    let packet = match UdpPacket::decode(bytes) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("Dropping datagram: {}", e);
            return 0;
        }
    };

    match packet {
        UdpPacket::Ping { sequence_id } => {
            let id = sequence_id as u16;
            if roster.local_id() != Some(id) {
                info!("Data channel confirmed, client id {}", id);
                roster.set_local_id(id);
            }
            0
        }
        UdpPacket::OpponentStates { sequence_id, states } => {
            if let Some(newest) = *newest_sequence {
                if sequence_id < newest {
                    trace!("Skipping stale batch {} (newest {})", sequence_id, newest);
                    return 0;
                }
            }
            *newest_sequence = Some(sequence_id);
            roster.apply_batch(&states)
        }
        UdpPacket::State { .. } => {
            debug!("Ignoring unexpected State datagram");
            0
        }
    }
}
