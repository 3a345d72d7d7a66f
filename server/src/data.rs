//! Vehicle state intake over UDP
//!
//! Datagrams are checked before anything else: a bad checksum or a malformed
//! body drops the datagram without a reply. Senders are identified by their
//! UDP address through the registry.

use crate::client_manager::LobbyState;
use crate::context::ServerContext;
use crate::lifecycle::MatchPhase;
use log::{debug, error, info, trace};
use shared::udp::MAX_UDP_PACKET_SIZE;
use shared::UdpPacket;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

/// Receive loop for the data plane.
pub struct DataChannel {
    socket: Arc<UdpSocket>,
    context: Arc<ServerContext>,
}

impl DataChannel {
    pub fn new(socket: Arc<UdpSocket>, context: Arc<ServerContext>) -> Self {
        Self { socket, context }
    }

    pub async fn run(self) -> io::Result<()> {
        info!("Data channel listening on {}", self.socket.local_addr()?);
        self.context.mark_udp_ready();

        let mut buffer = [0u8; 2048];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    let Some(reply) = handle_datagram(&self.context, &buffer[..len], addr).await else {
                        continue;
                    };
                    match reply.encode() {
                        Ok(bytes) => {
                            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                                error!("Failed to reply to {}: {}", addr, e);
                            }
                        }
                        Err(e) => error!("Failed to encode reply: {}", e),
                    }
                }
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Applies one datagram to the shared state and returns the reply, if any.
pub async fn handle_datagram(context: &ServerContext, bytes: &[u8], from: SocketAddr) -> Option<UdpPacket> {
    if bytes.len() > MAX_UDP_PACKET_SIZE {
        debug!("Dropping oversized datagram ({} bytes) from {}", bytes.len(), from);
        return None;
    }
    let packet = match UdpPacket::decode(bytes) {
        Ok(packet) => packet,
        Err(e) => {
            debug!("Dropping datagram from {}: {}", from, e);
            return None;
        }
    };

    let mut clients = context.clients.write().await;

    let Some(id) = clients.get_by_udp_addr(from).map(|s| s.id) else {
        if !(context.config.discover && matches!(packet, UdpPacket::Ping { .. })) {
            debug!("Dropping datagram from unknown sender {}", from);
            return None;
        }
        let id = *clients.unconfirmed_with_ip(from.ip()).first()?;
        if !clients.update_udp_address(id, from) {
            return None;
        }
        info!("Discovered UDP address {} for client {}", from, id);
        return Some(UdpPacket::Ping {
            sequence_id: id as u32,
        });
    };

    match packet {
        UdpPacket::Ping { .. } => Some(UdpPacket::Ping {
            sequence_id: id as u32,
        }),
        UdpPacket::State {
            sequence_id,
            snapshot,
        } => {
            if context.lifecycle.current() != MatchPhase::Running {
                return None;
            }
            let session = clients.get_mut(id)?;
            if session.lobby_state() != LobbyState::InGame {
                return None;
            }
            if !session.accept_sequence(sequence_id) {
                trace!("Client {} stale state {}", id, sequence_id);
                return None;
            }
            context.latest_states.lock().await.insert(id, snapshot);
            None
        }
        UdpPacket::OpponentStates { .. } => {
            debug!("Client {} sent a server-only packet", id);
            None
        }
    }
}
