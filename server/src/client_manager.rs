//! Registry of connected clients
//!
//! Every session is reachable three ways:
//! - by its client id, which the data plane and fan-out use
//! - by the TCP peer address, which identifies the control connection
//! - by its UDP address once learned, which identifies incoming datagrams
//!
//! The UDP index only holds addresses a client reported or was discovered at.
//! A TCP peer address is never entered there, so a control connection can
//! never shadow another session's data address.

use log::{debug, info};
use shared::{TcpPacket, VehicleColor};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Where a session is in the join flow. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LobbyState {
    WaitingForNick,
    InLobby,
    InGame,
}

impl LobbyState {
    /// Sessions other players can see.
    pub fn is_visible(&self) -> bool {
        matches!(self, LobbyState::InLobby | LobbyState::InGame)
    }

    fn next(&self) -> Option<LobbyState> {
        match self {
            LobbyState::WaitingForNick => Some(LobbyState::InLobby),
            LobbyState::InLobby => Some(LobbyState::InGame),
            LobbyState::InGame => None,
        }
    }
}

/// Server-side state for one connected client.
#[derive(Debug)]
pub struct ClientSession {
    pub id: u16,
    /// TCP peer address, the key of the control connection
    pub peer: SocketAddr,
    /// Outbound queue drained by the connection's writer task
    control: mpsc::UnboundedSender<TcpPacket>,
    /// Where state datagrams for this client go, once known
    pub udp_address: Option<SocketAddr>,
    pub nickname: String,
    lobby_state: LobbyState,
    pub grid_position: u8,
    pub color: VehicleColor,
    last_accepted_sequence: Option<u32>,
    pub lap_count: u8,
    pub game_loaded: bool,
}

impl ClientSession {
    fn new(id: u16, peer: SocketAddr, control: mpsc::UnboundedSender<TcpPacket>) -> Self {
        Self {
            id,
            peer,
            control,
            udp_address: None,
            nickname: String::new(),
            lobby_state: LobbyState::WaitingForNick,
            grid_position: id as u8,
            color: VehicleColor::new(255, 255, 255),
            last_accepted_sequence: None,
            lap_count: 0,
            game_loaded: false,
        }
    }

    pub fn lobby_state(&self) -> LobbyState {
        self.lobby_state
    }

    /// True once the data plane address was learned.
    pub fn udp_confirmed(&self) -> bool {
        self.udp_address.is_some()
    }

    /// Moves to the next lobby state. Returns false, leaving the state
    /// untouched, for anything but the single forward step.
    pub fn advance_to(&mut self, next: LobbyState) -> bool {
        if self.lobby_state.next() == Some(next) {
            debug!("Client {} {:?} -> {:?}", self.id, self.lobby_state, next);
            self.lobby_state = next;
            true
        } else {
            false
        }
    }

    /// Queues a packet for the writer task. False once the connection is gone.
    pub fn send(&self, packet: TcpPacket) -> bool {
        self.control.send(packet).is_ok()
    }

    /// Accepts `sequence_id` only if it is newer than anything accepted before.
    pub fn accept_sequence(&mut self, sequence_id: u32) -> bool {
        match self.last_accepted_sequence {
            Some(last) if sequence_id <= last => false,
            _ => {
                self.last_accepted_sequence = Some(sequence_id);
                true
            }
        }
    }
}

/// Owns every session and the indices over them.
pub struct ClientManager {
    sessions: HashMap<u16, ClientSession>,
    by_peer: HashMap<SocketAddr, u16>,
    by_udp: HashMap<SocketAddr, u16>,
    next_client_id: u16,
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty registry. Client ids start at 0.
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_peer: HashMap::new(),
            by_udp: HashMap::new(),
            next_client_id: 0,
            max_clients,
        }
    }

    /// Registers a new control connection.
    ///
    /// Returns None if the server is at capacity. The session has no UDP
    /// address until `update_udp_address` sets one.
    pub fn new_client(
        &mut self,
        peer: SocketAddr,
        control: mpsc::UnboundedSender<TcpPacket>,
    ) -> Option<&mut ClientSession> {
        if self.is_full() || self.by_peer.contains_key(&peer) {
            return None;
        }

        let id = self.next_client_id;
        self.next_client_id = self.next_client_id.wrapping_add(1);

        info!("Client {} connected from {}", id, peer);
        self.by_peer.insert(peer, id);
        self.sessions.insert(id, ClientSession::new(id, peer, control));
        self.sessions.get_mut(&id)
    }

    pub fn get(&self, id: u16) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&id)
    }

    pub fn get_by_peer(&self, peer: SocketAddr) -> Option<&ClientSession> {
        self.by_peer.get(&peer).and_then(|id| self.sessions.get(id))
    }

    pub fn get_by_peer_mut(&mut self, peer: SocketAddr) -> Option<&mut ClientSession> {
        let id = *self.by_peer.get(&peer)?;
        self.sessions.get_mut(&id)
    }

    pub fn get_by_udp_addr(&self, addr: SocketAddr) -> Option<&ClientSession> {
        self.by_udp.get(&addr).and_then(|id| self.sessions.get(id))
    }

    /// Points a session's data plane at `new_addr` and marks it confirmed.
    ///
    /// Returns false if the session is unknown or another session already
    /// owns that address.
    pub fn update_udp_address(&mut self, id: u16, new_addr: SocketAddr) -> bool {
        if let Some(owner) = self.by_udp.get(&new_addr) {
            if *owner != id {
                return false;
            }
        }
        let Some(session) = self.sessions.get_mut(&id) else {
            return false;
        };

        if let Some(old) = session.udp_address.replace(new_addr) {
            if self.by_udp.get(&old) == Some(&id) {
                self.by_udp.remove(&old);
            }
            debug!("Client {} UDP address {} -> {}", id, old, new_addr);
        } else {
            debug!("Client {} UDP address set to {}", id, new_addr);
        }
        self.by_udp.insert(new_addr, id);
        true
    }

    /// Unconfirmed sessions whose control connection comes from `ip`.
    pub fn unconfirmed_with_ip(&self, ip: std::net::IpAddr) -> Vec<u16> {
        let mut ids: Vec<u16> = self
            .sessions
            .values()
            .filter(|s| !s.udp_confirmed() && s.peer.ip() == ip)
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drops a session and every index entry pointing at it.
    ///
    /// Dropping the session's outbound queue ends its writer task, which
    /// closes the connection.
    pub fn remove(&mut self, peer: SocketAddr) -> Option<ClientSession> {
        let id = self.by_peer.remove(&peer)?;
        let session = self.sessions.remove(&id)?;
        if let Some(addr) = session.udp_address {
            if self.by_udp.get(&addr) == Some(&id) {
                self.by_udp.remove(&addr);
            }
        }
        info!("Client {} ({}) removed", id, peer);
        Some(session)
    }

    /// Closes every connection and starts id allocation over.
    pub fn reset_all(&mut self) {
        if !self.sessions.is_empty() {
            info!("Closing {} remaining connections", self.sessions.len());
        }
        self.sessions.clear();
        self.by_peer.clear();
        self.by_udp.clear();
        self.next_client_id = 0;
    }

    /// True if a visible session already uses `nickname`.
    pub fn nickname_taken(&self, nickname: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.lobby_state.is_visible() && s.nickname == nickname)
    }

    /// Nicknames of lobby members other than `exclude`, in join order.
    pub fn lobby_nicknames(&self, exclude: u16) -> Vec<String> {
        self.ids_in_state(LobbyState::InLobby)
            .into_iter()
            .filter(|id| *id != exclude)
            .filter_map(|id| self.sessions.get(&id).map(|s| s.nickname.clone()))
            .collect()
    }

    pub fn count_in_state(&self, state: LobbyState) -> usize {
        self.sessions
            .values()
            .filter(|s| s.lobby_state == state)
            .count()
    }

    /// Ids of sessions in `state`, in registration order.
    pub fn ids_in_state(&self, state: LobbyState) -> Vec<u16> {
        let mut ids: Vec<u16> = self
            .sessions
            .values()
            .filter(|s| s.lobby_state == state)
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Sends `packet` to every session whose state passes `filter`, skipping `exclude`.
    pub fn broadcast<F>(&self, packet: &TcpPacket, exclude: Option<u16>, filter: F)
    where
        F: Fn(LobbyState) -> bool,
    {
        for session in self.sessions.values() {
            if Some(session.id) == exclude || !filter(session.lobby_state) {
                continue;
            }
            if !session.send(packet.clone()) {
                debug!("Client {} control queue closed", session.id);
            }
        }
    }

    /// `(id, udp address)` of every racer with a known data address, used
    /// for state fan-out.
    pub fn racer_addrs(&self) -> Vec<(u16, SocketAddr)> {
        let mut addrs: Vec<(u16, SocketAddr)> = self
            .sessions
            .values()
            .filter(|s| s.lobby_state == LobbyState::InGame)
            .filter_map(|s| s.udp_address.map(|addr| (s.id, addr)))
            .collect();
        addrs.sort_unstable_by_key(|(id, _)| *id);
        addrs
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_clients
    }
}
