//! Fixed-rate state relay
//!
//! While a match is running, every tick drains the newest snapshot of each
//! racer and sends every racer the snapshots of all the others. Ticks are
//! scheduled from a fixed anchor (`next_tick += TICK_DURATION`) so scheduling
//! jitter never accumulates into drift.

use crate::context::ServerContext;
use crate::lifecycle::MatchPhase;
use log::{debug, error, info};
use shared::udp::opponent_state_packets;
use shared::{ClientState, VehicleStateSnapshot, TICK_DURATION};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{sleep_until, Instant};

const PROGRESS_LOG_INTERVAL: u32 = 100;

/// Builds the datagrams for one tick.
///
/// Each recipient gets the snapshots of every other client in `pending`,
/// ordered by client id and split into batches of at most five. Recipients
/// with nothing to receive are skipped.
pub fn build_fanout(
    pending: &HashMap<u16, VehicleStateSnapshot>,
    recipients: &[(u16, SocketAddr)],
    sequence_id: u32,
) -> Vec<(SocketAddr, Vec<u8>)> {
    let mut states: Vec<ClientState> = pending
        .iter()
        .map(|(client_id, snapshot)| ClientState {
            client_id: *client_id,
            snapshot: *snapshot,
        })
        .collect();
    states.sort_unstable_by_key(|state| state.client_id);

    let mut datagrams = Vec::new();
    for (recipient, addr) in recipients {
        let others: Vec<ClientState> = states
            .iter()
            .filter(|state| state.client_id != *recipient)
            .copied()
            .collect();
        if others.is_empty() {
            continue;
        }

        for packet in opponent_state_packets(sequence_id, &others) {
            match packet.encode() {
                Ok(bytes) => datagrams.push((*addr, bytes)),
                Err(e) => error!("Failed to encode states for client {}: {}", recipient, e),
            }
        }
    }
    datagrams
}

pub struct MatchLoop {
    context: Arc<ServerContext>,
    socket: Arc<UdpSocket>,
    tick: u32,
}

impl MatchLoop {
    pub fn new(context: Arc<ServerContext>, socket: Arc<UdpSocket>) -> Self {
        Self {
            context,
            socket,
            tick: 0,
        }
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    /// Ticks until the match phase leaves `Running`.
    pub async fn run(&mut self) {
        let mut phase = self.context.lifecycle.subscribe();
        let started = Instant::now();
        let mut next_tick = started + TICK_DURATION;

        info!("Match loop started");

        while *phase.borrow_and_update() == MatchPhase::Running {
            tokio::select! {
                _ = sleep_until(next_tick) => {}
                changed = phase.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            next_tick += TICK_DURATION;

            let (racers, relayed, sent) = self.run_tick().await;

            if self.tick % PROGRESS_LOG_INTERVAL == 0 {
                let scheduled = started + TICK_DURATION * self.tick;
                debug!(
                    "Tick {}: {} racers, {} states relayed in {} datagrams, {:?} behind schedule",
                    self.tick,
                    racers,
                    relayed,
                    sent,
                    Instant::now().saturating_duration_since(scheduled)
                );
            }
        }

        info!("Match loop stopped after {} ticks", self.tick);
    }

    /// One relay step. Returns `(reachable racers, states relayed, datagrams sent)`.
    pub async fn run_tick(&mut self) -> (usize, usize, usize) {
        self.tick = self.tick.wrapping_add(1);

        let pending = std::mem::take(&mut *self.context.latest_states.lock().await);
        let recipients = self.context.clients.read().await.racer_addrs();
        if pending.is_empty() {
            return (recipients.len(), 0, 0);
        }

        let datagrams = build_fanout(&pending, &recipients, self.tick);
        let mut sent = 0;
        for (addr, bytes) in &datagrams {
            match self.socket.send_to(bytes, addr).await {
                Ok(_) => sent += 1,
                Err(e) => debug!("Failed to send states to {}: {}", addr, e),
            }
        }
        (recipients.len(), pending.len(), sent)
    }

    /// Drops anything left over so the next match starts clean.
    pub async fn reset(&mut self) {
        self.context.latest_states.lock().await.clear();
        self.tick = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client_manager::LobbyState;
    use crate::config::ServerConfig;
    use shared::{Transform, UdpPacket};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn snapshot(x: f32) -> VehicleStateSnapshot {
        VehicleStateSnapshot {
            transform: Transform::from_translation([x, 0.0, 0.0]),
            ..VehicleStateSnapshot::default()
        }
    }

    fn decode_states(bytes: &[u8]) -> (u32, Vec<u16>) {
        match UdpPacket::decode(bytes).unwrap() {
            UdpPacket::OpponentStates {
                sequence_id,
                states,
            } => (sequence_id, states.iter().map(|s| s.client_id).collect()),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn test_fanout_excludes_recipient() {
        let pending: HashMap<u16, VehicleStateSnapshot> =
            [(0, snapshot(0.0)), (1, snapshot(1.0)), (2, snapshot(2.0))]
                .into_iter()
                .collect();
        let recipients = vec![(0, addr(6000)), (1, addr(6001)), (2, addr(6002))];

        let datagrams = build_fanout(&pending, &recipients, 42);
        assert_eq!(datagrams.len(), 3);

        for (i, (to, bytes)) in datagrams.iter().enumerate() {
            assert_eq!(*to, recipients[i].1);
            let (sequence_id, ids) = decode_states(bytes);
            assert_eq!(sequence_id, 42);
            assert_eq!(ids.len(), 2);
            assert!(!ids.contains(&recipients[i].0));
        }
    }

    #[test]
    fn test_fanout_skips_lone_sender() {
        let pending: HashMap<u16, VehicleStateSnapshot> = [(0, snapshot(0.0))].into_iter().collect();
        let recipients = vec![(0, addr(6000)), (1, addr(6001))];

        let datagrams = build_fanout(&pending, &recipients, 1);
        assert_eq!(datagrams.len(), 1);
        assert_eq!(datagrams[0].0, addr(6001));
        assert_eq!(decode_states(&datagrams[0].1).1, vec![0]);
    }

    #[test]
    fn test_fanout_batches_of_five() {
        let pending: HashMap<u16, VehicleStateSnapshot> =
            (0..7).map(|id| (id, snapshot(id as f32))).collect();
        let recipients = vec![(7, addr(6007))];

        let datagrams = build_fanout(&pending, &recipients, 3);
        assert_eq!(datagrams.len(), 2);
        assert_eq!(decode_states(&datagrams[0].1).1, vec![0, 1, 2, 3, 4]);
        assert_eq!(decode_states(&datagrams[1].1).1, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_tick_relays_and_drains() {
        let context = Arc::new(ServerContext::new(ServerConfig::default()));
        let server_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        {
            let mut clients = context.clients.write().await;
            for (peer, udp) in [(addr(5000), None), (addr(5001), Some(receiver.local_addr().unwrap()))] {
                let (tx, _rx) = mpsc::unbounded_channel();
                let id = {
                    let session = clients.new_client(peer, tx).unwrap();
                    session.advance_to(LobbyState::InLobby);
                    session.advance_to(LobbyState::InGame);
                    session.id
                };
                if let Some(udp) = udp {
                    clients.update_udp_address(id, udp);
                }
            }
        }
        context.latest_states.lock().await.insert(0, snapshot(9.0));

        let mut match_loop = MatchLoop::new(Arc::clone(&context), server_socket);
        let (racers, relayed, _) = match_loop.run_tick().await;
        // Only the racer with a known data address is a recipient
        assert_eq!(racers, 1);
        assert_eq!(relayed, 1);
        assert!(context.latest_states.lock().await.is_empty());

        let mut buffer = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        match UdpPacket::decode(&buffer[..len]).unwrap() {
            UdpPacket::OpponentStates {
                sequence_id,
                states,
            } => {
                assert_eq!(sequence_id, 1);
                assert_eq!(states.len(), 1);
                assert_eq!(states[0].client_id, 0);
                assert_eq!(states[0].snapshot.transform.position()[0], 9.0);
            }
            other => panic!("unexpected packet {:?}", other),
        }

        // Nothing pending on the next tick
        let (_, relayed, sent) = match_loop.run_tick().await;
        assert_eq!((relayed, sent), (0, 0));
    }

    #[tokio::test]
    async fn test_run_exits_when_match_finishes() {
        let context = Arc::new(ServerContext::new(ServerConfig::default()));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        context.lifecycle.start_race();

        let handle = {
            let context = Arc::clone(&context);
            tokio::spawn(async move {
                let mut match_loop = MatchLoop::new(context, socket);
                match_loop.run().await;
                match_loop
            })
        };

        tokio::time::sleep(TICK_DURATION * 4).await;
        context.lifecycle.finish();

        let mut match_loop = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .unwrap();
        assert!(match_loop.tick_count() >= 2);

        match_loop.reset().await;
        assert_eq!(match_loop.tick_count(), 0);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_outside_race() {
        let context = Arc::new(ServerContext::new(ServerConfig::default()));
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let mut match_loop = MatchLoop::new(context, socket);

        tokio::time::timeout(Duration::from_millis(100), match_loop.run())
            .await
            .expect("loop should not start");
        assert_eq!(match_loop.tick_count(), 0);
    }
}
