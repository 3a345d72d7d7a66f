//! Performance benchmarks for the per-tick hot paths
//!
//! Bounds are generous; these catch order-of-magnitude regressions, not noise.

use client::data::apply_datagram;
use client::opponents::OpponentRoster;
use client::vehicle::HeadlessFactory;
use server::match_loop::build_fanout;
use shared::{ClientState, InputBitmap, Transform, UdpPacket, VehicleStateSnapshot, MAX_PLAYERS};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

fn snapshot(i: u16) -> VehicleStateSnapshot {
    VehicleStateSnapshot {
        transform: Transform::from_translation([i as f32, 0.5, -(i as f32)]),
        velocity: [1.0, 0.0, 20.0],
        steering_angle: 0.1,
        inputs: InputBitmap(InputBitmap::THROTTLE | InputBitmap::LEFT),
    }
}

fn full_lobby() -> (HashMap<u16, VehicleStateSnapshot>, Vec<(u16, SocketAddr)>) {
    let pending = (0..MAX_PLAYERS as u16).map(|i| (i, snapshot(i))).collect();
    let recipients = (0..MAX_PLAYERS as u16)
        .map(|i| (i, SocketAddr::from(([127, 0, 0, 1], 40000 + i))))
        .collect();
    (pending, recipients)
}

/// Benchmarks encoding plus checksumming of client state datagrams
#[test]
fn benchmark_state_encode() {
    let packet = UdpPacket::State {
        sequence_id: 7,
        snapshot: snapshot(3),
    };

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = packet.encode().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "State encode: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks validating and decoding a full opponent batch
#[test]
fn benchmark_batch_decode() {
    let states: Vec<ClientState> = (0..5)
        .map(|i| ClientState {
            client_id: i,
            snapshot: snapshot(i),
        })
        .collect();
    let bytes = UdpPacket::OpponentStates {
        sequence_id: 99,
        states,
    }
    .encode()
    .unwrap();

    let iterations = 50_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = UdpPacket::decode(&bytes).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Batch decode: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks one relay tick for a full server
#[test]
fn benchmark_fanout_full_lobby() {
    let (pending, recipients) = full_lobby();

    let iterations = 10_000;
    let start = Instant::now();

    let mut datagrams = 0;
    for tick in 0..iterations {
        datagrams += build_fanout(&pending, &recipients, tick).len();
    }

    let duration = start.elapsed();
    println!(
        "Fan-out for {} racers: {} ticks in {:?} ({:.2} μs/tick)",
        MAX_PLAYERS,
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Seven opponents per racer need two datagrams each
    assert_eq!(datagrams, iterations as usize * MAX_PLAYERS * 2);
    // A tick is 31.25ms; the relay work must be a small fraction of it
    assert!(duration.as_micros() / (iterations as u128) < 5_000);
}

/// Benchmarks the client applying received batches to its roster
#[test]
fn benchmark_roster_apply() {
    let mut roster = OpponentRoster::new(Arc::new(HeadlessFactory));
    roster.set_local_id(0);
    let (pending, recipients) = full_lobby();
    let datagrams: Vec<Vec<u8>> = (1..=1000)
        .flat_map(|tick| build_fanout(&pending, &recipients[..1], tick))
        .map(|(_, bytes)| bytes)
        .collect();

    let mut newest = None;
    let start = Instant::now();

    let mut applied = 0;
    for bytes in &datagrams {
        applied += apply_datagram(bytes, &mut newest, &mut roster);
        roster.apply_last_inputs(1.0 / 32.0);
    }

    let duration = start.elapsed();
    println!(
        "Roster apply: {} datagrams in {:?} ({:.2} μs/datagram)",
        datagrams.len(),
        duration,
        duration.as_micros() as f64 / datagrams.len() as f64
    );

    assert_eq!(applied, 1000 * (MAX_PLAYERS - 1));
    assert_eq!(roster.len(), MAX_PLAYERS - 1);
    assert!(duration.as_millis() < 2000);
}
