//! # Race Client Library
//!
//! Client side of the race netcode: joins the lobby over TCP, negotiates a
//! nickname, then streams the local vehicle over UDP while applying opponent
//! states relayed by the server.
//!
//! ## Architecture Overview
//!
//! ### Control Channel (`control`)
//! A reader task turns incoming frames into `TcpPacket`s on a channel; the
//! session writes packets back through a [`control::ControlLink`]. A hang-up
//! from the server closes the channel and ends the session.
//!
//! ### Data Channel (`data`)
//! A connected UDP socket with two tasks:
//! - Sender: pings until the server reports the client id, then sends the
//!   local snapshot once per tick with an increasing sequence id
//! - Receiver: drops datagrams that fail the checksum, skips batches older than
//!   the newest one seen and applies the rest to the opponent roster
//!
//! ### Session (`session`)
//! Drives the match from the client's point of view: nickname prompt, lobby
//! list and countdown, spawning the local vehicle at its grid slot on
//! `StartGame`, the race start countdown and lap reports.
//!
//! ### Vehicles (`vehicle`, `opponents`)
//! Physics and rendering sit behind the [`vehicle::Vehicle`] and
//! [`vehicle::VehicleFactory`] traits. [`vehicle::HeadlessVehicle`] is a
//! kinematic stand-in used by the command line client and the tests.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::session::{ClientConfig, Session};
//! use client::vehicle::HeadlessFactory;
//! use std::sync::Arc;
//!
//! # async fn run() -> std::io::Result<()> {
//! let config = ClientConfig {
//!     name: Some("Alice".to_string()),
//!     throttle: true,
//!     ..ClientConfig::default()
//! };
//! let (_input_tx, input_rx) = tokio::sync::mpsc::unbounded_channel();
//! Session::new(config, Arc::new(HeadlessFactory)).run(input_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod control;
pub mod countdown;
pub mod data;
pub mod laps;
pub mod lobby;
pub mod opponents;
pub mod session;
pub mod vehicle;
