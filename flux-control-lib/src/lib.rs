//! # Flux Control Library for Magic Home LED Bulbs
//!
//! `flux-control-lib` is a Rust library for controlling Magic Home compatible
//! Wi-Fi LED bulbs. It speaks the vendor's plaintext binary protocol over a
//! persistent TCP connection and discovers bulbs on the local network via
//! UDP broadcast.
//!
//! This library is designed to be used by command-line tools or other client
//! applications that require control over networked light fixtures.
//!
//! ## Features
//!
//! - Bulb discovery on local networks via broadcast beacon
//! - Power and RGB color control over the bulb's TCP command port
//! - State queries decoded into typed power/mode/color values
//! - Event channels reporting connection, state and discovery changes
//!
//! ## Example
//!
//! Here is a simple example of how to use the library to discover bulbs on
//! your network:
//!
//! ```no_run
//! use flux_control_lib::util::discovery::find_bulbs;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover bulbs with a 5-second timeout
//!     let bulbs = find_bulbs(Duration::from_secs(5)).await?;
//!
//!     // Iterate over the discovered bulbs and print their details
//!     for bulb in bulbs {
//!         println!("Found bulb: {:?}", bulb);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any
//! way officially connected with Magic Home, Zengge, or their affiliates.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License,
//! Version 2.0. You may choose to use either license, depending on your
//! project needs.
// The `control_interface` module provides an interface for communicating with
// a single bulb over its TCP command port. It includes methods for connecting,
// querying bulb state, and switching power and color.
//
// Example usage:
//
// ```
// use flux_control_lib::control_interface::ControlInterface;
//
// #[tokio::main]
// async fn main() {
//     let mut bulb = ControlInterface::new("192.168.1.100");
//     bulb.connect().await.unwrap();
//     bulb.set_color(255, 64, 0).await.unwrap();
// }
// ```
pub mod control_interface;

// The `protocol` module contains the wire-level pieces of the bulb protocol:
// the checksum framing, the fixed command payloads, the state-reply decoder,
// and the FIFO response matcher that turns the raw byte stream into discrete
// replies. Everything in it is socket-free and directly testable.
pub mod protocol;

// The `util` module provides supporting functionality around the core
// protocol, most notably the UDP broadcast discovery session.
//
// Example usage:
//
// ```
// use flux_control_lib::util::discovery::find_bulbs;
// use std::time::Duration;
//
// #[tokio::main]
// async fn main() {
//     let bulbs = find_bulbs(Duration::from_secs(5)).await.unwrap();
//     for bulb in bulbs {
//         println!("Found bulb: {:?}", bulb);
//     }
// }
// ```
pub mod util;

mod error;

pub use error::ControlError;
