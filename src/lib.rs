//! Rust library for controlling network-attached A/V receivers
//!
//! This library provides an async API for controlling audio/video
//! receivers (Denon/Marantz, Yamaha) over their line-oriented telnet
//! control protocols. It supports:
//!
//! - Typed shared variables (power, volume, input source, ...) polled,
//!   cached and kept synchronized with the receiver
//! - Automatic reconnection with keep-alive and a fixed backoff
//! - Deferred calls that wait for the variables they need
//! - Real-time event subscriptions with state replay
//! - An in-process emulated receiver for testing without hardware
//!
//! # Quick Start
//!
//! ```no_run
//! use netavr::AvrClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect to a Yamaha receiver on the default telnet port
//!     let client = AvrClient::connect_uri("yamaha://192.168.1.40:50000").await?;
//!
//!     // Poll and read the main-zone power state
//!     let power = client.get_wait("main_power").await?;
//!     println!("Power: {}", power);
//!
//!     // Request changes on the receiver
//!     client.remote_set("volume", -32.5).await?;
//!     client.remote_set("source", "HDMI 1").await?;
//!
//!     // Follow state updates
//!     let mut events = client.subscribe().await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Emulated receiver
//!
//! For development without a device, bind an [`AvrServer`] with the same
//! scheme and point the client at it:
//!
//! ```no_run
//! use netavr::{schemes::Denon, AvrClient, AvrServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = AvrServer::bind(Box::new(Denon), "127.0.0.1:0").await?;
//!     let addr = server.local_addr();
//!     let client = AvrClient::connect(Box::new(Denon), addr.ip().to_string(), addr.port()).await?;
//!     println!("volume: {}", client.get_wait("volume").await?);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client / Server**: target roles composing transport, registry and
//!   scheduler behind an actor task
//! - **Engine**: the poll/consume/notify protocol and pending-call
//!   scheduling, free of sockets
//! - **Registry / Variable**: the typed shared-variable model and its
//!   set/unset lifecycle
//! - **Codec**: wire (de)serialization and line matching
//! - **Transport**: line framing, pacing, backoff and keep-alive timing
//! - **Schemes**: per-brand variable sets and wire formats

pub mod codec;
pub mod schemes;

mod client;
mod engine;
mod error;
mod pending;
mod registry;
mod server;
mod subscription;
mod transport;
mod value;
mod variable;

// Public exports
pub use client::AvrClient;
pub use error::{AvrError, Result};
pub use registry::{VarId, VarRegistry};
pub use schemes::{parse_uri, scheme_for, Scheme};
pub use server::AvrServer;
pub use subscription::{EventReceiver, VarEvent};
pub use value::{Value, VarKind};
pub use variable::{Access, SharedVar, VarDef};
