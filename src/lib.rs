//! `rmtp` — a reliable, message-oriented transport protocol over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────┐  send_msg / recv   ┌───────────┐
//!  │Application│◀──────────────────▶│Connection │ (per-peer handle)
//!  └───────────┘                    └─────┬─────┘
//!                                         │ SendWindow · Receiver · FSM · RTT
//!  ┌──────────────────────────────────────▼────┐
//!  │                 Endpoint                   │
//!  │ (conn table, accept queue, recv + timers)  │
//!  └──────────────────────┬─────────────────────┘
//!                         │ segments
//!                    ┌────▼─────┐
//!                    │  Socket  │  (async UDP, optional fault model)
//!                    └──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]    — wire format (serialise / deserialise, MD5 integrity)
//! - [`config`]     — tunable protocol knobs
//! - [`rtt`]        — adaptive retransmission-timeout estimation
//! - [`sender`]     — send window and in-flight retransmit buffer
//! - [`receiver`]   — reorder buffer and in-order delivery
//! - [`state`]      — finite-state-machine types
//! - [`connection`] — per-connection lifecycle and the public handle
//! - [`endpoint`]   — socket dispatcher, connection table, timers
//! - [`socket`]     — async UDP socket abstraction
//! - [`sim`]        — deterministic lossy/reordering fault model for tests
//! - [`stats`]      — per-connection and per-endpoint counters
//!
//! # Example
//!
//! ```ignore
//! let server = Endpoint::bind("127.0.0.1:9000".parse()?, Config::default()).await?;
//! let client = Endpoint::bind("127.0.0.1:0".parse()?, Config::default()).await?;
//!
//! let (served, conn) = tokio::join!(server.accept(), client.connect(server.local_addr()));
//! let conn = conn?;
//! conn.send_msg(b"hello").await?;
//! assert_eq!(served?.recv().await?, Some(b"hello".to_vec()));
//! conn.close().await?;
//! ```

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod receiver;
pub mod rtt;
pub mod segment;
pub mod sender;
pub mod sim;
pub mod socket;
pub mod state;
pub mod stats;

pub use config::Config;
pub use connection::Connection;
pub use endpoint::Endpoint;
pub use error::TransportError;
pub use state::ConnectionState;
