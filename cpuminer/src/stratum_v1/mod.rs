//! Stratum v1 pool client.
//!
//! Line-delimited JSON-RPC over TCP. The client performs the
//! subscribe/authorize handshake, turns notifications into
//! [`ClientEvent`]s and sends shares handed to it as [`ClientCommand`]s
//! without waiting for the pool's verdict.

mod client;
mod connection;
mod error;
mod messages;

pub use client::{ClientState, PoolConfig, StratumV1Client};
pub use connection::{pool_address, Connection, LineCodec, Transport, MAX_LINE_LENGTH};
pub use error::{StratumError, StratumResult};
pub use messages::{parse_notify, ClientCommand, ClientEvent, JsonRpcMessage, SubmitParams};
