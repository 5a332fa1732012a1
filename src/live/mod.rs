//! # Live updates (client side)
//!
//! A consumer of the change stream keeps a [`ConnectionMachine`]: it
//! reconnects with exponential backoff, asks for a full resync after every
//! reconnect, and polls the catalog version while the live channel is down.

pub mod client;
pub mod local;

pub use client::{
    run_client, BackoffPolicy, ClientEvent, ConnectionMachine, ConnectionState, LiveTransport,
    TransportError,
};
pub use local::HubTransport;
