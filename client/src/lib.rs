//! Connecting side of the network: the [`Client`] link, its heartbeat, and the
//! type-keyed dispatch of inbound messages.

mod client;
pub mod dispatch;
pub mod processors;

pub use client::{Client, parse_server_addr};
