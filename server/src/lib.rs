//! Accepting side of the network: connection registry, routing table, liveness
//! monitor and the [`Server`] that ties them together.

pub mod monitor;
pub mod registry;
pub mod routing;
mod server;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use server::Server;
