pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod files;
pub mod logger;
pub mod message;
pub mod network;
pub mod readline;
pub mod tls;
pub mod transfer;
