//! chatrelay - multi-client chat relay with file sharing
//!
//! This library provides a TCP relay that authenticates users against a
//! credentials file, broadcasts chat, routes direct messages, grants one
//! session administrative "root" rights, and stores uploaded files with an
//! optional time-to-live.

pub mod relay;

pub use relay::{Message, MessageKind, RelayClient, RelayServer, ServerConfig, ServerHandle};
