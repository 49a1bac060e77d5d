// Multi-client chat relay
//
// One hub task owns session and root state. Each accepted socket gets its own
// connection task, which runs file transfers locally and forwards everything
// else to the hub. A scheduler task deletes uploads whose time-to-live ran out.

pub mod admin;
pub mod auth;
pub mod cipher;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod logging;
pub mod privilege;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod transfer;
pub mod wire;

pub use cli::{RelayCli, RelayCommand};
pub use client::RelayClient;
pub use commands::execute_command;
pub use config::ServerConfig;
pub use error::{RelayError, TransferError};
pub use hub::{HubHandle, HubSnapshot};
pub use privilege::RootOwner;
pub use server::{RelayServer, ServerHandle};
pub use session::SessionId;
pub use wire::{Message, MessageKind};
