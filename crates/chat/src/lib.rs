//! Account and presence chat service.
//!
//! Clients register a username, activate it with the key the server hands
//! back, then log in. Every login, logout and dropped connection pushes the
//! sorted list of online users to all connected sessions.

pub mod client;
pub mod directory;
pub mod protocol;
pub mod server;

pub use {
    client::{ChatClient, ChatEvent, EventLog, event_dispatcher},
    directory::{Directory, DirectoryError},
    protocol::{ChatProtocol, client_catalog, server_catalog},
    server::ChatServer,
};
