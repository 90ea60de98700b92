//! Gateway: session registry and the TCP transport that feeds it.
//!
//! Lifecycle of a connection:
//! 1. Accept, mint a [`ConnId`], register the session (gets a [`SessionId`])
//! 2. Hand the [`Connection`] to the application's [`ConnectionHandler`]
//! 3. Read length-prefixed frames and pass each to `on_frame`
//! 4. On EOF, read error, protocol error or shutdown: deregister, then
//!    `on_disconnect`
//!
//! Method schemas and dispatch live in `tether-protocol`; this crate never
//! looks inside a frame.

pub mod registry;
pub mod server;
pub mod session;

pub use {
    registry::{RegistryError, RegistryStats, SessionRegistry},
    server::{Connection, ConnectionHandler, Server},
    session::{ConnId, Session, SessionHandle, SessionId},
};
