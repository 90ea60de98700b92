use std::{fmt, sync::Arc};

use {bytes::Bytes, uuid::Uuid};

/// Numeric session id assigned by the registry.
pub type SessionId = u64;

/// Identity of a live connection, minted by the transport when it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A connection as seen by the registry: something frames can be sent to.
///
/// Sessions are owned by the transport. It must deregister a session before
/// tearing the connection down; the registry only holds a shared handle.
pub trait Session: Send + Sync {
    fn conn_id(&self) -> ConnId;

    /// Queue one complete wire message. Delivery failures surface through the
    /// transport, never to the caller.
    fn send(&self, frame: Bytes);
}

pub type SessionHandle = Arc<dyn Session>;
