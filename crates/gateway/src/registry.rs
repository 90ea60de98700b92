use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    bytes::Bytes,
    serde::Serialize,
    tracing::{debug, trace, warn},
};

use crate::session::{ConnId, SessionHandle, SessionId};

// ── Errors ───────────────────────────────────────────────────────────────────

/// Session bookkeeping violations. These point at a transport bug, not at
/// the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("session {0} already registered")]
    DuplicateSession(ConnId),

    #[error("session {0} not registered")]
    UnknownSession(ConnId),

    #[error("session with id {0} not registered")]
    UnknownSessionId(SessionId),
}

// ── Indexes ──────────────────────────────────────────────────────────────────

struct Tracked {
    id: SessionId,
    session: SessionHandle,
}

/// Both indexes always hold the same set of sessions.
#[derive(Default)]
struct Indexes {
    next_id: SessionId,
    by_conn: HashMap<ConnId, Tracked>,
    by_id: BTreeMap<SessionId, ConnId>,
}

impl Indexes {
    fn remove_conn(&mut self, conn_id: &ConnId) -> Option<Tracked> {
        let tracked = self.by_conn.remove(conn_id)?;
        self.by_id.remove(&tracked.id);
        Some(tracked)
    }
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub sessions: usize,
    pub recv_bytes: u64,
    pub sent_bytes: u64,
    pub requests: u64,
    pub replies: u64,
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Directory of live sessions, addressable by connection identity or by
/// numeric session id, plus process-wide traffic counters.
///
/// All index mutations go through a single lock. Counters are independent
/// atomics; no increment is lost, but no ordering between counters holds.
#[derive(Default)]
pub struct SessionRegistry {
    indexes: RwLock<Indexes>,
    recv_bytes: AtomicU64,
    sent_bytes: AtomicU64,
    requests: AtomicU64,
    replies: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.indexes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a session and assign it the next session id.
    pub fn add_session(&self, session: SessionHandle) -> Result<SessionId, RegistryError> {
        let conn_id = session.conn_id();
        let mut idx = self.write();
        if idx.by_conn.contains_key(&conn_id) {
            return Err(RegistryError::DuplicateSession(conn_id));
        }
        // `set_id` may already have claimed ids ahead of the counter.
        while idx.by_id.contains_key(&idx.next_id) {
            idx.next_id += 1;
        }
        let id = idx.next_id;
        idx.next_id += 1;
        idx.by_conn.insert(conn_id, Tracked { id, session });
        idx.by_id.insert(id, conn_id);
        debug!(conn_id = %conn_id, id, sessions = idx.by_conn.len(), "session added");
        Ok(id)
    }

    /// Stop tracking the session with this connection identity.
    pub fn del_session(&self, conn_id: &ConnId) -> Result<SessionHandle, RegistryError> {
        let mut idx = self.write();
        let tracked = idx
            .remove_conn(conn_id)
            .ok_or(RegistryError::UnknownSession(*conn_id))?;
        debug!(conn_id = %conn_id, id = tracked.id, "session removed");
        Ok(tracked.session)
    }

    /// Stop tracking the session currently holding `id`.
    pub fn del_session_by_id(&self, id: SessionId) -> Result<SessionHandle, RegistryError> {
        let mut idx = self.write();
        let conn_id = idx
            .by_id
            .get(&id)
            .copied()
            .ok_or(RegistryError::UnknownSessionId(id))?;
        let tracked = idx
            .remove_conn(&conn_id)
            .ok_or(RegistryError::UnknownSessionId(id))?;
        debug!(conn_id = %conn_id, id, "session removed");
        Ok(tracked.session)
    }

    /// Re-key a tracked session.
    ///
    /// The caller must guarantee that `new_id` is not held by another
    /// session; no uniqueness check is made. If it is held anyway, the
    /// re-keyed session is dropped from the registry so both indexes stay
    /// in step, and a warning is logged.
    pub fn set_id(&self, conn_id: &ConnId, new_id: SessionId) -> Result<(), RegistryError> {
        let mut idx = self.write();
        let tracked = idx
            .remove_conn(conn_id)
            .ok_or(RegistryError::UnknownSession(*conn_id))?;
        let old_id = tracked.id;

        if let Some(holder) = idx.by_id.get(&new_id) {
            warn!(
                conn_id = %conn_id,
                holder = %holder,
                old_id,
                new_id,
                "session id already in use, session dropped"
            );
            return Ok(());
        }

        idx.by_id.insert(new_id, *conn_id);
        idx.by_conn.insert(*conn_id, Tracked {
            id: new_id,
            session: tracked.session,
        });
        debug!(conn_id = %conn_id, old_id, new_id, "session re-keyed");
        Ok(())
    }

    pub fn has_session(&self, conn_id: &ConnId) -> bool {
        self.read().by_conn.contains_key(conn_id)
    }

    pub fn has_session_id(&self, id: SessionId) -> bool {
        self.read().by_id.contains_key(&id)
    }

    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        let idx = self.read();
        let conn_id = idx.by_id.get(&id)?;
        idx.by_conn.get(conn_id).map(|t| Arc::clone(&t.session))
    }

    pub fn id_of(&self, conn_id: &ConnId) -> Option<SessionId> {
        self.read().by_conn.get(conn_id).map(|t| t.id)
    }

    /// Ids of all tracked sessions, ascending.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.read().by_id.keys().copied().collect()
    }

    pub fn size(&self) -> usize {
        self.read().by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Send to one session by id. Returns false if no such session.
    pub fn send_to(&self, id: SessionId, frame: Bytes) -> bool {
        match self.session(id) {
            Some(session) => {
                session.send(frame);
                true
            },
            None => false,
        }
    }

    /// Broadcast one frame to every tracked session, in ascending id order.
    ///
    /// The session set is copied under the lock and the sends happen after
    /// it is released. A session removed while the broadcast runs may still
    /// receive the frame; one added meanwhile may or may not. Returns the
    /// number of sessions the frame was handed to.
    pub fn send_to_all(&self, frame: Bytes) -> usize {
        let snapshot: Vec<SessionHandle> = {
            let idx = self.read();
            idx.by_id
                .values()
                .filter_map(|conn_id| idx.by_conn.get(conn_id))
                .map(|t| Arc::clone(&t.session))
                .collect()
        };
        trace!(sessions = snapshot.len(), len = frame.len(), "broadcast");
        for session in &snapshot {
            session.send(frame.clone());
        }
        snapshot.len()
    }

    // ── Counters ─────────────────────────────────────────────────────────

    pub fn inc_recv_bytes(&self, bytes: u64) {
        self.recv_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_sent_bytes(&self, bytes: u64) {
        self.sent_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes.load(Ordering::Relaxed)
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.size(),
            recv_bytes: self.recv_bytes(),
            sent_bytes: self.sent_bytes(),
            requests: self.requests(),
            replies: self.replies(),
        }
    }
}
