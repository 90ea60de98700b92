//! Accounts and presence.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Mutex, MutexGuard, PoisonError},
};

use tether_gateway::ConnId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("username taken")]
    UsernameTaken,

    #[error("invalid key")]
    InvalidKey,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("already logged in")]
    AlreadyOnline,
}

#[derive(Debug)]
enum Account {
    Pending { key: String },
    Active { password: String },
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    online: HashMap<ConnId, String>,
}

/// In-memory user directory shared by all connections.
///
/// A connection is bound to at most one user and a user to at most one
/// connection.
#[derive(Debug, Default)]
pub struct Directory {
    state: Mutex<State>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a pending account and return its activation key.
    pub fn register(&self, username: &str) -> Result<String, DirectoryError> {
        let mut state = self.lock();
        match state.accounts.entry(username.to_string()) {
            Entry::Occupied(_) => Err(DirectoryError::UsernameTaken),
            Entry::Vacant(slot) => {
                let key = uuid::Uuid::new_v4().simple().to_string();
                slot.insert(Account::Pending { key: key.clone() });
                Ok(key)
            },
        }
    }

    pub fn activate(&self, key: &str, username: &str, password: &str) -> Result<(), DirectoryError> {
        let mut state = self.lock();
        let account = state
            .accounts
            .get_mut(username)
            .ok_or(DirectoryError::InvalidKey)?;
        if !matches!(account, Account::Pending { key: expected } if expected.as_str() == key) {
            return Err(DirectoryError::InvalidKey);
        }
        *account = Account::Active {
            password: password.to_string(),
        };
        Ok(())
    }

    /// Bind `conn` to `username`. Logging in again on the same connection
    /// switches the binding.
    pub fn login(&self, conn: ConnId, username: &str, password: &str) -> Result<(), DirectoryError> {
        let mut state = self.lock();
        match state.accounts.get(username) {
            Some(Account::Active { password: stored }) if stored == password => {},
            _ => return Err(DirectoryError::InvalidCredentials),
        }
        let elsewhere = state
            .online
            .iter()
            .any(|(other, user)| *other != conn && user == username);
        if elsewhere {
            return Err(DirectoryError::AlreadyOnline);
        }
        state.online.insert(conn, username.to_string());
        Ok(())
    }

    /// Unbind `conn`, returning the user it was logged in as.
    pub fn logout(&self, conn: &ConnId) -> Option<String> {
        self.lock().online.remove(conn)
    }

    pub fn user_of(&self, conn: &ConnId) -> Option<String> {
        self.lock().online.get(conn).cloned()
    }

    /// Logged-in usernames, sorted.
    pub fn users_online(&self) -> Vec<String> {
        let mut users: Vec<String> = self.lock().online.values().cloned().collect();
        users.sort();
        users
    }

    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }
}
