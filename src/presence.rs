//! Who is connected right now.
//!
//! The registry maps live connections to identities and back. The reverse
//! direction keeps a single pointer per identity: binding a second
//! connection for the same identity replaces the first one.

use std::{
    collections::HashMap,
    fmt,
    sync::RwLock,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presence lookups used by the Event Router and the social graph.
///
/// Kept behind a trait so a shared store can replace the in-process map
/// when several coordinating processes run side by side.
pub trait Presence: Send + Sync {
    fn bind(&self, connection: ConnectionId, identity: &str);

    /// Returns the identity the connection was bound to, if any.
    fn unbind(&self, connection: ConnectionId) -> Option<String>;

    fn is_online(&self, identity: &str) -> bool {
        self.connection_for(identity).is_some()
    }

    fn connection_for(&self, identity: &str) -> Option<ConnectionId>;
}

#[derive(Default)]
struct Bindings {
    by_connection: HashMap<ConnectionId, String>,
    by_identity: HashMap<String, ConnectionId>,
}

#[derive(Default)]
pub struct LocalPresence {
    bindings: RwLock<Bindings>,
}

impl LocalPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presence for LocalPresence {
    fn bind(&self, connection: ConnectionId, identity: &str) {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        bindings.by_connection.insert(connection, identity.to_owned());
        if let Some(previous) = bindings.by_identity.insert(identity.to_owned(), connection) {
            tracing::debug!(identity, %previous, %connection, "Presence pointer replaced");
        }
    }

    fn unbind(&self, connection: ConnectionId) -> Option<String> {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        let identity = bindings.by_connection.remove(&connection)?;
        // a newer connection may already own the pointer
        if bindings.by_identity.get(&identity) == Some(&connection) {
            bindings.by_identity.remove(&identity);
        }
        Some(identity)
    }

    fn connection_for(&self, identity: &str) -> Option<ConnectionId> {
        let bindings = self.bindings.read().unwrap_or_else(|e| e.into_inner());
        bindings.by_identity.get(identity).copied()
    }
}
