use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
};

use tokio::sync::mpsc;

use super::ServerEvent;
use crate::presence::ConnectionId;

pub type Outbox = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Delivery fabric for outbound events: one queue per live connection plus
/// room channels that group connections.
///
/// Sends never block; a connection that has gone away simply drops what it
/// is sent.
#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Arc<ServerEvent>>>>,
    channels: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection, tx);
        rx
    }

    /// Forgets the connection and every channel membership it had.
    pub fn remove(&self, connection: ConnectionId) {
        self.connections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&connection);

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.retain(|_, members| {
            members.remove(&connection);
            !members.is_empty()
        });
    }

    pub fn join(&self, room_id: &str, connection: ConnectionId) {
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(room_id.to_owned())
            .or_default()
            .insert(connection);
    }

    pub fn leave(&self, room_id: &str, connection: ConnectionId) {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = channels.get_mut(room_id) {
            members.remove(&connection);
            if members.is_empty() {
                channels.remove(room_id);
            }
        }
    }

    pub fn members(&self, room_id: &str) -> Vec<ConnectionId> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        let mut members: Vec<_> = channels.get(room_id).into_iter().flatten().copied().collect();
        members.sort();
        members
    }

    pub fn send(&self, connection: ConnectionId, event: ServerEvent) {
        self.deliver([connection], Arc::new(event));
    }

    pub fn send_all(&self, targets: impl IntoIterator<Item = ConnectionId>, event: ServerEvent) {
        self.deliver(targets, Arc::new(event));
    }

    /// Every member of the room channel except `except`.
    pub fn send_to_room(&self, room_id: &str, event: ServerEvent, except: Option<ConnectionId>) {
        let targets = self
            .members(room_id)
            .into_iter()
            .filter(|member| Some(*member) != except);
        self.deliver(targets, Arc::new(event));
    }

    /// Every live connection.
    pub fn broadcast(&self, event: ServerEvent) {
        let event = Arc::new(event);
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        for tx in connections.values() {
            let _ = tx.send(event.clone());
        }
    }

    fn deliver(&self, targets: impl IntoIterator<Item = ConnectionId>, event: Arc<ServerEvent>) {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        for target in targets {
            if let Some(tx) = connections.get(&target) {
                let _ = tx.send(event.clone());
            }
        }
    }
}
