use std::collections::HashMap;
use std::sync::Arc;

use crate::client::{Connection, ConnectionId};

/// One registry entry: a topic name and the connections subscribed to it.
#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashMap<ConnectionId, Arc<Connection>>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashMap::new(),
        }
    }

    /// Adds a connection. Returns false if it was already subscribed.
    pub fn subscribe(&mut self, connection: Arc<Connection>) -> bool {
        self.subscribers.insert(connection.id, connection).is_none()
    }

    /// Removes a connection. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, id: &ConnectionId) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }
}
