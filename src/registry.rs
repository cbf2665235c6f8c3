//! Connection registry state
//!
//! Maps display names to live connection records and enforces that no two
//! records share a name or a color. Owned by the registry actor in
//! `server.rs`, which serializes every operation; nothing here is async.

use std::collections::HashMap;

use crate::connection::ConnectionRecord;
use crate::error::RegistryError;
use crate::types::{available_colors, Color, ConnectionId};

/// Live connections keyed by name
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<String, ConnectionRecord>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `record` if both its name and its color are free
    ///
    /// When both conflict, `ColorTaken` is reported.
    pub fn try_admit(
        &mut self,
        record: ConnectionRecord,
    ) -> Result<ConnectionRecord, RegistryError> {
        if self.color_holder(record.color).is_some() {
            return Err(RegistryError::ColorTaken(record.color));
        }
        if self.connections.contains_key(&record.name) {
            return Err(RegistryError::NameTaken(record.name));
        }

        self.connections.insert(record.name.clone(), record.clone());
        Ok(record)
    }

    /// Remove the entry for `name`, if any
    ///
    /// Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) -> Option<ConnectionRecord> {
        self.connections.remove(name)
    }

    /// Remove the entry for `name` only if it belongs to connection `id`
    pub fn remove_connection(&mut self, name: &str, id: ConnectionId) -> Option<ConnectionRecord> {
        match self.connections.get(name) {
            Some(record) if record.id == id => self.connections.remove(name),
            _ => None,
        }
    }

    /// Colors not held by any live connection
    pub fn available_colors(&self) -> Vec<Color> {
        available_colors(self.connections.values().map(|record| record.color))
    }

    /// All records, oldest admission first
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> = self.connections.values().cloned().collect();
        records.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        records
    }

    /// Request the session named `name` to close
    ///
    /// Returns false if no such connection is live.
    pub fn close(&self, name: &str) -> bool {
        match self.connections.get(name) {
            Some(record) => {
                record.close();
                true
            }
            None => false,
        }
    }

    /// Request every live session to close
    pub fn close_all(&self) -> usize {
        for record in self.connections.values() {
            record.close();
        }
        self.connections.len()
    }

    /// Check if a connection with this name is live
    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection is live
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn color_holder(&self, color: Color) -> Option<&ConnectionRecord> {
        self.connections.values().find(|record| record.color == color)
    }
}
