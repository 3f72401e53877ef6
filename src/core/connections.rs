use crate::core::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One attached client program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: String,
    pub program_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_path: Option<String>,
    pub requests_count: u64,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Tracks which client programs are attached and how busy they are.
///
/// `touch` is called on every request-serving operation; it upserts, so a
/// connection whose transport never announced itself still shows up in
/// listings with whatever identity the transport could supply.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connections: RwLock<HashMap<String, Connection>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection with its program identity. Re-registering an
    /// existing id refreshes the identity but keeps its counters.
    pub fn register(
        &self,
        connection_id: &str,
        program_name: &str,
        program_path: Option<String>,
    ) {
        let mut connections = self.connections.write().expect("connection lock poisoned");
        let now = Utc::now();
        connections
            .entry(connection_id.to_string())
            .and_modify(|c| {
                c.program_name = program_name.to_string();
                c.program_path = program_path.clone();
                c.last_activity = now;
            })
            .or_insert_with(|| Connection {
                connection_id: connection_id.to_string(),
                program_name: program_name.to_string(),
                program_path,
                requests_count: 0,
                connected_at: now,
                last_activity: now,
            });
        tracing::info!(
            "Connection registered: id={}, program='{}'",
            connection_id,
            program_name
        );
    }

    /// Count one served request against the connection, creating the record
    /// on first contact.
    pub fn touch(&self, connection_id: &str) {
        let mut connections = self.connections.write().expect("connection lock poisoned");
        let now = Utc::now();
        let connection = connections
            .entry(connection_id.to_string())
            .or_insert_with(|| Connection {
                connection_id: connection_id.to_string(),
                program_name: "unknown".to_string(),
                program_path: None,
                requests_count: 0,
                connected_at: now,
                last_activity: now,
            });
        connection.requests_count += 1;
        connection.last_activity = now;
    }

    pub fn list(&self) -> Vec<Connection> {
        let connections = self.connections.read().expect("connection lock poisoned");
        let mut all: Vec<Connection> = connections.values().cloned().collect();
        all.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        all
    }

    pub fn get(&self, connection_id: &str) -> Option<Connection> {
        let connections = self.connections.read().expect("connection lock poisoned");
        connections.get(connection_id).cloned()
    }

    /// Remove a connection, returning its final record.
    pub fn close(&self, connection_id: &str) -> Result<Connection> {
        let mut connections = self.connections.write().expect("connection lock poisoned");
        connections
            .remove(connection_id)
            .ok_or_else(|| GatewayError::NotFound(format!("connection '{}'", connection_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_touch_counts_requests() {
        let tracker = ConnectionTracker::new();
        tracker.register("c1", "ide", Some("/usr/bin/ide".into()));
        tracker.touch("c1");
        tracker.touch("c1");

        let connection = tracker.get("c1").unwrap();
        assert_eq!(connection.program_name, "ide");
        assert_eq!(connection.requests_count, 2);
    }

    #[test]
    fn test_touch_creates_unannounced_connection() {
        let tracker = ConnectionTracker::new();
        tracker.touch("ghost");

        let connection = tracker.get("ghost").unwrap();
        assert_eq!(connection.program_name, "unknown");
        assert_eq!(connection.requests_count, 1);
    }

    #[test]
    fn test_reregister_keeps_counters() {
        let tracker = ConnectionTracker::new();
        tracker.register("c1", "old-name", None);
        tracker.touch("c1");
        tracker.register("c1", "new-name", None);

        let connection = tracker.get("c1").unwrap();
        assert_eq!(connection.program_name, "new-name");
        assert_eq!(connection.requests_count, 1);
        assert_eq!(tracker.list().len(), 1);
    }

    #[test]
    fn test_close_removes_and_returns_record() {
        let tracker = ConnectionTracker::new();
        tracker.register("c1", "ide", None);

        let closed = tracker.close("c1").unwrap();
        assert_eq!(closed.connection_id, "c1");
        assert!(tracker.get("c1").is_none());
        assert!(matches!(
            tracker.close("c1"),
            Err(GatewayError::NotFound(_))
        ));
    }
}
