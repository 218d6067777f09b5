use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Process-wide table of live event-stream connections and when they were
/// opened. Entries are scoped resources: the guard returned by [`register`]
/// removes its entry when the connection's stream is dropped.
///
/// [`register`]: EventStreamRegistry::register
#[derive(Default)]
pub struct EventStreamRegistry {
    connections: Mutex<HashMap<Uuid, Instant>>,
}

impl EventStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self: &Arc<Self>, connection_id: Uuid) -> TickGuard {
        self.connections
            .lock()
            .expect("event stream registry poisoned")
            .insert(connection_id, Instant::now());
        debug!(%connection_id, "Event stream connected");
        TickGuard {
            registry: self.clone(),
            connection_id,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.connections
            .lock()
            .expect("event stream registry poisoned")
            .len()
    }

    fn release(&self, connection_id: &Uuid) {
        self.connections
            .lock()
            .expect("event stream registry poisoned")
            .remove(connection_id);
        debug!(%connection_id, "Event stream disconnected");
    }
}

/// Removes the connection's registry entry on drop, on every exit path of the
/// stream (client close, server error, shutdown).
pub struct TickGuard {
    registry: Arc<EventStreamRegistry>,
    connection_id: Uuid,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.registry.release(&self.connection_id);
    }
}
