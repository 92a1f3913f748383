//! Per-lobby client event fan-out

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::net::protocol::Event;

/// Outgoing event queues of every client in one lobby. A client whose
/// writer task is gone just stops receiving; the registry drops the
/// failed send and moves on.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<u32, mpsc::UnboundedSender<Event>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, client_id: u32, tx: mpsc::UnboundedSender<Event>) {
        self.clients.insert(client_id, tx);
    }

    pub fn remove(&self, client_id: u32) {
        self.clients.remove(&client_id);
    }

    pub fn send_to(&self, client_id: u32, event: Event) {
        if let Some(tx) = self.clients.get(&client_id) {
            let _ = tx.send(event);
        }
    }

    pub fn broadcast(&self, event: &Event) {
        for entry in self.clients.iter() {
            let _ = entry.value().send(event.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
