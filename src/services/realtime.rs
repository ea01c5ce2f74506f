//! Realtime fan-out of map events to connected viewers.
//!
//! Delivery is at-most-once and best-effort: there is no backlog for late joiners and no
//! acknowledgment. Each connection owns an unbounded outbound queue drained by its socket task,
//! so a broadcast never waits on a slow consumer.

use crate::models::map::{Device, ServerEvent};
use crate::utils::epoch_millis;
use log::{debug, error};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub type ClientId = u64;

#[derive(Debug, Default)]
pub struct Hub {
    next_id: AtomicU64,
    clients: Mutex<BTreeMap<ClientId, UnboundedSender<String>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, BTreeMap<ClientId, UnboundedSender<String>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection; `greeting` is queued ahead of any later broadcast.
    pub fn connect(&self, greeting: &ServerEvent) -> (ClientId, UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients();
        if let Some(frame) = encode_event(greeting) {
            let _ = tx.send(frame);
        }
        clients.insert(id, tx);
        debug!("Realtime client {} connected ({} open)", id, clients.len());
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) {
        let mut clients = self.clients();
        if clients.remove(&id).is_some() {
            debug!("Realtime client {} disconnected ({} open)", id, clients.len());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.clients().len()
    }

    /// Serialize `event` once and queue it on every open connection.
    ///
    /// Connections whose queue is closed are skipped and pruned. Returns the delivery count.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let Some(frame) = encode_event(event) else {
            return 0;
        };
        let mut clients = self.clients();
        let mut delivered = 0;
        clients.retain(|id, tx| {
            if tx.is_closed() {
                debug!("Realtime client {} not ready; dropping", id);
                return false;
            }
            match tx.send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        debug!("Broadcast delivered to {}/{} client(s)", delivered, clients.len());
        delivered
    }
}

pub fn hello_event() -> ServerEvent {
    ServerEvent::Hello { ts: epoch_millis() }
}

pub fn coords_updated_event(device: Device) -> ServerEvent {
    ServerEvent::DeviceCoordsUpdated { device }
}

fn encode_event(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Failed to encode realtime event: {}", e);
            None
        }
    }
}
