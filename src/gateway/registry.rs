// registry.rs
//
// Live output sinks (socket connections) keyed by connection id. Broadcasts
// run over a snapshot of the sink set, so connections may come and go while
// a payload is being fanned out.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something a serialized event can be written to.
pub trait EventSink: Send + Sync {
    fn write(&self, payload: &[u8]) -> Result<(), SinkError>;
}

/// The socket task on the other end drains the channel. A dropped receiver
/// means the connection is gone; a full queue means the client stopped
/// reading.
impl EventSink for mpsc::Sender<Vec<u8>> {
    fn write(&self, payload: &[u8]) -> Result<(), SinkError> {
        self.try_send(payload.to_vec()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

pub struct GatewayRegistry {
    sinks: Mutex<HashMap<ConnectionId, Arc<dyn EventSink>>>,
    next_id: AtomicU64,
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let total = {
            let mut sinks = self.sinks.lock();
            sinks.insert(id, sink);
            sinks.len()
        };
        log::info!("Socket {} registered, {} live", id, total);
        id
    }

    /// Returns `false` if the connection was already gone (for example
    /// evicted by a failed write).
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut sinks = self.sinks.lock();
            (sinks.remove(&id).is_some(), sinks.len())
        };
        if removed {
            log::info!("Socket {} closed, {} live", id, total);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.lock().is_empty()
    }

    /// Writes `payload` to every sink registered right now. A failed write
    /// evicts that sink and does not affect the others.
    pub fn broadcast(&self, payload: &[u8]) -> BroadcastReport {
        let snapshot: Vec<(ConnectionId, Arc<dyn EventSink>)> = self
            .sinks
            .lock()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, sink) in snapshot {
            match sink.write(payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::warn!("Dropping socket {}: {}", id, e);
                    report.evicted.push(id);
                }
            }
        }

        if !report.evicted.is_empty() {
            let mut sinks = self.sinks.lock();
            for id in &report.evicted {
                sinks.remove(id);
            }
        }
        report
    }
}
