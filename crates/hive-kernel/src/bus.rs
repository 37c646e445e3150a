//! In-process event bus backed by a tokio broadcast channel.
//!
//! Every committed event is published here after its transaction commits;
//! the stream server rides these notifications for low-latency SSE while
//! its polling loop remains the durable fallback. Lossy by design: slow
//! subscribers lag and resume from the journal by offset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::events::Event;

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    no_receivers: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub no_receivers: u64,
    pub receivers: usize,
}

#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
    counters: Arc<Counters>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        match self.tx.send(event) {
            Ok(n) => {
                self.counters.delivered.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.counters.no_receivers.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            no_receivers: self.counters.no_receivers.load(Ordering::Relaxed),
            receivers: self.tx.receiver_count(),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(256)
    }
}
