//! Byte fan-out: one producer, N independent client sinks.

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::common::now_ms;

pub struct StreamClient {
    pub id: String,
    tx: flume::Sender<Bytes>,
    pub connected_at: u64,
}

/// Registry of live stream sinks. Every chunk is delivered to every
/// registered client exactly once, in production order; a sink that is full
/// or gone is dropped on the spot so one slow consumer never stalls the rest.
pub struct FanOut {
    clients: DashMap<String, StreamClient>,
    /// Per-client buffered chunk budget before it is considered stalled.
    capacity: usize,
}

impl FanOut {
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            capacity,
        }
    }

    /// Registers a sink; the receiver sees whatever bytes are produced from
    /// now on, no rewind.
    pub fn add_client(&self, id: impl Into<String>) -> flume::Receiver<Bytes> {
        let id = id.into();
        let (tx, rx) = flume::bounded(self.capacity);
        self.clients.insert(
            id.clone(),
            StreamClient {
                id: id.clone(),
                tx,
                connected_at: now_ms(),
            },
        );
        info!(
            "Stream client connected: id={} total={}",
            id,
            self.clients.len()
        );
        rx
    }

    pub fn remove_client(&self, id: &str) {
        if self.clients.remove(id).is_some() {
            info!(
                "Stream client disconnected: id={} total={}",
                id,
                self.clients.len()
            );
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn broadcast(&self, chunk: &Bytes) {
        let mut stale = Vec::new();
        for client in self.clients.iter() {
            if client.tx.try_send(chunk.clone()).is_err() {
                stale.push(client.id.clone());
            }
        }
        for id in stale {
            debug!("Dropping stalled stream client: id={}", id);
            self.remove_client(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_ordered_delivery_to_all_clients() {
        let fanout = FanOut::new(16);
        let a = fanout.add_client("a");
        let b = fanout.add_client("b");

        for chunk in [&b"one"[..], b"two", b"three"] {
            fanout.broadcast(&Bytes::copy_from_slice(chunk));
        }

        let got_a: Vec<Bytes> = a.drain().collect();
        let got_b: Vec<Bytes> = b.drain().collect();
        assert_eq!(got_a, vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]);
        assert_eq!(got_a, got_b);
    }

    #[test]
    fn test_stalled_client_is_dropped_others_unaffected() {
        let fanout = FanOut::new(1);
        let slow = fanout.add_client("slow");
        let healthy = fanout.add_client("healthy");

        fanout.broadcast(&Bytes::from("c1")); // fills slow's buffer
        fanout.broadcast(&Bytes::from("c2")); // slow is full -> dropped

        assert_eq!(fanout.client_count(), 1);
        assert_eq!(healthy.drain().count(), 2);
        drop(slow);
    }

    #[test]
    fn test_disconnected_receiver_is_pruned() {
        let fanout = FanOut::new(16);
        let rx = fanout.add_client("gone");
        drop(rx);
        fanout.broadcast(&Bytes::from("chunk"));
        assert_eq!(fanout.client_count(), 0);
    }

    #[test]
    fn test_late_joiner_gets_no_history() {
        let fanout = FanOut::new(16);
        fanout.broadcast(&Bytes::from("early"));
        let late = fanout.add_client("late");
        fanout.broadcast(&Bytes::from("now"));
        assert_eq!(late.drain().collect::<Vec<_>>(), vec![Bytes::from("now")]);
    }
}
