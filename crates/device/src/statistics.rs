//! Per-device traffic counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Monotonically non-decreasing counters for one device session.
#[derive(Debug)]
pub struct Statistics {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    duplications: AtomicU64,
    connected_at: SystemTime,
}

impl Statistics {
    pub(crate) fn new(connected_at: SystemTime) -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            duplications: AtomicU64::new(0),
            connected_at,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// How many times this device's ID has reconnected over a live session.
    pub fn duplications(&self) -> u64 {
        self.duplications.load(Ordering::Relaxed)
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub(crate) fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_messages_sent(&self, n: u64) {
        self.messages_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_messages_received(&self, n: u64) {
        self.messages_received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_duplications(&self, n: u64) {
        self.duplications.fetch_add(n, Ordering::Relaxed);
    }
}
