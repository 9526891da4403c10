//! Hub instrumentation.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A signed up/down gauge.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// The hub's instrumentation points.
///
/// `connect`/`disconnect` count session starts and ends, `device` tracks
/// the live session count, `ping`/`pong` count liveness traffic, and
/// `request_response` counts inbound SimpleRequestResponse messages.
#[derive(Debug, Default)]
pub struct Measures {
    pub connect: Counter,
    pub disconnect: Counter,
    pub ping: Counter,
    pub pong: Counter,
    pub request_response: Counter,
    pub device: Gauge,
}

impl Measures {
    pub fn new() -> Self {
        Self::default()
    }
}
