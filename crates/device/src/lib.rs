//! Server-side hub for long-lived WRP WebSocket sessions.
//!
//! The hub upgrades incoming connections, indexes each session in a
//! capacity-bounded registry, runs paired read/write pumps per device,
//! dispatches traffic events to listeners, and correlates request/response
//! transactions across the asynchronous stream.
//!
//! [`Manager`] is the entry point: admission ([`Manager::connect`]),
//! routing ([`Manager::route`]), visitation, and disconnection. [`Server`]
//! wraps it in a plain TCP accept loop.

mod device;
mod error;
mod events;
mod id;
mod manager;
mod metrics;
mod options;
mod registry;
mod server;
mod statistics;
mod transactions;

pub use device::{Device, Request, Response};
pub use error::DeviceError;
pub use events::{Event, Listener};
pub use id::DeviceId;
pub use manager::{Manager, MAX_DEVICES_HEADER};
pub use metrics::{Counter, Gauge, Measures};
pub use options::{
    IdExtractor, Options, DEFAULT_AUTH_DELAY, DEFAULT_DEVICE_MESSAGE_QUEUE_SIZE,
    DEFAULT_IDLE_PERIOD, DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_DEVICES,
    DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PING_PERIOD, DEFAULT_WRITE_TIMEOUT, DEVICE_NAME_HEADER,
};
pub use server::{Server, ServerConfig};
pub use statistics::Statistics;
pub use transactions::{Transactions, Waiter};
