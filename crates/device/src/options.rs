//! Manager configuration.

use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderName;

use crate::events::Listener;
use crate::id::DeviceId;

/// Ceiling on resident registry entries.
pub const DEFAULT_MAX_DEVICES: usize = 100_000;

/// Initial registry map capacity.
pub const DEFAULT_INITIAL_CAPACITY: usize = 4_096;

/// Outbound queue depth per device.
pub const DEFAULT_DEVICE_MESSAGE_QUEUE_SIZE: usize = 100;

/// How often the write pump pings each device.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(45);

/// Delay before the synthetic authorization-status request is enqueued.
pub const DEFAULT_AUTH_DELAY: Duration = Duration::from_secs(60);

/// How long the read pump tolerates silence on the pong channel.
pub const DEFAULT_IDLE_PERIOD: Duration = Duration::from_secs(135);

/// Time allowed for a single transport write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest accepted WebSocket frame.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Header consulted by the default ID extractor. An upstream
/// authentication stage is expected to have validated it.
pub const DEVICE_NAME_HEADER: HeaderName = HeaderName::from_static("x-webpa-device-name");

/// Extracts the authenticated device ID from an upgrade request.
///
/// This is the seam to the upstream authentication stage: whatever that
/// stage established about the caller must be reduced to a [`DeviceId`]
/// here. Returning `None` rejects the upgrade with a 500.
pub type IdExtractor = Arc<dyn Fn(&http::Request<()>) -> Option<DeviceId> + Send + Sync>;

fn default_id_extractor(request: &http::Request<()>) -> Option<DeviceId> {
    request
        .headers()
        .get(DEVICE_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|name| !name.is_empty())
        .map(DeviceId::from)
}

/// Configuration for a [`Manager`](crate::Manager).
#[derive(Clone)]
pub struct Options {
    pub max_devices: usize,
    pub initial_capacity: usize,
    pub device_message_queue_size: usize,
    pub ping_period: Duration,
    pub auth_delay: Duration,
    pub idle_period: Duration,
    pub write_timeout: Duration,
    pub max_message_size: usize,

    /// Event listeners, fixed for the manager's lifetime. Invoked
    /// synchronously in this order.
    pub listeners: Vec<Listener>,

    pub id_extractor: IdExtractor,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_devices: DEFAULT_MAX_DEVICES,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            device_message_queue_size: DEFAULT_DEVICE_MESSAGE_QUEUE_SIZE,
            ping_period: DEFAULT_PING_PERIOD,
            auth_delay: DEFAULT_AUTH_DELAY,
            idle_period: DEFAULT_IDLE_PERIOD,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            listeners: Vec::new(),
            id_extractor: Arc::new(default_id_extractor),
        }
    }
}
