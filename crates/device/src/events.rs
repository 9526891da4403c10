//! Lifecycle and traffic events dispatched to registered listeners.

use std::sync::Arc;

use wrphub_protocol::{Format, Message};

use crate::device::{Device, Request};
use crate::error::DeviceError;

/// An event emitted by a device's pumps.
///
/// Events borrow the emitting pump's working data, so a listener cannot
/// retain one past its invocation; copy out whatever must outlive the
/// call. Dispatch is synchronous in listener-registration order, from the
/// pump that produced the event; listeners must not block and must not
/// call back into the [`Manager`](crate::Manager).
#[derive(Debug)]
pub enum Event<'a> {
    /// A device completed its upgrade and its pumps are running.
    Connect { device: &'a Arc<Device> },

    /// A device session ended; its registry entry is gone.
    Disconnect { device: &'a Arc<Device> },

    /// A decoded inbound message that is not part of a transaction.
    MessageReceived {
        device: &'a Arc<Device>,
        message: &'a Message,
        format: Format,
        contents: &'a [u8],
    },

    /// An outbound request was written to the transport.
    MessageSent {
        device: &'a Arc<Device>,
        request: &'a Request,
    },

    /// An outbound request will never be delivered. `error` is `None` when
    /// the request failed because the session ended rather than from an
    /// I/O error.
    MessageFailed {
        device: &'a Arc<Device>,
        request: &'a Request,
        error: Option<&'a DeviceError>,
    },

    /// An inbound message completed a pending transaction.
    TransactionComplete {
        device: &'a Arc<Device>,
        message: &'a Message,
        format: Format,
        contents: &'a [u8],
    },

    /// An inbound transaction part had no waiting transaction.
    TransactionBroken {
        device: &'a Arc<Device>,
        message: &'a Message,
        format: Format,
        contents: &'a [u8],
        error: &'a DeviceError,
    },
}

impl Event<'_> {
    /// The device this event concerns.
    pub fn device(&self) -> &Arc<Device> {
        match self {
            Event::Connect { device }
            | Event::Disconnect { device }
            | Event::MessageReceived { device, .. }
            | Event::MessageSent { device, .. }
            | Event::MessageFailed { device, .. }
            | Event::TransactionComplete { device, .. }
            | Event::TransactionBroken { device, .. } => device,
        }
    }
}

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&Event<'_>) + Send + Sync>;
