//! Per-session device state and the outbound send path.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use wrphub_protocol::{Format, Message};

use crate::error::DeviceError;
use crate::id::DeviceId;
use crate::statistics::Statistics;
use crate::transactions::{Transactions, Waiter};

/// An outbound WRP request addressed to one device.
#[derive(Debug, Clone)]
pub struct Request {
    pub message: Message,

    /// Pre-encoded frame bytes. Transmitted verbatim when non-empty and
    /// `format` is the wire format, skipping re-encoding.
    pub contents: Vec<u8>,

    pub format: Format,

    /// Cancelling this token abandons a blocked [`Device::send`]. The
    /// enqueued request may still be transmitted; the caller simply stops
    /// observing it.
    pub cancel: CancellationToken,

    /// Overall deadline for [`Device::send`], covering both transmission
    /// and, for transactions, the response wait.
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            contents: Vec::new(),
            format: Format::Msgpack,
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }

    /// The routing target: the device portion of the destination locator,
    /// i.e. everything before any `/service` suffix.
    pub fn id(&self) -> Result<DeviceId, DeviceError> {
        match self.message.destination.split('/').next() {
            Some(id) if !id.is_empty() => Ok(DeviceId::new(id)),
            _ => Err(DeviceError::InvalidDestination),
        }
    }

    /// The correlation key, when the message is a transaction part.
    pub fn transaction_key(&self) -> Option<&str> {
        self.message.transaction_key()
    }
}

/// An inbound message correlated back to the sender that requested it.
#[derive(Debug, Clone)]
pub struct Response {
    pub device: Arc<Device>,
    pub message: Message,
    pub format: Format,
    pub contents: Vec<u8>,
}

/// Pairs an outbound request with its single-shot completion signal.
///
/// Exactly one of success or failure is reported before the envelope is
/// discarded; the write pump signals transmission outcomes and its drain
/// signals device-closed for everything left behind.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) request: Request,
    pub(crate) complete: oneshot::Sender<Result<(), DeviceError>>,
}

/// One live WebSocket session with a remote device.
///
/// The registry owns the record for the duration of the session; the two
/// pumps share it by reference. The shutdown signal is latched: once
/// raised it stays raised, and [`request_close`](Self::request_close) is
/// idempotent. The outbound queue is never closed while the device is
/// live; senders observe shutdown through the signal, not through queue
/// closure.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    messages: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
    transactions: Transactions,
    statistics: Statistics,
}

impl Device {
    pub(crate) fn new(id: DeviceId, queue_size: usize) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (messages, outbound) = mpsc::channel(queue_size);
        let device = Arc::new(Self {
            id,
            messages,
            shutdown: CancellationToken::new(),
            transactions: Transactions::new(),
            statistics: Statistics::new(SystemTime::now()),
        });
        (device, outbound)
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Outstanding transaction count.
    pub fn pending_transactions(&self) -> usize {
        self.transactions.len()
    }

    pub(crate) fn transactions(&self) -> &Transactions {
        &self.transactions
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Whether a close has been requested for this session.
    pub fn closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Latches the shutdown signal. Idempotent; actual teardown proceeds
    /// asynchronously in the pumps.
    pub fn request_close(&self) {
        self.shutdown.cancel();
    }

    /// Enqueues a request and waits for its outcome.
    ///
    /// Returns `Ok(None)` once a non-transactional request has been
    /// written to the transport, or `Ok(Some(response))` once a matching
    /// response arrives for a transactional one. Fails immediately with
    /// [`DeviceError::Closed`] on a closed device and
    /// [`DeviceError::QueueFull`] when the outbound queue is at capacity.
    /// The wait is abandoned, and any registered transaction cancelled,
    /// on request cancellation, the request deadline, or device shutdown.
    pub async fn send(&self, request: Request) -> Result<Option<Response>, DeviceError> {
        if self.closed() {
            return Err(DeviceError::Closed);
        }

        let key = request.transaction_key().map(str::to_owned);
        let waiter = match &key {
            Some(key) => Some(self.transactions.register(key)?),
            None => None,
        };

        let cancel = request.cancel.clone();
        let timeout = request.timeout;
        let (complete_tx, complete_rx) = oneshot::channel();
        let envelope = Envelope {
            request,
            complete: complete_tx,
        };

        if let Err(err) = self.messages.try_send(envelope) {
            if let Some(key) = &key {
                self.transactions.cancel(key, DeviceError::QueueFull);
            }
            return Err(match err {
                mpsc::error::TrySendError::Full(_) => DeviceError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DeviceError::Closed,
            });
        }

        let wait = self.wait_for_outcome(complete_rx, waiter, &cancel);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(DeviceError::DeadlineExceeded)),
            None => wait.await,
        };

        if outcome.is_err() {
            if let Some(key) = &key {
                self.transactions.cancel(key, DeviceError::Cancelled);
            }
        }
        outcome
    }

    async fn wait_for_outcome(
        &self,
        complete: oneshot::Receiver<Result<(), DeviceError>>,
        waiter: Option<Waiter>,
        cancel: &CancellationToken,
    ) -> Result<Option<Response>, DeviceError> {
        tokio::select! {
            written = complete => match written {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                // Completion dropped unreported: the session tore down.
                Err(_) => return Err(DeviceError::Closed),
            },
            _ = cancel.cancelled() => return Err(DeviceError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(DeviceError::Closed),
        }

        let Some(waiter) = waiter else {
            return Ok(None);
        };

        tokio::select! {
            outcome = waiter => match outcome {
                Ok(Ok(response)) => Ok(Some(response)),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(DeviceError::Closed),
            },
            _ = cancel.cancelled() => Err(DeviceError::Cancelled),
            _ = self.shutdown.cancelled() => Err(DeviceError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrphub_protocol::MessageType;

    fn event_request() -> Request {
        let mut message = Message::new(MessageType::SimpleEvent);
        message.source = "dns:hub".into();
        message.destination = "mac:112233445566".into();
        Request::new(message)
    }

    fn transactional_request(uuid: &str) -> Request {
        let mut message = Message::new(MessageType::SimpleRequestResponse);
        message.source = "dns:hub".into();
        message.destination = "mac:112233445566".into();
        message.transaction_uuid = uuid.into();
        Request::new(message)
    }

    #[test]
    fn request_id_strips_the_service_suffix() {
        let mut request = event_request();
        request.message.destination = "mac:112233445566/config/path".into();
        assert_eq!(request.id().unwrap(), DeviceId::from("mac:112233445566"));

        request.message.destination = String::new();
        assert!(matches!(request.id(), Err(DeviceError::InvalidDestination)));
    }

    #[tokio::test]
    async fn send_on_closed_device_fails_fast() {
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        device.request_close();
        assert!(matches!(
            device.send(event_request()).await,
            Err(DeviceError::Closed)
        ));
    }

    #[tokio::test]
    async fn request_close_is_idempotent_and_latched() {
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        assert!(!device.closed());
        device.request_close();
        device.request_close();
        assert!(device.closed());
    }

    #[tokio::test]
    async fn send_fails_when_the_queue_is_full() {
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 1);

        // Nothing drains the queue; the first send occupies the only slot.
        let first = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(event_request()).await })
        };
        tokio::task::yield_now().await;

        assert!(matches!(
            device.send(event_request()).await,
            Err(DeviceError::QueueFull)
        ));

        // The blocked sender unblocks through the shutdown signal.
        device.request_close();
        assert!(matches!(first.await.unwrap(), Err(DeviceError::Closed)));
    }

    #[tokio::test]
    async fn queue_full_cancels_the_registered_transaction() {
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 1);

        let blocked = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(event_request()).await })
        };
        tokio::task::yield_now().await;

        assert!(matches!(
            device.send(transactional_request("u1")).await,
            Err(DeviceError::QueueFull)
        ));
        assert_eq!(device.pending_transactions(), 0);

        device.request_close();
        let _ = blocked.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_unblocks_send_and_cancels_the_transaction() {
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);

        let request = transactional_request("u1");
        let cancel = request.cancel.clone();

        let pending = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(request).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(device.pending_transactions(), 1);

        cancel.cancel();
        assert!(matches!(
            pending.await.unwrap(),
            Err(DeviceError::Cancelled)
        ));
        assert_eq!(device.pending_transactions(), 0);
    }

    #[tokio::test]
    async fn deadline_unblocks_send() {
        tokio::time::pause();
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);

        let mut request = transactional_request("u1");
        request.timeout = Some(Duration::from_secs(5));

        let pending = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(request).await })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(matches!(
            pending.await.unwrap(),
            Err(DeviceError::DeadlineExceeded)
        ));
        assert_eq!(device.pending_transactions(), 0);
    }

    #[tokio::test]
    async fn duplicate_transaction_key_is_rejected() {
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);

        let first = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(transactional_request("u1")).await })
        };
        tokio::task::yield_now().await;

        assert!(matches!(
            device.send(transactional_request("u1")).await,
            Err(DeviceError::DuplicateTransaction(_))
        ));

        device.request_close();
        let _ = first.await.unwrap();
    }

    #[tokio::test]
    async fn successful_event_send_returns_no_response() {
        let (device, mut outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);

        let pending = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(event_request()).await })
        };

        // Stand in for the write pump: report a successful transmission.
        let envelope = outbound.recv().await.unwrap();
        envelope.complete.send(Ok(())).unwrap();

        assert!(matches!(pending.await.unwrap(), Ok(None)));
    }

    #[tokio::test]
    async fn transactional_send_waits_for_its_response() {
        let (device, mut outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);

        let pending = {
            let device = Arc::clone(&device);
            tokio::spawn(async move { device.send(transactional_request("u1")).await })
        };

        let envelope = outbound.recv().await.unwrap();
        envelope.complete.send(Ok(())).unwrap();
        tokio::task::yield_now().await;

        let mut reply = Message::new(MessageType::SimpleRequestResponse);
        reply.source = "mac:112233445566".into();
        reply.transaction_uuid = "u1".into();
        device
            .transactions()
            .complete(
                "u1",
                Response {
                    device: Arc::clone(&device),
                    message: reply,
                    format: Format::Msgpack,
                    contents: Vec::new(),
                },
            )
            .unwrap();

        let response = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(response.message.transaction_uuid, "u1");
        assert_eq!(device.pending_transactions(), 0);
    }
}
