//! Correlation of asynchronous response frames to waiting senders.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::device::Response;
use crate::error::DeviceError;

/// Receives the single outcome of a registered transaction.
pub type Waiter = oneshot::Receiver<Result<Response, DeviceError>>;

/// Pending transactions for one device, keyed by transaction UUID.
///
/// Each key is a single-shot rendezvous: exactly one of completion or
/// cancellation retires it and delivers to its waiter. Retirement happens
/// under the table lock, so whichever of [`complete`](Self::complete) and
/// [`cancel`](Self::cancel) loses the race observes an unknown key.
#[derive(Debug, Default)]
pub struct Transactions {
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Response, DeviceError>>>>,
}

impl Transactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of outstanding transactions.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Installs a rendezvous for `key` and returns its waiter.
    pub fn register(&self, key: &str) -> Result<Waiter, DeviceError> {
        let mut pending = self.pending.lock();
        match pending.entry(key.to_owned()) {
            Entry::Occupied(_) => Err(DeviceError::DuplicateTransaction(key.to_owned())),
            Entry::Vacant(slot) => {
                let (sender, waiter) = oneshot::channel();
                slot.insert(sender);
                Ok(waiter)
            }
        }
    }

    /// Delivers `response` to the waiter registered under `key` and retires
    /// the key.
    pub fn complete(&self, key: &str, response: Response) -> Result<(), DeviceError> {
        let sender = self
            .pending
            .lock()
            .remove(key)
            .ok_or_else(|| DeviceError::UnknownTransaction(key.to_owned()))?;

        // The waiter may have given up; the key is retired either way.
        let _ = sender.send(Ok(response));
        Ok(())
    }

    /// Retires `key`, delivering `err` to its waiter if one is registered.
    pub fn cancel(&self, key: &str, err: DeviceError) {
        if let Some(sender) = self.pending.lock().remove(key) {
            let _ = sender.send(Err(err));
        }
    }

    /// Retires every outstanding key with `err`. Used at disconnect.
    pub fn cancel_all(&self, err: DeviceError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, sender) in drained {
            let _ = sender.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::id::DeviceId;
    use wrphub_protocol::{Format, Message, MessageType};

    fn response() -> Response {
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        let mut message = Message::new(MessageType::SimpleRequestResponse);
        message.source = "dns:source".into();
        message.transaction_uuid = "u1".into();
        Response {
            device,
            message,
            format: Format::Msgpack,
            contents: Vec::new(),
        }
    }

    #[tokio::test]
    async fn complete_delivers_exactly_once() {
        let transactions = Transactions::new();
        let waiter = transactions.register("u1").unwrap();

        transactions.complete("u1", response()).unwrap();
        let delivered = waiter.await.unwrap().unwrap();
        assert_eq!(delivered.message.transaction_uuid, "u1");

        // The key is retired; a second completion is unknown.
        assert!(matches!(
            transactions.complete("u1", response()),
            Err(DeviceError::UnknownTransaction(_))
        ));
        assert!(transactions.is_empty());
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let transactions = Transactions::new();
        let _waiter = transactions.register("u1").unwrap();
        assert!(matches!(
            transactions.register("u1"),
            Err(DeviceError::DuplicateTransaction(_))
        ));
        assert_eq!(transactions.len(), 1);
    }

    #[tokio::test]
    async fn cancel_delivers_the_error() {
        let transactions = Transactions::new();
        let waiter = transactions.register("u1").unwrap();

        transactions.cancel("u1", DeviceError::Cancelled);
        assert!(matches!(waiter.await.unwrap(), Err(DeviceError::Cancelled)));

        // Cancelling an unknown key is a no-op.
        transactions.cancel("u1", DeviceError::Cancelled);
        assert!(matches!(
            transactions.complete("u1", response()),
            Err(DeviceError::UnknownTransaction(_))
        ));
    }

    #[tokio::test]
    async fn cancel_all_retires_everything() {
        let transactions = Transactions::new();
        let waiters: Vec<_> = (0..5)
            .map(|i| transactions.register(&format!("u{i}")).unwrap())
            .collect();

        transactions.cancel_all(DeviceError::Closed);
        assert!(transactions.is_empty());

        for waiter in waiters {
            assert!(matches!(waiter.await.unwrap(), Err(DeviceError::Closed)));
        }
    }

    #[tokio::test]
    async fn complete_after_waiter_dropped_still_retires() {
        let transactions = Transactions::new();
        let waiter = transactions.register("u1").unwrap();
        drop(waiter);

        transactions.complete("u1", response()).unwrap();
        assert!(transactions.is_empty());
    }
}
