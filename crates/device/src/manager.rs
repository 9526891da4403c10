//! The manager: admission, per-session pumps, routing, and visitation.

use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as UpgradeRequest, Response as UpgradeResponse,
};
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, WebSocketConfig};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wrphub_protocol::{
    DecoderPool, Encoder, EncoderPool, Format, Message, MessageType, AUTH_STATUS_AUTHORIZED,
};

use crate::device::{Device, Envelope, Request, Response};
use crate::error::DeviceError;
use crate::events::{Event, Listener};
use crate::id::DeviceId;
use crate::metrics::Measures;
use crate::options::{IdExtractor, Options};
use crate::registry::Registry;

/// Response header naming the registry ceiling on a capacity rejection.
pub const MAX_DEVICES_HEADER: HeaderName = HeaderName::from_static("x-xmidt-max-devices");

/// The hub for connecting, routing to, and disconnecting devices.
///
/// Cheap to share: construct once with [`Manager::new`] and clone the
/// `Arc`. All methods are callable from any task, but the visitation
/// predicates and visitors run under the registry lock and must not call
/// back into the manager.
pub struct Manager {
    registry: Registry,
    listeners: Vec<Listener>,
    measures: Measures,
    encoders: EncoderPool,
    decoders: DecoderPool,
    id_extractor: IdExtractor,

    device_message_queue_size: usize,
    ping_period: Duration,
    auth_delay: Duration,
    idle_period: Duration,
    write_timeout: Duration,
    max_message_size: usize,

    auth_status: Message,
    auth_contents: Vec<u8>,
}

impl Manager {
    pub fn new(options: Options) -> Arc<Self> {
        let encoders = EncoderPool::new(0, 0, Format::Msgpack);
        let decoders = DecoderPool::new(0, Format::Msgpack);

        // Pre-encode the authorization-status request once; an encode
        // failure here is impossible for a constant message, and the empty
        // fallback simply re-encodes in the write pump.
        let auth_status = Message::authorization_status(AUTH_STATUS_AUTHORIZED);
        let auth_contents = encoders.encode_bytes(&auth_status).unwrap_or_default();

        Arc::new(Self {
            registry: Registry::new(options.initial_capacity, options.max_devices),
            listeners: options.listeners,
            measures: Measures::new(),
            encoders,
            decoders,
            id_extractor: options.id_extractor,
            device_message_queue_size: options.device_message_queue_size,
            ping_period: options.ping_period,
            auth_delay: options.auth_delay,
            idle_period: options.idle_period,
            write_timeout: options.write_timeout,
            max_message_size: options.max_message_size,
            auth_status,
            auth_contents,
        })
    }

    pub fn measures(&self) -> &Measures {
        &self.measures
    }

    /// The number of live sessions.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.len() == 0
    }

    pub fn max_devices(&self) -> usize {
        self.registry.max_devices()
    }

    /// Upgrades an incoming connection and starts managing the device.
    ///
    /// Admission happens inside the WebSocket handshake, before any frame
    /// work: a request with no extractable device ID is refused with a
    /// 500, a full registry with a 503 naming [`MAX_DEVICES_HEADER`], and
    /// a duplicate ID evicts the resident session, which observes an
    /// ordinary disconnect. `response_headers` are added to the 101
    /// response. On success both pumps are running when this returns.
    pub async fn connect<S>(
        self: &Arc<Self>,
        stream: S,
        response_headers: HeaderMap,
    ) -> Result<Arc<Device>, DeviceError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut admitted: Option<(Arc<Device>, mpsc::Receiver<Envelope>)> = None;
        let mut rejection: Option<DeviceError> = None;

        let callback = |request: &UpgradeRequest, mut response: UpgradeResponse| {
            let id = match (self.id_extractor)(request) {
                Some(id) => id,
                None => {
                    let err = DeviceError::MissingId;
                    let http = error_response(StatusCode::INTERNAL_SERVER_ERROR, &err);
                    rejection = Some(err);
                    return Err(http);
                }
            };
            debug!(device = %id, "device connect");

            // Admit before the upgrade completes so the ceiling is
            // enforced prior to any heavy lifting.
            let (device, outbound) = Device::new(id, self.device_message_queue_size);
            match self.registry.add(Arc::clone(&device)) {
                Err(err) => {
                    warn!(device = %device.id(), error = %err, "unable to connect device");
                    let mut http = error_response(StatusCode::SERVICE_UNAVAILABLE, &err);
                    http.headers_mut()
                        .insert(MAX_DEVICES_HEADER, HeaderValue::from(self.registry.max_devices()));
                    rejection = Some(err);
                    return Err(http);
                }
                Ok(Some(previous)) => {
                    warn!(device = %device.id(), "disconnecting duplicate device");
                    previous.request_close();
                    device
                        .statistics()
                        .add_duplications(previous.statistics().duplications() + 1);
                }
                Ok(None) => {}
            }

            response.headers_mut().extend(response_headers.clone());
            admitted = Some((device, outbound));
            Ok(response)
        };

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);

        let upgrade =
            tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(config)).await;

        match upgrade {
            Ok(ws) => match admitted {
                Some((device, outbound)) => {
                    self.start_pumps(Arc::clone(&device), ws, outbound);
                    Ok(device)
                }
                // The handshake cannot succeed without the callback
                // having admitted a device.
                None => Err(DeviceError::MissingId),
            },
            Err(err) => {
                if let Some((device, _)) = admitted {
                    // Upgrade failed after admission; roll it back.
                    self.registry.remove(&device);
                }
                Err(rejection.unwrap_or_else(|| err.into()))
            }
        }
    }

    /// Dispatches a request to the device named by its destination.
    pub async fn route(&self, request: Request) -> Result<Option<Response>, DeviceError> {
        let id = request.id()?;
        match self.registry.get(&id) {
            Some(device) => device.send(request).await,
            None => Err(DeviceError::NotFound),
        }
    }

    /// Requests closure of the device registered under `id`. Teardown is
    /// asynchronous; returns whether the ID was resident.
    pub fn disconnect(&self, id: &DeviceId) -> bool {
        match self.registry.remove_id(id) {
            Some(device) => {
                device.request_close();
                true
            }
            None => false,
        }
    }

    /// Requests closure of every device whose ID matches, returning how
    /// many matched.
    pub fn disconnect_if(&self, predicate: impl Fn(&DeviceId) -> bool) -> usize {
        self.registry
            .remove_if(predicate, |device| device.request_close())
    }

    pub fn get(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.registry.get(id)
    }

    pub fn visit_all(&self, visitor: impl FnMut(&Arc<Device>)) -> usize {
        self.registry.visit_all(visitor)
    }

    pub fn visit_if(
        &self,
        predicate: impl Fn(&DeviceId) -> bool,
        visitor: impl FnMut(&Arc<Device>),
    ) -> usize {
        self.registry.visit_if(predicate, visitor)
    }

    fn dispatch(&self, event: &Event<'_>) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    fn start_pumps<S>(
        self: &Arc<Self>,
        device: Arc<Device>,
        ws: tokio_tungstenite::WebSocketStream<S>,
        outbound: mpsc::Receiver<Envelope>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let close_once = Arc::new(Once::new());

        let manager = Arc::clone(self);
        let reader_device = Arc::clone(&device);
        let reader_once = Arc::clone(&close_once);
        tokio::spawn(async move {
            manager.read_pump(reader_device, stream, reader_once).await;
        });

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.write_pump(device, sink, outbound, close_once).await;
        });
    }

    /// Tears down a session. Runs exactly once per device, from whichever
    /// pump exits first.
    fn pump_close(&self, device: &Arc<Device>, error: Option<&DeviceError>) {
        self.measures.disconnect.inc();
        self.measures.device.add(-1);

        match error {
            Some(err) => warn!(device = %device.id(), error = %err, "pump close"),
            None => debug!(device = %device.id(), "pump close"),
        }

        self.registry.remove(device);

        // Always latch shutdown so the other pump and any blocked senders
        // observe the closure.
        device.request_close();
        device.transactions().cancel_all(DeviceError::Closed);

        self.dispatch(&Event::Disconnect { device });
    }

    /// Consumes inbound frames: decodes binary WRP, completes
    /// transactions, and dispatches one event per frame. Exits on any
    /// read error, the idle deadline, or session shutdown.
    async fn read_pump<R>(
        self: Arc<Self>,
        device: Arc<Device>,
        mut stream: R,
        close_once: Arc<Once>,
    ) where
        R: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        debug!(device = %device.id(), "read pump starting");
        self.measures.connect.inc();
        self.measures.device.add(1);

        let mut decoder = self.decoders.get();
        let mut read_error: Option<DeviceError> = None;

        // Armed at start and reset on every pong.
        let idle = tokio::time::sleep(self.idle_period);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = device.shutdown_token().cancelled() => break,

                () = &mut idle => {
                    read_error = Some(DeviceError::IdleTimeout);
                    break;
                }

                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Binary(data))) => {
                        device.statistics().add_bytes_received(data.len() as u64);
                        device.statistics().add_messages_received(1);

                        let message = match decoder.decode(&data) {
                            Ok(message) => message,
                            Err(err) => {
                                warn!(device = %device.id(), error = %err, "skipping malformed WRP frame");
                                continue;
                            }
                        };

                        if message.msg_type == MessageType::SimpleRequestResponse {
                            self.measures.request_response.inc();
                        }

                        self.dispatch_received(&device, &message, &data);
                    }
                    Some(Ok(WsMessage::Text(_))) => {
                        warn!(device = %device.id(), "skipping non-binary frame");
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        self.measures.pong.inc();
                        idle.as_mut().reset(Instant::now() + self.idle_period);
                    }
                    Some(Ok(WsMessage::Ping(_))) => {
                        // The transport queues the pong on the next write.
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Err(err)) => {
                        read_error = Some(err.into());
                        break;
                    }
                }
            }
        }

        self.decoders.put(decoder);
        close_once.call_once(|| self.pump_close(&device, read_error.as_ref()));
    }

    /// One event per decoded frame: a transaction part completes (or
    /// breaks) its transaction, everything else is a plain receive.
    fn dispatch_received(&self, device: &Arc<Device>, message: &Message, contents: &[u8]) {
        let format = Format::Msgpack;
        match message.transaction_key() {
            None => self.dispatch(&Event::MessageReceived {
                device,
                message,
                format,
                contents,
            }),
            Some(key) => {
                let response = Response {
                    device: Arc::clone(device),
                    message: message.clone(),
                    format,
                    contents: contents.to_vec(),
                };
                match device.transactions().complete(key, response) {
                    Ok(()) => self.dispatch(&Event::TransactionComplete {
                        device,
                        message,
                        format,
                        contents,
                    }),
                    Err(err) => {
                        warn!(device = %device.id(), error = %err, "error while completing transaction");
                        self.dispatch(&Event::TransactionBroken {
                            device,
                            message,
                            format,
                            contents,
                            error: &err,
                        });
                    }
                }
            }
        }
    }

    /// Drains the outbound queue to the transport, pings on a timer, and
    /// enqueues the delayed authorization-status request. Exits on any
    /// write error or session shutdown, then fails whatever is left in
    /// the queue.
    async fn write_pump<W>(
        self: Arc<Self>,
        device: Arc<Device>,
        mut sink: W,
        mut outbound: mpsc::Receiver<Envelope>,
        close_once: Arc<Once>,
    ) where
        W: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        debug!(device = %device.id(), "write pump starting");
        self.dispatch(&Event::Connect { device: &device });

        let mut encoder = self.encoders.get();
        let mut write_error: Option<DeviceError> = None;

        let mut ping = tokio::time::interval(self.ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.reset();

        // One-shot: after the configured delay, the device is told its
        // authorization status. Shutdown releases the device reference
        // without sending.
        let auth_timer = tokio::spawn({
            let device = Arc::clone(&device);
            let delay = self.auth_delay;
            let request = self.auth_status_request();
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let _ = device.send(request).await;
                    }
                    _ = device.shutdown_token().cancelled() => {}
                }
            }
        });

        loop {
            tokio::select! {
                _ = device.shutdown_token().cancelled() => break,

                envelope = outbound.recv() => {
                    let Some(envelope) = envelope else { break };
                    if let Some(err) = self.transmit(&device, &mut sink, &mut encoder, envelope).await {
                        write_error = Some(err);
                        break;
                    }
                }

                _ = ping.tick() => {
                    self.measures.ping.inc();
                    let payload = device.id().as_str().as_bytes().to_vec();
                    if let Err(err) = self.timed_send(&mut sink, WsMessage::Ping(payload.into())).await {
                        write_error = Some(err);
                        break;
                    }
                }
            }
        }

        let _ = tokio::time::timeout(self.write_timeout, sink.close()).await;

        auth_timer.abort();
        self.encoders.put(encoder);
        close_once.call_once(|| self.pump_close(&device, write_error.as_ref()));

        // Drain without blocking. A null event error marks these as failed
        // by disconnect, not by I/O; the completion still reports.
        while let Ok(undeliverable) = outbound.try_recv() {
            warn!(device = %device.id(), "undeliverable message");
            let _ = undeliverable.complete.send(Err(DeviceError::Closed));
            self.dispatch(&Event::MessageFailed {
                device: &device,
                request: &undeliverable.request,
                error: None,
            });
        }
    }

    /// Writes one envelope, reporting its completion and dispatching the
    /// sent/failed event. Returns the error when it was fatal to the
    /// session.
    async fn transmit<W>(
        &self,
        device: &Arc<Device>,
        sink: &mut W,
        encoder: &mut Encoder,
        envelope: Envelope,
    ) -> Option<DeviceError>
    where
        W: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        let Envelope { request, complete } = envelope;

        // Pre-encoded wire-format contents pass through verbatim.
        let encoded: Result<Vec<u8>, DeviceError> =
            if request.format == Format::Msgpack && !request.contents.is_empty() {
                Ok(request.contents.clone())
            } else {
                encoder
                    .encode(&request.message)
                    .map(<[u8]>::to_vec)
                    .map_err(DeviceError::from)
            };

        let written = match encoded {
            Ok(frame) => {
                let frame_len = frame.len() as u64;
                self.timed_send(sink, WsMessage::Binary(frame.into()))
                    .await
                    .map(|()| {
                        device.statistics().add_bytes_sent(frame_len);
                        device.statistics().add_messages_sent(1);
                    })
            }
            Err(err) => Err(err),
        };

        match written {
            Ok(()) => {
                let _ = complete.send(Ok(()));
                self.dispatch(&Event::MessageSent {
                    device,
                    request: &request,
                });
                None
            }
            Err(err) => {
                let _ = complete.send(Err(err.clone()));
                self.dispatch(&Event::MessageFailed {
                    device,
                    request: &request,
                    error: Some(&err),
                });
                Some(err)
            }
        }
    }

    async fn timed_send<W>(&self, sink: &mut W, frame: WsMessage) -> Result<(), DeviceError>
    where
        W: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        match tokio::time::timeout(self.write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(DeviceError::WriteTimeout),
        }
    }

    fn auth_status_request(&self) -> Request {
        Request {
            message: self.auth_status.clone(),
            contents: self.auth_contents.clone(),
            format: Format::Msgpack,
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }
}

/// An HTTP refusal with a small JSON body, in the hub's standard shape.
fn error_response(code: StatusCode, err: &DeviceError) -> ErrorResponse {
    let body = format!(r#"{{"code": {}, "message": "{}"}}"#, code.as_u16(), err);
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use parking_lot::Mutex;

    fn recording_listener() -> (Listener, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::clone(&log);
        let listener: Listener = Arc::new(move |event: &Event<'_>| {
            let tag = match event {
                Event::Connect { .. } => "connect",
                Event::Disconnect { .. } => "disconnect",
                Event::MessageReceived { .. } => "message_received",
                Event::MessageSent { .. } => "message_sent",
                Event::MessageFailed { error: Some(_), .. } => "message_failed(io)",
                Event::MessageFailed { error: None, .. } => "message_failed(drain)",
                Event::TransactionComplete { .. } => "transaction_complete",
                Event::TransactionBroken { .. } => "transaction_broken",
            };
            events.lock().push(tag.to_owned());
        });
        (listener, log)
    }

    fn manager_with_listener() -> (Arc<Manager>, Arc<Mutex<Vec<String>>>) {
        let (listener, log) = recording_listener();
        let options = Options {
            listeners: vec![listener],
            ..Options::default()
        };
        (Manager::new(options), log)
    }

    fn event_request(destination: &str) -> Request {
        let mut message = Message::new(MessageType::SimpleEvent);
        message.source = "dns:hub.example.com".into();
        message.destination = destination.into();
        Request::new(message)
    }

    /// A sink that forwards frames onto a channel for inspection.
    fn capturing_sink() -> (
        impl Sink<WsMessage, Error = tungstenite::Error> + Unpin,
        mpsc::Receiver<WsMessage>,
    ) {
        let (frames_tx, frames_rx) = mpsc::channel::<WsMessage>(64);
        let sink = Box::pin(sink::unfold(frames_tx, |tx, frame: WsMessage| async move {
            let _ = tx.send(frame).await;
            Ok::<_, tungstenite::Error>(tx)
        }));
        (sink, frames_rx)
    }

    #[tokio::test]
    async fn write_pump_transmits_preencoded_contents_verbatim() {
        let (manager, log) = manager_with_listener();
        let (device, outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        let close_once = Arc::new(Once::new());
        let (sink, mut frames) = capturing_sink();

        let pump = tokio::spawn({
            let manager = Arc::clone(&manager);
            let device = Arc::clone(&device);
            async move { manager.write_pump(device, sink, outbound, close_once).await }
        });

        let mut request = event_request("mac:112233445566");
        request.contents = vec![0xA1, 0xB2, 0xC3];

        assert!(device.send(request).await.unwrap().is_none());

        match frames.recv().await.unwrap() {
            WsMessage::Binary(data) => assert_eq!(data.as_ref(), &[0xA1, 0xB2, 0xC3][..]),
            other => panic!("expected a binary frame, got {other:?}"),
        }
        assert!(log.lock().contains(&"message_sent".to_owned()));

        device.request_close();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn write_pump_encodes_when_contents_are_absent() {
        let (manager, _log) = manager_with_listener();
        let (device, outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        let close_once = Arc::new(Once::new());
        let (sink, mut frames) = capturing_sink();

        let pump = tokio::spawn({
            let manager = Arc::clone(&manager);
            let device = Arc::clone(&device);
            async move { manager.write_pump(device, sink, outbound, close_once).await }
        });

        let request = event_request("mac:112233445566");
        let sent_message = request.message.clone();
        device.send(request).await.unwrap();

        match frames.recv().await.unwrap() {
            WsMessage::Binary(data) => {
                let mut decoder = wrphub_protocol::Decoder::new(Format::Msgpack);
                assert_eq!(decoder.decode(&data).unwrap(), sent_message);
            }
            other => panic!("expected a binary frame, got {other:?}"),
        }

        assert_eq!(device.statistics().messages_sent(), 1);
        assert!(device.statistics().bytes_sent() > 0);

        device.request_close();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn write_failure_fails_current_and_drains_the_rest() {
        let (manager, log) = manager_with_listener();
        let (device, outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        let close_once = Arc::new(Once::new());

        // Two requests queued before the pump starts.
        let first = tokio::spawn({
            let device = Arc::clone(&device);
            async move { device.send(event_request("mac:112233445566")).await }
        });
        let second = tokio::spawn({
            let device = Arc::clone(&device);
            async move { device.send(event_request("mac:112233445566")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Every write fails.
        let sink = Box::pin(sink::unfold((), |(), _frame: WsMessage| async move {
            Err::<(), tungstenite::Error>(tungstenite::Error::ConnectionClosed)
        }));

        Arc::clone(&manager)
            .write_pump(Arc::clone(&device), sink, outbound, close_once)
            .await;

        // One send failed on the wire, the other was drained; both were
        // reported.
        assert!(first.await.unwrap().is_err());
        assert!(second.await.unwrap().is_err());
        assert!(device.closed());

        let events = log.lock();
        assert_eq!(events.iter().filter(|t| *t == "message_failed(io)").count(), 1);
        assert_eq!(events.iter().filter(|t| *t == "message_failed(drain)").count(), 1);
        assert_eq!(events.iter().filter(|t| *t == "disconnect").count(), 1);
    }

    #[tokio::test]
    async fn read_pump_decodes_completes_and_dispatches() {
        let (manager, log) = manager_with_listener();
        let (device, _outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        let close_once = Arc::new(Once::new());

        let waiter = device.transactions().register("u1").unwrap();

        let mut encoder = wrphub_protocol::Encoder::new(Format::Msgpack);

        let mut reply = Message::new(MessageType::SimpleRequestResponse);
        reply.source = "mac:112233445566".into();
        reply.transaction_uuid = "u1".into();
        let reply_frame = encoder.encode(&reply).unwrap().to_vec();

        let mut event = Message::new(MessageType::SimpleEvent);
        event.source = "mac:112233445566".into();
        let event_frame = encoder.encode(&event).unwrap().to_vec();

        let mut orphan = Message::new(MessageType::SimpleRequestResponse);
        orphan.source = "mac:112233445566".into();
        orphan.transaction_uuid = "never-registered".into();
        let orphan_frame = encoder.encode(&orphan).unwrap().to_vec();

        let frames: Vec<Result<WsMessage, tungstenite::Error>> = vec![
            Ok(WsMessage::Binary(reply_frame.into())),
            Ok(WsMessage::Binary(event_frame.into())),
            // Malformed: skipped, not fatal.
            Ok(WsMessage::Binary(vec![0xFF, 0x00].into())),
            // Non-binary: skipped.
            Ok(WsMessage::Text("not wrp".into())),
            Ok(WsMessage::Binary(orphan_frame.into())),
        ];

        Arc::clone(&manager)
            .read_pump(Arc::clone(&device), stream::iter(frames), close_once)
            .await;

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.message.transaction_uuid, "u1");
        assert_eq!(response.format, Format::Msgpack);

        assert_eq!(
            *log.lock(),
            vec![
                "transaction_complete".to_owned(),
                "message_received".to_owned(),
                "transaction_broken".to_owned(),
                "disconnect".to_owned(),
            ]
        );

        // The stream ended, so the shared cleanup ran.
        assert!(device.closed());
        assert_eq!(manager.measures().connect.value(), 1);
        assert_eq!(manager.measures().disconnect.value(), 1);
        assert_eq!(manager.measures().device.value(), 0);
        assert_eq!(manager.measures().request_response.value(), 2);
        assert_eq!(device.statistics().messages_received(), 4);
    }

    #[tokio::test]
    async fn auth_status_is_enqueued_after_the_delay() {
        let options = Options {
            auth_delay: Duration::from_millis(50),
            ..Options::default()
        };
        let manager = Manager::new(options);
        let (device, outbound) = Device::new(DeviceId::from("mac:112233445566"), 4);
        let close_once = Arc::new(Once::new());
        let (sink, mut frames) = capturing_sink();

        let pump = tokio::spawn({
            let manager = Arc::clone(&manager);
            let device = Arc::clone(&device);
            async move { manager.write_pump(device, sink, outbound, close_once).await }
        });

        let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
            .await
            .expect("auth status frame in time")
            .expect("frame present");

        match frame {
            WsMessage::Binary(data) => {
                let mut decoder = wrphub_protocol::Decoder::new(Format::Msgpack);
                let message = decoder.decode(&data).unwrap();
                assert_eq!(message.msg_type, MessageType::Auth);
                assert_eq!(message.status, Some(AUTH_STATUS_AUTHORIZED));
            }
            other => panic!("expected a binary frame, got {other:?}"),
        }

        device.request_close();
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn facade_routes_and_disconnects() {
        let (manager, _log) = manager_with_listener();

        assert!(matches!(
            manager.route(event_request("mac:absent")).await,
            Err(DeviceError::NotFound)
        ));
        assert!(matches!(
            manager.route(event_request("")).await,
            Err(DeviceError::InvalidDestination)
        ));

        let (a, _outbound_a) = Device::new(DeviceId::from("mac:a"), 4);
        let (b, _outbound_b) = Device::new(DeviceId::from("mac:b"), 4);
        manager.registry.add(Arc::clone(&a)).unwrap();
        manager.registry.add(Arc::clone(&b)).unwrap();

        assert_eq!(manager.len(), 2);
        assert!(manager.get(&DeviceId::from("mac:a")).is_some());
        assert_eq!(manager.visit_all(|_| {}), 2);
        assert_eq!(manager.visit_if(|id| id.as_str() == "mac:a", |_| {}), 1);

        assert!(manager.disconnect(&DeviceId::from("mac:a")));
        assert!(a.closed());
        assert!(!manager.disconnect(&DeviceId::from("mac:a")));

        assert_eq!(manager.disconnect_if(|_| true), 1);
        assert!(b.closed());
        assert!(manager.is_empty());
    }
}
