//! # eventsock socket
//!
//! Named, typed events over TCP, UDP or WebSocket behind one API: register a
//! handler for an event name, emit events with optional payloads, and answer
//! the sender from inside the handler through its [`EventContext`].
//!
//! ## Example
//!
//! ```no_run
//! use eventsock_protocol::TransportKind;
//! use eventsock_socket::{EventContext, EventSocket, SocketConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), eventsock_socket::SocketError> {
//!     let config = SocketConfig::new("127.0.0.1".parse().unwrap(), TransportKind::Udp)
//!         .with_receive_port(9000);
//!     let socket = EventSocket::configure(config).await?;
//!
//!     socket.on_with("ping", |ctx: EventContext, n: i32| async move {
//!         let _ = ctx.emit_with("ack", &(n + 1)).await;
//!     });
//!     socket.listen().await?;
//!     socket.join_listener().await
//! }
//! ```

pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod io;
pub mod ports;
pub mod transport;

pub use config::{ResetOptions, SocketConfig, DEFAULT_TIMEOUT_MS};
pub use context::EventContext;
pub use emitter::{Emitter, EmitterHandle, EmitterRegistry};
pub use error::{Result, SocketError};
pub use transport::{TransportHandler, WebSocketRelay};

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use eventsock_protocol::{
    CodecType, Envelope, Inbound, Payload, Transport, TransportError, TransportKind,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

/// Capacity of the transport → dispatch queue
const INBOUND_QUEUE_SIZE: usize = 256;

/// How long close waits for a receive loop before aborting it
const LISTENER_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Event socket over one transport
///
/// Cheap to clone; clones share configuration, handlers and the transport.
/// Handlers that capture a clone of their own socket keep it alive until
/// [`close`](Self::close) clears them.
#[derive(Clone)]
pub struct EventSocket {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<SocketConfig>,
    transport: RwLock<Option<TransportHandler>>,
    emitters: EmitterRegistry,
    listener: Mutex<Option<ListenerTask>>,

    /// Held for the duration of one handler invocation
    dispatch_lock: Mutex<()>,
}

struct ListenerTask {
    id: Uuid,
    local_addr: SocketAddr,
    listen: JoinHandle<std::result::Result<(), TransportError>>,
    pump: Option<JoinHandle<()>>,

    /// Flips to true when the receive loop returns
    finished: watch::Receiver<bool>,
}

impl ListenerTask {
    /// Collects the result of a receive loop that already returned
    ///
    /// The pump is detached so it can drain what the loop queued.
    async fn finish(mut self) -> Result<()> {
        drop(self.pump.take());
        match (&mut self.listen).await {
            Ok(Ok(())) => Ok(()),
            other => Err(listener_failure(other)),
        }
    }

    async fn stop(mut self) {
        if tokio::time::timeout(LISTENER_SHUTDOWN_GRACE, &mut self.listen)
            .await
            .is_err()
        {
            tracing::warn!(addr = %self.local_addr, "Listener did not stop in time, aborting");
            self.listen.abort();
        }
    }
}

impl Drop for ListenerTask {
    fn drop(&mut self) {
        self.listen.abort();
        if let Some(pump) = &self.pump {
            pump.abort();
        }
    }
}

/// Outcome of routing one inbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Handled,
    Unhandled,
}

impl EventSocket {
    /// Validates `config` and builds the matching transport handler
    ///
    /// Does not start listening; call [`listen`](Self::listen) once handlers
    /// are registered if a receive port is configured.
    pub async fn configure(mut config: SocketConfig) -> Result<Self> {
        config.validate()?;
        let transport =
            TransportHandler::build(config.transport, config.transport_settings()?).await?;

        tracing::info!(
            address = %config.address,
            send_port = config.send_port,
            receive_port = config.receive_port,
            transport = %config.transport,
            codec_id = config.codec_id,
            "Socket configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                transport: RwLock::new(Some(transport)),
                emitters: EmitterRegistry::new(),
                listener: Mutex::new(None),
                dispatch_lock: Mutex::new(()),
            }),
        })
    }

    /// Adds the listener role on `receive_port` and starts the receive loop
    pub async fn attach_listener(&self, receive_port: u16) -> Result<()> {
        if receive_port == 0 {
            return Err(SocketError::Configuration(
                "receive port must be nonzero to listen for messages".into(),
            ));
        }

        let previous = self.config();
        let settings = self.update_config(|config| {
            if config.receive_port != 0 {
                return Err(SocketError::Configuration(format!(
                    "a listener is already attached on port {}; reset the socket to change it",
                    config.receive_port
                )));
            }
            config.receive_port = receive_port;
            Ok(())
        })?;

        let attached = match self.current_transport() {
            Ok(transport) => match transport.setup(settings).await {
                Ok(()) => self.listen().await,
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = attached {
            self.restore_config(previous).await;
            return Err(e);
        }

        tracing::info!(receive_port, "Listener attached");
        Ok(())
    }

    /// Adds the sender role on `send_port`, optionally emitting `initial_event`
    pub async fn attach_sender(&self, send_port: u16, initial_event: Option<&str>) -> Result<()> {
        if send_port == 0 {
            return Err(SocketError::Configuration(
                "send port must be nonzero to emit messages".into(),
            ));
        }

        let settings = self.update_config(|config| {
            if config.send_port != 0 {
                return Err(SocketError::Configuration(format!(
                    "a sender is already attached on port {}; reset the socket to change it",
                    config.send_port
                )));
            }
            config.send_port = send_port;
            Ok(())
        })?;

        self.current_transport()?.setup(settings).await?;
        tracing::info!(send_port, "Sender attached");

        if let Some(event) = initial_event {
            self.emit(event).await?;
        }
        Ok(())
    }

    /// Starts the background receive loop on the configured receive port
    ///
    /// Returns once the endpoint is bound. Inbound envelopes are dispatched on
    /// their own tasks, one handler invocation at a time.
    pub async fn listen(&self) -> Result<()> {
        let mut slot = self.inner.listener.lock().await;
        if slot.as_ref().is_some_and(|task| !task.listen.is_finished()) {
            return Err(SocketError::Configuration("socket is already listening".into()));
        }

        let config = self.config();
        if config.receive_port == 0 {
            return Err(SocketError::Configuration(
                "receive port is 0; attach a listener first".into(),
            ));
        }

        let transport = self.current_transport()?;
        let endpoint = config.listen_endpoint();
        let (incoming_tx, incoming_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (finished_tx, finished) = watch::channel(false);

        let listen = tokio::spawn(run_listener(
            transport,
            endpoint,
            incoming_tx,
            ready_tx,
            finished_tx,
        ));
        let local_addr = match ready_rx.await {
            Ok(addr) => addr,
            Err(_) => return Err(listener_failure(listen.await)),
        };
        let pump = tokio::spawn(dispatch_pump(Arc::downgrade(&self.inner), incoming_rx));

        tracing::info!(addr = %local_addr, transport = %config.transport, "Listening");
        *slot = Some(ListenerTask {
            id: Uuid::new_v4(),
            local_addr,
            listen,
            pump: Some(pump),
            finished,
        });
        Ok(())
    }

    /// Waits for the receive loop to stop
    ///
    /// Returns the transport error that stopped it, or `Ok(())` after
    /// [`close`](Self::close) or when nothing is listening.
    ///
    /// Dropping the returned future leaves the listener running.
    pub async fn join_listener(&self) -> Result<()> {
        let (id, mut finished) = match self.inner.listener.lock().await.as_ref() {
            Some(task) => (task.id, task.finished.clone()),
            None => return Ok(()),
        };

        // A dropped sender means the loop was aborted
        let _ = finished.wait_for(|done| *done).await;

        let task = {
            let mut slot = self.inner.listener.lock().await;
            if slot.as_ref().is_some_and(|task| task.id == id) {
                slot.take()
            } else {
                None
            }
        };
        match task {
            Some(task) => task.finish().await,
            // Stopped by close or replaced by reset
            None => Ok(()),
        }
    }

    /// Registers a bodiless handler, replacing any handler for `event`
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> EmitterHandle
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Emitter::bodiless(event, handler))
    }

    /// Registers a handler taking the payload decoded as `T`
    pub fn on_with<T, F, Fut>(&self, event: &str, handler: F) -> EmitterHandle
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(EventContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Emitter::typed(event, handler))
    }

    pub fn register(&self, emitter: Emitter) -> EmitterHandle {
        self.inner.emitters.register(emitter)
    }

    /// Removes a registration; false if it was already replaced or removed
    pub fn off(&self, handle: &EmitterHandle) -> bool {
        self.inner.emitters.remove(handle)
    }

    pub fn emitters(&self) -> &EmitterRegistry {
        &self.inner.emitters
    }

    /// Emits a bodiless event on the default route
    pub async fn emit(&self, event: &str) -> Result<()> {
        let envelope = self.envelope(event, None::<&()>)?;
        self.send_envelope(envelope, None).await
    }

    pub async fn emit_with<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<()> {
        let envelope = self.envelope(event, Some(payload))?;
        self.send_envelope(envelope, None).await
    }

    pub async fn emit_to(&self, event: &str, destination: SocketAddr) -> Result<()> {
        let envelope = self.envelope(event, None::<&()>)?;
        self.send_envelope(envelope, Some(destination)).await
    }

    pub async fn emit_with_to<T: Serialize + ?Sized>(
        &self,
        event: &str,
        payload: &T,
        destination: SocketAddr,
    ) -> Result<()> {
        let envelope = self.envelope(event, Some(payload))?;
        self.send_envelope(envelope, Some(destination)).await
    }

    /// Stops listening, releases the transport and clears every handler
    ///
    /// Closing an already closed socket is a no-op.
    pub async fn close(&self) -> Result<()> {
        self.inner.emitters.clear();

        let transport = self.write_transport().take();
        let result = match &transport {
            Some(transport) => transport.close().await,
            None => Ok(()),
        };
        self.stop_listener().await;

        if transport.is_some() {
            tracing::info!("Socket closed");
        }
        result.map_err(SocketError::from)
    }

    /// Rebuilds the socket with `options` applied over the current config
    ///
    /// The old transport is closed with errors ignored, a fresh handler is
    /// built, and listening restarts if a receive port is set. Handlers stay
    /// registered. Works on a closed socket.
    pub async fn reset(&self, options: ResetOptions) -> Result<()> {
        let previous = self.write_transport().take();
        if let Some(transport) = previous {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "Ignoring close error during reset");
            }
        }
        self.stop_listener().await;

        let mut next = options.merge(&self.config());
        next.validate()?;
        let transport = TransportHandler::build(next.transport, next.transport_settings()?).await?;

        tracing::info!(
            address = %next.address,
            send_port = next.send_port,
            receive_port = next.receive_port,
            transport = %next.transport,
            "Socket reset"
        );

        let listen = next.receive_port != 0;
        *self.write_config() = next;
        *self.write_transport() = Some(transport);

        if listen {
            self.listen().await?;
        }
        Ok(())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> SocketConfig {
        self.read_config().clone()
    }

    pub fn address(&self) -> IpAddr {
        self.read_config().address
    }

    pub fn send_port(&self) -> u16 {
        self.read_config().send_port
    }

    pub fn receive_port(&self) -> u16 {
        self.read_config().receive_port
    }

    pub fn timeout(&self) -> Duration {
        self.read_config().timeout()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.read_config().transport
    }

    pub fn codec(&self) -> CodecType {
        self.read_config().codec().unwrap_or_default()
    }

    /// Address the receive loop is bound to, if listening
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .listener
            .lock()
            .await
            .as_ref()
            .filter(|task| !task.listen.is_finished())
            .map(|task| task.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.read_transport()
            .as_ref()
            .is_some_and(|transport| transport.state().is_listening())
    }

    /// True once closed and until the next reset
    pub fn is_closed(&self) -> bool {
        self.read_transport().is_none()
    }

    /// Routes a handler reply: to `reply_addr` when known, else the default route
    pub(crate) async fn send_reply(
        &self,
        envelope: Envelope,
        reply_addr: Option<SocketAddr>,
    ) -> Result<()> {
        match reply_addr {
            Some(destination) => self.transmit(envelope, destination).await,
            None => self.send_envelope(envelope, None).await,
        }
    }

    pub(crate) fn envelope<T: Serialize + ?Sized>(
        &self,
        event: &str,
        payload: Option<&T>,
    ) -> Result<Envelope> {
        let envelope = match payload {
            Some(value) => Envelope::with_payload(event, Payload::encode(&self.codec(), value)?),
            None => Envelope::new(event),
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Decodes one inbound frame and runs the matching handler
    ///
    /// Invocations on one socket never overlap; decoding happens before the
    /// dispatch lock is taken.
    pub(crate) async fn dispatch_inbound(&self, inbound: Inbound) -> Result<Dispatch> {
        let codec = self.codec();
        let envelope = codec.decode_envelope(&inbound.bytes)?;

        let _guard = self.inner.dispatch_lock.lock().await;
        let Some(emitter) = self.inner.emitters.get(&envelope.event) else {
            tracing::debug!(event = %envelope.event, peer = %inbound.peer, "No emitter registered, dropping");
            return Ok(Dispatch::Unhandled);
        };

        tracing::trace!(
            event = %envelope.event,
            peer = %inbound.peer,
            callback_port = envelope.callback_port,
            "Dispatching"
        );

        let ctx = EventContext::new(
            self.clone(),
            envelope.event,
            inbound.peer.ip(),
            envelope.callback_port,
        );
        emitter.invoke(ctx, envelope.payload, codec)?.await;
        Ok(Dispatch::Handled)
    }

    async fn send_envelope(&self, envelope: Envelope, destination: Option<SocketAddr>) -> Result<()> {
        let default_route = self.read_config().default_route();
        let Some(default_route) = default_route else {
            return Err(SocketError::NotConfigured(format!(
                "cannot emit '{}' without a send port",
                envelope.event
            )));
        };

        self.transmit(envelope, destination.unwrap_or(default_route))
            .await
    }

    async fn transmit(&self, envelope: Envelope, destination: SocketAddr) -> Result<()> {
        let transport = self.current_transport()?;
        tracing::debug!(event = %envelope.event, destination = %destination, "Emitting");
        transport.send(envelope, destination).await?;
        Ok(())
    }

    async fn stop_listener(&self) {
        let task = self.inner.listener.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// Puts back a config whose role change failed, so sends stop stamping
    /// the unbound port
    async fn restore_config(&self, previous: SocketConfig) {
        let settings = previous.transport_settings();
        *self.write_config() = previous;

        if let (Ok(transport), Ok(settings)) = (self.current_transport(), settings) {
            if let Err(e) = transport.setup(settings).await {
                tracing::debug!(error = %e, "Could not restore transport settings");
            }
        }
    }

    fn current_transport(&self) -> Result<TransportHandler> {
        self.read_transport().clone().ok_or_else(|| {
            SocketError::NotConfigured("socket is closed; reset it to reuse".into())
        })
    }

    /// Applies `update` to a copy of the config, validates it, then commits
    fn update_config<F>(&self, update: F) -> Result<eventsock_protocol::TransportSettings>
    where
        F: FnOnce(&mut SocketConfig) -> Result<()>,
    {
        let mut config = self.write_config();
        let mut next = config.clone();
        update(&mut next)?;
        next.validate()?;
        let settings = next.transport_settings()?;
        *config = next;
        Ok(settings)
    }

    fn read_config(&self) -> RwLockReadGuard<'_, SocketConfig> {
        self.inner.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, SocketConfig> {
        self.inner.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_transport(&self) -> RwLockReadGuard<'_, Option<TransportHandler>> {
        self.inner.transport.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_transport(&self) -> RwLockWriteGuard<'_, Option<TransportHandler>> {
        self.inner.transport.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSocket")
            .field("config", &*self.read_config())
            .field("emitters", &self.inner.emitters.len())
            .field("listening", &self.is_listening())
            .finish()
    }
}

async fn run_listener(
    transport: TransportHandler,
    endpoint: SocketAddr,
    incoming_tx: mpsc::Sender<Inbound>,
    ready: oneshot::Sender<SocketAddr>,
    finished: watch::Sender<bool>,
) -> std::result::Result<(), TransportError> {
    let result = transport.listen(endpoint, incoming_tx, ready).await;
    if let Err(e) = &result {
        tracing::error!(endpoint = %endpoint, error = %e, "Listener failed");
    }
    finished.send_replace(true);
    result
}

/// Forwards inbound frames to dispatch tasks while the socket is alive
async fn dispatch_pump(inner: Weak<Inner>, mut incoming_rx: mpsc::Receiver<Inbound>) {
    while let Some(inbound) = incoming_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let socket = EventSocket { inner };
        let peer = inbound.peer;

        tokio::spawn(async move {
            match socket.dispatch_inbound(inbound).await {
                Ok(_) => {}
                Err(e) if e.is_inbound_tolerated() => {
                    tracing::warn!(peer = %peer, error = %e, "Dropping undeliverable message");
                }
                Err(e) => {
                    tracing::error!(peer = %peer, error = %e, "Dispatch failed");
                }
            }
        });
    }
    tracing::trace!("Dispatch pump stopped");
}

fn listener_failure(
    joined: std::result::Result<std::result::Result<(), TransportError>, JoinError>,
) -> SocketError {
    match joined {
        Ok(Err(e)) => e.into(),
        Ok(Ok(())) => SocketError::Transport(TransportError::Closed),
        Err(e) => SocketError::Transport(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        ))),
    }
}
