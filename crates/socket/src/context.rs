use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use crate::error::Result;
use crate::EventSocket;

/// Per-invocation reply context handed to every handler
///
/// Holds who sent the envelope being dispatched, so a handler can answer with
/// [`emit`](Self::emit) without naming a destination.
#[derive(Clone)]
pub struct EventContext {
    socket: EventSocket,
    event: String,
    sender: IpAddr,
    callback_port: u16,
}

impl EventContext {
    pub fn new(
        socket: EventSocket,
        event: impl Into<String>,
        sender: IpAddr,
        callback_port: u16,
    ) -> Self {
        Self {
            socket,
            event: event.into(),
            sender,
            callback_port,
        }
    }

    /// Name of the event being handled
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn sender(&self) -> IpAddr {
        self.sender
    }

    pub fn callback_port(&self) -> u16 {
        self.callback_port
    }

    /// `sender:callback_port`, or `None` if the sender is not listening
    pub fn reply_addr(&self) -> Option<SocketAddr> {
        (self.callback_port != 0).then(|| SocketAddr::new(self.sender, self.callback_port))
    }

    /// Socket that received the envelope
    pub fn socket(&self) -> &EventSocket {
        &self.socket
    }

    /// Replies with a bodiless event
    ///
    /// Goes to [`reply_addr`](Self::reply_addr) when there is one, otherwise to
    /// the socket's default route.
    pub async fn emit(&self, event: &str) -> Result<()> {
        let envelope = self.socket.envelope(event, None::<&()>)?;
        self.socket.send_reply(envelope, self.reply_addr()).await
    }

    /// Replies with a payload, routed like [`emit`](Self::emit)
    pub async fn emit_with<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<()> {
        let envelope = self.socket.envelope(event, Some(payload))?;
        self.socket.send_reply(envelope, self.reply_addr()).await
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .field("sender", &self.sender)
            .field("callback_port", &self.callback_port)
            .finish()
    }
}
