//! Emitter registry
//!
//! Maps event names to handlers. A handler is either bodiless or takes one
//! parameter decoded from the inbound payload; decoding happens at dispatch
//! time and a mismatch is reported as [`SocketError::PayloadType`].

use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use eventsock_protocol::{decode_optional, CodecType, Payload};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::context::EventContext;
use crate::error::SocketError;

type HandlerResult = Result<BoxFuture<'static, ()>, SocketError>;

type Invoker = dyn Fn(EventContext, Option<Payload>, CodecType) -> HandlerResult + Send + Sync;

/// Identifies one registration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmitterHandle {
    id: Uuid,
    event: String,
}

impl EmitterHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }
}

/// A handler bound to one event name
#[derive(Clone)]
pub struct Emitter {
    id: Uuid,
    event: String,
    parameter: Option<&'static str>,
    invoke: Arc<Invoker>,
}

impl Emitter {
    /// Handler invoked without a payload; any payload that arrives is ignored
    pub fn bodiless<F, Fut>(event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(EventContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            parameter: None,
            invoke: Arc::new(
                move |ctx: EventContext, _payload: Option<Payload>, _codec: CodecType| -> HandlerResult {
                    Ok(handler(ctx).boxed())
                },
            ),
        }
    }

    /// Handler invoked with the payload decoded as `T`
    ///
    /// A missing payload decodes only into types that accept a unit value,
    /// such as `()` or `Option<_>`.
    pub fn typed<T, F, Fut>(event: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(EventContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let invoke = move |ctx: EventContext, payload: Option<Payload>, codec: CodecType| -> HandlerResult {
            let value: T = decode_optional(payload.as_ref(), &codec).map_err(|e| {
                SocketError::PayloadType {
                    event: ctx.event().to_string(),
                    expected: type_name::<T>(),
                    actual: payload
                        .as_ref()
                        .map(|p| p.type_name.clone())
                        .unwrap_or_else(|| "<no payload>".to_string()),
                    reason: e.to_string(),
                }
            })?;
            Ok(handler(ctx, value).boxed())
        };

        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            parameter: Some(type_name::<T>()),
            invoke: Arc::new(invoke),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Declared parameter type, `None` for bodiless handlers
    pub fn parameter_type(&self) -> Option<&'static str> {
        self.parameter
    }

    pub fn handle(&self) -> EmitterHandle {
        EmitterHandle {
            id: self.id,
            event: self.event.clone(),
        }
    }

    /// Coerces the payload and returns the handler's future
    pub fn invoke(
        &self,
        ctx: EventContext,
        payload: Option<Payload>,
        codec: CodecType,
    ) -> HandlerResult {
        (self.invoke)(ctx, payload, codec)
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("id", &self.id)
            .field("event", &self.event)
            .field("parameter", &self.parameter)
            .finish()
    }
}

/// Event name → handler, last registration wins
#[derive(Debug, Default)]
pub struct EmitterRegistry {
    emitters: DashMap<String, Emitter>,
}

impl EmitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, emitter: Emitter) -> EmitterHandle {
        let handle = emitter.handle();
        if let Some(previous) = self.emitters.insert(emitter.event.clone(), emitter) {
            tracing::debug!(event = %handle.event, replaced = %previous.id, "Replaced emitter");
        }
        handle
    }

    /// Clone of the live handler for `event`
    pub fn get(&self, event: &str) -> Option<Emitter> {
        self.emitters.get(event).map(|entry| entry.value().clone())
    }

    /// Removes the registration if it is still the live one for its event
    pub fn remove(&self, handle: &EmitterHandle) -> bool {
        self.emitters
            .remove_if(&handle.event, |_, emitter| emitter.id == handle.id)
            .is_some()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.emitters.contains_key(event)
    }

    pub fn clear(&self) {
        self.emitters.clear();
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }

    /// Registered event names, sorted
    pub fn events(&self) -> Vec<String> {
        let mut events: Vec<String> = self.emitters.iter().map(|e| e.key().clone()).collect();
        events.sort();
        events
    }
}
