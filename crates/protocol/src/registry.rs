//! Event registry: maps event tags to handler callbacks

use crate::transport::{Inbound, RawInbound, ResponseChannel, Transport};
use chart_frame_shared::{AckPayload, Event, EventTag, ProtocolResult};
use futures::future::LocalBoxFuture;
use futures::{Future, Stream, StreamExt};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

pub type HandlerFuture = LocalBoxFuture<'static, ProtocolResult<AckPayload>>;
type Handler = Rc<dyn Fn(Event) -> HandlerFuture>;

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct RegistryInner {
    handlers: HashMap<EventTag, Vec<(HandlerId, Handler)>>,
    next_id: u64,
}

/// Tag → handlers mapping, invoked in registration order
#[derive(Clone, Default)]
pub struct EventRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent handler for `tag`
    pub fn on<F, Fut>(&self, tag: EventTag, handler: F) -> HandlerId
    where
        F: Fn(Event) -> Fut + 'static,
        Fut: Future<Output = ProtocolResult<AckPayload>> + 'static,
    {
        let handler: Handler = Rc::new(move |event| Box::pin(handler(event)) as HandlerFuture);

        let mut inner = self.inner.borrow_mut();
        let id = HandlerId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.entry(tag).or_default().push((id, handler));
        id
    }

    /// Register a handler and return the capability to unregister it
    pub fn subscribe<F, Fut>(&self, tag: EventTag, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + 'static,
        Fut: Future<Output = ProtocolResult<AckPayload>> + 'static,
    {
        let id = self.on(tag, handler);
        Subscription {
            registry: Rc::downgrade(&self.inner),
            tag,
            id,
        }
    }

    /// Remove a handler; returns whether it was registered
    pub fn off(&self, tag: EventTag, id: HandlerId) -> bool {
        Self::remove(&self.inner, tag, id)
    }

    pub fn handler_count(&self, tag: EventTag) -> usize {
        self.inner
            .borrow()
            .handlers
            .get(&tag)
            .map_or(0, |handlers| handlers.len())
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().handlers.clear();
    }

    /// Request/ack delivery: run the first handler and write its result to `channel`
    ///
    /// Handler errors become error acks. With no handler registered an empty
    /// ack is written so the sender is not left waiting.
    pub async fn dispatch_once(&self, event: Event, mut channel: ResponseChannel) -> ProtocolResult<()> {
        let tag = event.tag();
        let ack = match self.handlers_for(tag).into_iter().next() {
            Some(handler) => handler(event).await.unwrap_or_else(|e| {
                log::warn!("Handler for {tag} failed: {e}");
                AckPayload::error(e.to_string())
            }),
            None => {
                log::debug!("No handler for {tag}, sending empty acknowledgment");
                AckPayload::empty()
            }
        };

        channel.reply(&ack)
    }

    /// Persistent delivery: run every handler for the tag in registration order
    pub async fn dispatch(&self, event: Event) {
        let tag = event.tag();
        for handler in self.handlers_for(tag) {
            if let Err(e) = handler(event.clone()).await {
                log::warn!("Handler for {tag} failed: {e}");
            }
        }
    }

    /// Route a validated message to `dispatch_once` or `dispatch`
    pub async fn deliver(&self, inbound: Inbound) {
        match inbound.reply {
            Some(channel) => {
                let tag = inbound.event.tag();
                if let Err(e) = self.dispatch_once(inbound.event, channel).await {
                    log::warn!("Failed to acknowledge {tag}: {e}");
                }
            }
            None => self.dispatch(inbound.event).await,
        }
    }

    /// Accept and deliver inbound messages until the stream ends
    ///
    /// Messages are handled concurrently, so a slow handler does not hold back
    /// acknowledgments for later requests.
    pub async fn serve<S>(&self, transport: &Transport, inbound: S)
    where
        S: Stream<Item = RawInbound>,
    {
        inbound
            .for_each_concurrent(None, |raw| async move {
                if let Some(message) = transport.accept(raw) {
                    self.deliver(message).await;
                }
            })
            .await;
    }

    // Snapshot so handlers may (un)register while running
    fn handlers_for(&self, tag: EventTag) -> Vec<Handler> {
        self.inner
            .borrow()
            .handlers
            .get(&tag)
            .map(|handlers| handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    fn remove(inner: &RefCell<RegistryInner>, tag: EventTag, id: HandlerId) -> bool {
        let mut inner = inner.borrow_mut();
        let Some(handlers) = inner.handlers.get_mut(&tag) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            inner.handlers.remove(&tag);
        }
        removed
    }
}

/// Capability to unregister one handler
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<RefCell<RegistryInner>>,
    tag: EventTag,
    id: HandlerId,
}

impl Subscription {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Unregister the handler; a no-op once the registry is gone
    pub fn cancel(self) -> bool {
        match self.registry.upgrade() {
            Some(inner) => EventRegistry::remove(&inner, self.tag, self.id),
            None => false,
        }
    }
}
