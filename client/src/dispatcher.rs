//! Frame decoding and typed publish/subscribe fan-out
//!
//! Subscribers register per [`MessageKind`] and get back a [`Subscription`]
//! handle that is the only way to unregister. Delivery is synchronous and in
//! registration order. A subscriber that panics is logged and skipped so it
//! cannot starve the subscribers registered after it.

use log::{debug, error, warn};
use shared::{CodecError, Envelope, MessageKind};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

type Callback = Box<dyn FnMut(&Envelope)>;

/// Handle returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: MessageKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

#[derive(Default)]
pub struct Dispatcher {
    next_id: u64,
    subscribers: HashMap<MessageKind, Vec<(u64, Callback)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one inbound frame. Broken frames are logged and dropped,
    /// unknown types are silently ignored.
    pub fn decode(frame: &str) -> Option<Envelope> {
        match Envelope::decode(frame) {
            Ok(envelope) => Some(envelope),
            Err(CodecError::UnknownType(kind)) => {
                debug!("Ignoring unknown envelope type '{}'", kind);
                None
            }
            Err(e) => {
                warn!("Dropping frame: {}", e);
                None
            }
        }
    }

    pub fn subscribe<F>(&mut self, kind: MessageKind, callback: F) -> Subscription
    where
        F: FnMut(&Envelope) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers
            .entry(kind)
            .or_default()
            .push((id, Box::new(callback)));
        Subscription { kind, id }
    }

    /// Returns false if the subscription was already removed.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let Some(list) = self.subscribers.get_mut(&subscription.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        list.len() != before
    }

    /// Delivers to every subscriber of the envelope's kind. Returns how many
    /// completed without panicking.
    pub fn publish(&mut self, envelope: &Envelope) -> usize {
        let kind = envelope.kind();
        let Some(list) = self.subscribers.get_mut(&kind) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, callback) in list.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| callback(envelope))) {
                Ok(()) => delivered += 1,
                Err(_) => error!("Subscriber {} for '{}' panicked; skipped", id, kind),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, kind: MessageKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }
}
