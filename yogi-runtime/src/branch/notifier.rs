//! Delivers branch events to the single pending subscriber.

use std::sync::Mutex;

use tracing::debug;
use uuid::Uuid;

use crate::context::Poster;
use crate::lock;
use yogi_core::{BranchEvent, BranchEvents, EventOutcome, OneShotSlot, Result};

pub type EventHandler = Box<dyn FnOnce(EventOutcome) + Send>;

struct Subscription {
    mask: BranchEvents,
    buffer_size: usize,
    handler: EventHandler,
}

pub(crate) struct EventNotifier {
    local: Uuid,
    poster: Poster,
    slot: Mutex<OneShotSlot<Subscription>>,
}

impl EventNotifier {
    pub(crate) fn new(local: Uuid, poster: Poster) -> Self {
        Self {
            local,
            poster,
            slot: Mutex::new(OneShotSlot::new()),
        }
    }

    pub(crate) fn subscribe(&self, mask: BranchEvents, buffer_size: usize, handler: EventHandler) {
        let (_, old) = lock(&self.slot).replace(Subscription {
            mask,
            buffer_size,
            handler,
        });
        if let Some(old) = old {
            self.cancel_subscription(old);
        }
    }

    pub(crate) fn cancel(&self) -> bool {
        let sub = lock(&self.slot).take();
        match sub {
            Some(sub) => {
                self.cancel_subscription(sub);
                true
            }
            None => false,
        }
    }

    fn cancel_subscription(&self, sub: Subscription) {
        let handler = sub.handler;
        self.poster.post(move || handler(EventOutcome::Canceled));
    }

    /// Hand `event` to the subscriber if its mask matches. Events nobody is
    /// waiting for are dropped.
    pub(crate) fn publish(&self, event: BranchEvent, result: Result<()>) {
        let kind = event.kind();
        let sub = lock(&self.slot).take_if(|s| s.mask.contains(kind));
        match sub {
            Some(sub) => {
                debug!("[{}] delivering {:?} for {}", self.local, kind, event.uuid());
                let outcome = EventOutcome::deliver(event, result, sub.buffer_size);
                let handler = sub.handler;
                self.poster.post(move || handler(outcome));
            }
            None => debug!("[{}] no subscriber for {:?}", self.local, kind),
        }
    }
}
