//! One-shot handler slot shared by event and signal subscriptions.

/// Holds at most one pending handler. Each stored handler leaves the slot
/// exactly once: displaced by [`OneShotSlot::replace`], or taken for
/// delivery. The owner delivers `Canceled` to displaced handlers.
#[derive(Debug)]
pub struct OneShotSlot<H> {
    pending: Option<Pending<H>>,
    next_id: u64,
}

#[derive(Debug)]
struct Pending<H> {
    id: u64,
    handler: H,
}

impl<H> Default for OneShotSlot<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> OneShotSlot<H> {
    pub fn new() -> Self {
        Self {
            pending: None,
            next_id: 1,
        }
    }

    /// Store `handler` and return the one it displaced, if any, together with
    /// the id of the new registration.
    pub fn replace(&mut self, handler: H) -> (u64, Option<H>) {
        let id = self.next_id;
        self.next_id += 1;
        let old = self.pending.replace(Pending { id, handler });
        (id, old.map(|p| p.handler))
    }

    pub fn take(&mut self) -> Option<H> {
        self.pending.take().map(|p| p.handler)
    }

    /// Take the handler only if `pred` accepts it.
    pub fn take_if(&mut self, pred: impl FnOnce(&H) -> bool) -> Option<H> {
        match &self.pending {
            Some(p) if pred(&p.handler) => self.take(),
            _ => None,
        }
    }

    /// Take the handler only if it is still registration `id`.
    pub fn take_id(&mut self, id: u64) -> Option<H> {
        match &self.pending {
            Some(p) if p.id == id => self.take(),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn peek(&self) -> Option<&H> {
        self.pending.as_ref().map(|p| &p.handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_returns_displaced() {
        let mut slot = OneShotSlot::new();
        let (id1, old) = slot.replace("first");
        assert!(old.is_none());
        let (id2, old) = slot.replace("second");
        assert_eq!(old, Some("first"));
        assert_ne!(id1, id2);
        assert_eq!(slot.take(), Some("second"));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn take_if_and_take_id() {
        let mut slot = OneShotSlot::new();
        let (id, _) = slot.replace(3u32);
        assert_eq!(slot.take_if(|h| *h > 5), None);
        assert!(slot.is_pending());
        assert_eq!(slot.take_id(id + 1), None);
        assert_eq!(slot.peek(), Some(&3));
        assert_eq!(slot.take_id(id), Some(3));
        assert!(!slot.is_pending());
    }
}
