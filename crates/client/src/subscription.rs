//! RAII handle for a registered event listener.

use std::sync::{Arc, Weak};

use drover_runtime::{EventEmitter, ListenerId};

/// Keeps a listener registered for as long as the handle lives.
///
/// Dropping the subscription removes the listener. The emitter is held
/// weakly so a forgotten subscription never keeps a disposed object
/// alive.
#[must_use = "dropping a Subscription immediately removes the listener"]
pub struct Subscription {
    emitter: Weak<EventEmitter>,
    id: Option<ListenerId>,
}

impl Subscription {
    pub(crate) fn new(emitter: &Arc<EventEmitter>, id: ListenerId) -> Self {
        Self {
            emitter: Arc::downgrade(emitter),
            id: Some(id),
        }
    }

    /// Removes the listener now instead of at drop time.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let (Some(id), Some(emitter)) = (self.id.take(), self.emitter.upgrade()) {
            emitter.off(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
