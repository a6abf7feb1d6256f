//! Per-object event fan-out and waiter registration.
//!
//! Every remote object owns an [`EventEmitter`]. Incoming driver events are
//! emitted here by the connection's dispatch loop; the emitter fans each
//! event out to persistent listeners in registration order and then
//! evaluates every pending waiter's predicate against it.
//!
//! Listener callbacks and waiter predicates run synchronously on the shared
//! dispatch path, so they must stay fast and side-effect-light. A panicking
//! listener is isolated and reported; it never aborts the fan-out.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::waiter::{Waiter, effective_timeout};

/// Callback invoked for every matching event while registered.
pub type ListenerCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle identifying a persistent listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event-name filter for waiters.
#[derive(Clone)]
pub enum EventFilter {
    /// Match any event on the emitter.
    Any,
    /// Match only events with this name.
    Named(Arc<str>),
}

impl EventFilter {
    /// Filter matching the given event name.
    pub fn named(event: &str) -> Self {
        EventFilter::Named(Arc::from(event))
    }

    fn matches(&self, event: &str) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Named(name) => &**name == event,
        }
    }
}

/// Why an emitter was flushed. Latched so that registrations arriving
/// after the flush fail immediately instead of hanging.
#[derive(Clone, Debug)]
pub enum FlushReason {
    /// The owning object (or an ancestor) was disposed.
    Disposed { guid: Arc<str> },
    /// The whole connection went away.
    ConnectionClosed { message: Arc<str> },
}

impl FlushReason {
    fn to_error(&self) -> Error {
        match self {
            FlushReason::Disposed { guid } => Error::ObjectDisposed {
                guid: guid.to_string(),
            },
            FlushReason::ConnectionClosed { message } => {
                Error::ConnectionClosed(message.to_string())
            }
        }
    }
}

struct ListenerEntry {
    id: u64,
    event: Arc<str>,
    callback: ListenerCallback,
    once: bool,
}

struct WaiterEntry {
    filter: EventFilter,
    predicate: Box<dyn Fn(&Value) -> bool + Send + Sync>,
    complete_tx: oneshot::Sender<Result<Value>>,
}

struct Inner {
    listeners: Vec<ListenerEntry>,
    waiters: Vec<WaiterEntry>,
    next_id: u64,
    flushed: Option<FlushReason>,
}

/// Ordered multi-listener fan-out plus one-shot waiter integration.
pub struct EventEmitter {
    inner: Mutex<Inner>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                listeners: Vec::new(),
                waiters: Vec::new(),
                next_id: 0,
                flushed: None,
            }),
        }
    }

    /// Registers a persistent listener for `event`.
    ///
    /// Listeners fire in registration order. On a flushed emitter this is
    /// a no-op; the returned id refers to nothing.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), false)
    }

    /// Registers a listener removed automatically after its first delivery.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), true)
    }

    fn register(&self, event: &str, callback: ListenerCallback, once: bool) -> ListenerId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if inner.flushed.is_some() {
            tracing::debug!(event, "listener registered on flushed emitter; ignored");
            return ListenerId(id);
        }
        inner.listeners.push(ListenerEntry {
            id,
            event: Arc::from(event),
            callback,
            once,
        });
        ListenerId(id)
    }

    /// Removes a persistent listener. Safe to call from within a callback
    /// invoked during the matching `emit`.
    pub fn off(&self, id: ListenerId) {
        self.inner.lock().listeners.retain(|l| l.id != id.0);
    }

    /// Delivers `payload` to every registered listener for `event` in
    /// registration order, then resolves every waiter whose filter and
    /// predicate accept it.
    ///
    /// Listeners added during this emission are not invoked for it;
    /// listeners removed mid-emission are skipped without disturbing the
    /// rest of the fan-out.
    pub fn emit(&self, event: &str, payload: &Value) {
        let snapshot: Vec<(u64, ListenerCallback, bool)> = {
            let inner = self.inner.lock();
            inner
                .listeners
                .iter()
                .filter(|l| &*l.event == event)
                .map(|l| (l.id, Arc::clone(&l.callback), l.once))
                .collect()
        };

        for (id, callback, once) in snapshot {
            let still_registered = {
                let mut inner = self.inner.lock();
                match inner.listeners.iter().position(|l| l.id == id) {
                    Some(pos) => {
                        if once {
                            inner.listeners.remove(pos);
                        }
                        true
                    }
                    None => false,
                }
            };
            if !still_registered {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::error!(event, listener = id, "listener panicked during delivery");
            }
        }

        let resolved: Vec<oneshot::Sender<Result<Value>>> = {
            let mut inner = self.inner.lock();
            let mut senders = Vec::new();
            let mut i = 0;
            while i < inner.waiters.len() {
                // A waiter whose receiver was dropped can never resolve;
                // discard it instead of holding its predicate forever.
                if inner.waiters[i].complete_tx.is_closed() {
                    inner.waiters.swap_remove(i);
                    continue;
                }
                let matched = inner.waiters[i].filter.matches(event)
                    && (inner.waiters[i].predicate)(payload);
                if matched {
                    senders.push(inner.waiters.swap_remove(i).complete_tx);
                } else {
                    i += 1;
                }
            }
            senders
        };
        for tx in resolved {
            let _ = tx.send(Ok(payload.clone()));
        }
    }

    /// Registers a one-shot waiter resolved by the first event accepted by
    /// `filter` and `predicate`.
    ///
    /// On an already-flushed emitter the receiver resolves immediately
    /// with the flush reason; a waiter never hangs on a dead emitter.
    pub fn register_waiter<F>(
        &self,
        filter: EventFilter,
        predicate: F,
    ) -> oneshot::Receiver<Result<Value>>
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.flushed {
            let _ = tx.send(Err(reason.to_error()));
            return rx;
        }
        inner.waiters.push(WaiterEntry {
            filter,
            predicate: Box::new(predicate),
            complete_tx: tx,
        });
        rx
    }

    /// Registers a waiter and wraps it with a deadline.
    ///
    /// A `None` or zero timeout falls back to the system-wide default.
    pub fn wait_for<F>(&self, filter: EventFilter, predicate: F, timeout: Option<Duration>) -> Waiter
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Waiter::new(self.register_waiter(filter, predicate), effective_timeout(timeout))
    }

    /// Rejects every pending waiter with `reason` and clears all
    /// registrations. Idempotent; the first reason wins.
    pub fn flush(&self, reason: FlushReason) {
        let waiters = {
            let mut inner = self.inner.lock();
            if inner.flushed.is_some() {
                return;
            }
            inner.flushed = Some(reason.clone());
            inner.listeners.clear();
            std::mem::take(&mut inner.waiters)
        };
        for entry in waiters {
            let _ = entry.complete_tx.send(Err(reason.to_error()));
        }
    }

    /// Number of pending waiters. Test hook.
    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> ListenerCallback) {
        let log: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let log_for_make = Arc::clone(&log);
        let make = move |tag: u32| -> ListenerCallback {
            let log = Arc::clone(&log_for_make);
            Arc::new(move |_: &Value| log.lock().push(tag))
        };
        (log, make)
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();

        let cb1 = make(1);
        let cb2 = make(2);
        let cb3 = make(3);
        emitter.on("load", move |v: &Value| cb1(v));
        emitter.on("load", move |v: &Value| cb2(v));
        emitter.on("load", move |v: &Value| cb3(v));

        emitter.emit("load", &json!({}));
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn listener_for_other_event_not_invoked() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let cb = make(1);
        emitter.on("console", move |v: &Value| cb(v));

        emitter.emit("load", &json!({}));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn off_during_emit_skips_removed_listener_only() {
        let emitter = Arc::new(EventEmitter::new());
        let (log, make) = recorder();

        let cb1 = make(1);
        let id_a = emitter.on("load", move |v: &Value| cb1(v));
        let _ = id_a;

        // Listener 2 removes listener 3 while the emission is in flight.
        let removed: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let emitter_ref = Arc::clone(&emitter);
        let removed_ref = Arc::clone(&removed);
        let cb2 = make(2);
        emitter.on("load", move |v: &Value| {
            cb2(v);
            if let Some(target) = *removed_ref.lock() {
                emitter_ref.off(target);
            }
        });

        let cb3 = make(3);
        let id_c = emitter.on("load", move |v: &Value| cb3(v));
        *removed.lock() = Some(id_c);

        emitter.emit("load", &json!({}));
        assert_eq!(*log.lock(), vec![1, 2]);
    }

    #[test]
    fn listener_added_during_emit_not_invoked_for_that_emission() {
        let emitter = Arc::new(EventEmitter::new());
        let (log, make) = recorder();

        let emitter_ref = Arc::clone(&emitter);
        let late = make(9);
        let cb1 = make(1);
        emitter.on("load", move |v: &Value| {
            cb1(v);
            let late = late.clone();
            emitter_ref.on("load", move |v: &Value| late(v));
        });

        emitter.emit("load", &json!({}));
        assert_eq!(*log.lock(), vec![1]);

        emitter.emit("load", &json!({}));
        assert_eq!(*log.lock(), vec![1, 1, 9]);
    }

    #[test]
    fn once_listener_fires_exactly_once() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let cb = make(1);
        emitter.once("load", move |v: &Value| cb(v));

        emitter.emit("load", &json!({}));
        emitter.emit("load", &json!({}));
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn panicking_listener_does_not_halt_fanout() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();

        emitter.on("load", |_: &Value| panic!("listener bug"));
        let cb = make(2);
        emitter.on("load", move |v: &Value| cb(v));

        emitter.emit("load", &json!({}));
        assert_eq!(*log.lock(), vec![2]);
    }

    #[tokio::test]
    async fn waiter_resolves_on_matching_event() {
        let emitter = EventEmitter::new();
        let rx = emitter.register_waiter(EventFilter::named("response"), |payload| {
            payload["status"] == 200
        });

        emitter.emit("response", &json!({"status": 404}));
        assert_eq!(emitter.waiter_count(), 1);

        emitter.emit("response", &json!({"status": 200}));
        assert_eq!(emitter.waiter_count(), 0);

        let payload = rx.await.unwrap().unwrap();
        assert_eq!(payload["status"], 200);
    }

    #[tokio::test]
    async fn abandoned_waiter_is_dropped_on_next_emit() {
        let emitter = EventEmitter::new();
        let rx = emitter.register_waiter(EventFilter::named("popup"), |_| true);
        drop(rx);
        assert_eq!(emitter.waiter_count(), 1);

        // Any traffic reclaims the entry, matching or not.
        emitter.emit("console", &json!({}));
        assert_eq!(emitter.waiter_count(), 0);
    }

    #[tokio::test]
    async fn any_filter_matches_every_event_name() {
        let emitter = EventEmitter::new();
        let rx = emitter.register_waiter(EventFilter::Any, |_| true);

        emitter.emit("whatever", &json!({"n": 1}));
        let payload = rx.await.unwrap().unwrap();
        assert_eq!(payload["n"], 1);
    }

    #[tokio::test]
    async fn flush_rejects_pending_waiters() {
        let emitter = EventEmitter::new();
        let rx = emitter.register_waiter(EventFilter::named("load"), |_| true);

        emitter.flush(FlushReason::Disposed {
            guid: Arc::from("page@1"),
        });

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_object_disposed());
    }

    #[tokio::test]
    async fn waiter_on_flushed_emitter_fails_immediately() {
        let emitter = EventEmitter::new();
        emitter.flush(FlushReason::Disposed {
            guid: Arc::from("page@1"),
        });

        let rx = emitter.register_waiter(EventFilter::Any, |_| true);
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_object_disposed());
    }

    #[test]
    fn flush_is_idempotent_and_first_reason_wins() {
        let emitter = EventEmitter::new();
        emitter.flush(FlushReason::Disposed {
            guid: Arc::from("page@1"),
        });
        emitter.flush(FlushReason::ConnectionClosed {
            message: Arc::from("gone"),
        });

        let rx = emitter.register_waiter(EventFilter::Any, |_| true);
        let err = rx.blocking_recv().unwrap().unwrap_err();
        assert!(err.is_object_disposed());
    }

    #[test]
    fn emit_after_flush_reaches_nobody() {
        let emitter = EventEmitter::new();
        let (log, make) = recorder();
        let cb = make(1);
        emitter.on("load", move |v: &Value| cb(v));

        emitter.flush(FlushReason::Disposed {
            guid: Arc::from("page@1"),
        });
        emitter.emit("load", &json!({}));
        assert!(log.lock().is_empty());
    }
}
