//! Base trait for local proxies of driver-side objects.
//!
//! Every remote entity (browser, page, frame, worker) is represented
//! locally by a proxy implementing [`ChannelOwner`]: a stable opaque guid,
//! a weak back-pointer to its parent, an owned [`EventEmitter`], and a
//! child set for cascading disposal. Parents never keep children alive
//! through the back-pointer; ownership lives in the connection's registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::Channel;
use crate::connection::ConnectionLike;
use crate::events::{EventEmitter, FlushReason};

/// Private module for the sealed trait pattern.
pub mod private {
    /// Marker trait that seals `ChannelOwner`.
    pub trait Sealed {}
}

type ChildrenRegistry = HashMap<Arc<str>, Arc<dyn ChannelOwner>>;

/// Why an object is being disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
    /// Explicitly closed, either by user code or by the driver.
    Closed,
    /// Garbage collected on the driver side.
    GarbageCollected,
    /// The connection itself went away.
    ConnectionClosed,
}

/// Parent of a proxy: another proxy, or the root connection.
pub enum ParentOrConnection {
    Parent(Arc<dyn ChannelOwner>),
    Connection(Arc<dyn ConnectionLike>),
}

/// Base trait for all remote object proxies.
///
/// Sealed: implementations live in crates that embed [`ChannelOwnerImpl`].
pub trait ChannelOwner: private::Sealed + DowncastSync {
    /// Stable opaque identifier assigned by the driver.
    fn guid(&self) -> &str;

    /// Protocol type name (e.g. "Browser", "Page").
    fn type_name(&self) -> &str;

    /// Parent proxy, if still alive. Weak: never extends lifetime.
    fn parent(&self) -> Option<Arc<dyn ChannelOwner>>;

    /// The connection this proxy belongs to.
    fn connection(&self) -> Arc<dyn ConnectionLike>;

    /// Raw initializer JSON announced by the driver.
    fn initializer(&self) -> &Value;

    /// RPC channel addressing this object.
    fn channel(&self) -> &Channel;

    /// This object's event emitter.
    fn events(&self) -> &Arc<EventEmitter>;

    /// Routes a protocol event addressed to this object.
    fn on_event(&self, method: &str, params: Value);

    /// Disposes this object and, recursively, all of its children.
    fn dispose(&self, reason: DisposeReason);

    /// Moves `child` from its old parent under this one.
    fn adopt(&self, child: Arc<dyn ChannelOwner>);

    /// Links a child into this object's child set.
    fn add_child(&self, guid: Arc<str>, child: Arc<dyn ChannelOwner>);

    /// Unlinks a child from this object's child set.
    fn remove_child(&self, guid: &str);

    /// True once disposal has started.
    fn is_disposed(&self) -> bool;
}

impl_downcast!(sync ChannelOwner);

impl std::fmt::Debug for dyn ChannelOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOwner")
            .field("guid", &self.guid())
            .field("type_name", &self.type_name())
            .finish()
    }
}

/// Embeddable base implementation of [`ChannelOwner`].
pub struct ChannelOwnerImpl {
    guid: Arc<str>,
    type_name: String,
    parent: Option<Weak<dyn ChannelOwner>>,
    connection: Arc<dyn ConnectionLike>,
    children: Mutex<ChildrenRegistry>,
    channel: Channel,
    events: Arc<EventEmitter>,
    initializer: Value,
    disposed: AtomicBool,
}

impl ChannelOwnerImpl {
    /// Creates the base for a new proxy.
    pub fn new(
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Self {
        let (connection, parent_opt) = match parent {
            ParentOrConnection::Parent(p) => {
                let conn = p.connection();
                (conn, Some(Arc::downgrade(&p)))
            }
            ParentOrConnection::Connection(c) => (c, None),
        };

        let channel = Channel::new(Arc::clone(&guid), Arc::clone(&connection));

        Self {
            guid,
            type_name,
            parent: parent_opt,
            connection,
            children: Mutex::new(HashMap::new()),
            channel,
            events: Arc::new(EventEmitter::new()),
            initializer,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn parent(&self) -> Option<Arc<dyn ChannelOwner>> {
        self.parent.as_ref().and_then(|p| p.upgrade())
    }

    pub fn connection(&self) -> Arc<dyn ConnectionLike> {
        Arc::clone(&self.connection)
    }

    pub fn initializer(&self) -> &Value {
        &self.initializer
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn events(&self) -> &Arc<EventEmitter> {
        &self.events
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Default event routing: fan out through the emitter.
    pub fn on_event(&self, method: &str, params: Value) {
        tracing::trace!(guid = %self.guid, method, "event");
        self.events.emit(method, &params);
    }

    /// Disposes this object and all children recursively.
    ///
    /// Idempotent: the second and later calls are no-ops with no extra
    /// notifications. Pending waiters on this object and on every
    /// descendant are rejected promptly rather than waiting out their
    /// deadlines.
    pub fn dispose(&self, reason: DisposeReason) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(guid = %self.guid, ?reason, "disposing object");

        if let Some(parent) = self.parent() {
            parent.remove_child(&self.guid);
        }
        self.connection.unregister_object(&self.guid);

        let flush_reason = match reason {
            DisposeReason::ConnectionClosed => FlushReason::ConnectionClosed {
                message: Arc::from("connection closed"),
            },
            DisposeReason::Closed | DisposeReason::GarbageCollected => FlushReason::Disposed {
                guid: Arc::clone(&self.guid),
            },
        };
        self.events.flush(flush_reason);

        let children: Vec<_> = {
            let guard = self.children.lock();
            guard.values().cloned().collect()
        };
        for child in children {
            child.dispose(reason);
        }
        self.children.lock().clear();
    }

    /// Moves `child` from its old parent under this one.
    pub fn adopt(&self, child: Arc<dyn ChannelOwner>) {
        if let Some(old_parent) = child.parent() {
            old_parent.remove_child(child.guid());
        }
        self.add_child(Arc::from(child.guid()), child);
    }

    pub fn add_child(&self, guid: Arc<str>, child: Arc<dyn ChannelOwner>) {
        self.children.lock().insert(guid, child);
    }

    pub fn remove_child(&self, guid: &str) {
        self.children.lock().remove(guid);
    }

    /// Snapshot of this object's children.
    pub fn children(&self) -> Vec<Arc<dyn ChannelOwner>> {
        self.children.lock().values().cloned().collect()
    }
}
