//! Thread-safe registry of live remote objects.
//!
//! Keyed by guid with per-guid notification: a caller holding a guid
//! reference from a command result can wait for the corresponding
//! `__create__` announcement, which may arrive after the result itself.
//! Waiters are registered before the lookup to prevent lost wakeups.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::channel_owner::ChannelOwner;
use crate::error::{Error, Result};

/// Registry mapping guids to live proxy objects.
pub struct ObjectStore {
    objects: DashMap<Arc<str>, Arc<dyn ChannelOwner>>,
    waiters: DashMap<Arc<str>, Arc<Notify>>,
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            waiters: DashMap::new(),
        }
    }

    /// Inserts an object and wakes any waiters for this guid.
    pub fn insert(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>) {
        self.objects.insert(Arc::clone(&guid), object);
        if let Some((_, notify)) = self.waiters.remove(&guid) {
            notify.notify_waiters();
        }
    }

    /// Removes an object. A removed guid may later be reused by the
    /// driver; lookups in between simply miss.
    pub fn remove(&self, guid: &str) {
        self.objects.remove(guid);
    }

    /// Synchronous lookup.
    pub fn try_get(&self, guid: &str) -> Option<Arc<dyn ChannelOwner>> {
        self.objects.get(guid).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of every live object. Used when the connection closes to
    /// dispose everything; disposal is idempotent so overlapping
    /// parent/child entries are harmless.
    pub fn all(&self) -> Vec<Arc<dyn ChannelOwner>> {
        self.objects
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Waits for an object to be registered, with a deadline.
    pub async fn wait_for(&self, guid: &str, timeout: Duration) -> Result<Arc<dyn ChannelOwner>> {
        let key: Arc<str> = Arc::from(guid);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notify = self
                .waiters
                .entry(Arc::clone(&key))
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone();
            let notified = notify.notified();

            if let Some(entry) = self.objects.get(&key) {
                let object = Arc::clone(entry.value());
                drop(entry);
                self.prune_waiter(&key, &notify);
                return Ok(object);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                self.prune_waiter(&key, &notify);
                return Err(Self::timeout_error(&key, timeout));
            }

            tokio::select! {
                biased;
                _ = notified => {}
                _ = tokio::time::sleep(remaining) => {
                    self.prune_waiter(&key, &notify);
                    return Err(Self::timeout_error(&key, timeout));
                }
            }
        }
    }

    /// Drops the notification entry for `key` once this task is the only
    /// waiter left: one reference in the map plus our local clone. Another
    /// concurrent waiter holds a third reference, in which case the entry
    /// stays for it.
    fn prune_waiter(&self, key: &Arc<str>, notify: &Arc<Notify>) {
        self.waiters
            .remove_if(key, |_, entry| Arc::ptr_eq(entry, notify) && Arc::strong_count(entry) <= 2);
    }

    /// Number of guids with registered waiters. Test hook.
    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    fn timeout_error(guid: &str, timeout: Duration) -> Error {
        Error::Timeout {
            message: format!("waiting for object {guid}"),
            duration_ms: timeout.as_millis() as u64,
        }
    }
}
