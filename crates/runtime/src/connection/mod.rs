//! Command correlation and event dispatch for the driver protocol.
//!
//! The connection is the single authority correlating outgoing commands
//! with their eventual results and routing unsolicited driver events to
//! the addressed object's emitter.
//!
//! # Message flow
//!
//! 1. A caller invokes [`Connection::send_message`] with guid, method, and params
//! 2. The connection allocates a unique id and creates a oneshot slot
//! 3. The encoded command is queued to the writer task
//! 4. The caller suspends on the oneshot receiver
//! 5. The dispatch loop receives messages from the transport in arrival order
//! 6. A result is correlated by id and resolved exactly once; an event is
//!    forwarded to the addressed object's emitter
//!
//! The dispatch loop never blocks on application code; listener callbacks
//! and waiter predicates are invoked fire-and-forget with error isolation.

mod object_store;


pub use object_store::ObjectStore;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::channel_owner::{ChannelOwner, DisposeReason, ParentOrConnection};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Interface remote object proxies need from a connection.
///
/// Keeps proxies decoupled from the concrete [`Connection`] so they can be
/// driven by test doubles.
pub trait ConnectionLike: Send + Sync {
    /// Sends a command to the driver and awaits its result.
    fn send_message(
        &self,
        guid: &str,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>>;

    /// Registers an object in the connection's registry.
    fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>);

    /// Unregisters an object. Synchronous so it can be called from
    /// `dispose` without a runtime.
    fn unregister_object(&self, guid: &str);

    /// Synchronous registry lookup.
    fn get_object(&self, guid: &str) -> Result<Arc<dyn ChannelOwner>>;

    /// Waits for an object to be announced, with a deadline. A result may
    /// reference a guid whose `__create__` has not arrived yet.
    fn wait_for_object(
        &self,
        guid: &str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + '_>>;
}

/// Factory building typed proxies from `__create__` announcements.
///
/// Implemented by the client layer and handed to the connection before the
/// dispatch loop starts; keeps this crate independent of concrete proxy
/// types.
pub trait ObjectFactory: Send + Sync {
    /// Creates a proxy for a newly announced object.
    ///
    /// Unknown type names must produce an inert passthrough object rather
    /// than an error, for forward compatibility.
    fn create_object(
        &self,
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + '_>>;
}

/// Metadata attached to every outgoing command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Unix timestamp in milliseconds
    #[serde(rename = "wallTime")]
    pub wall_time: i64,
    /// Whether this is an internal call rather than user-facing API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    /// Caller location for driver-side tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    /// Optional title for the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Metadata {
    /// Minimal metadata with the current timestamp.
    pub fn now() -> Self {
        Self {
            wall_time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
            internal: Some(false),
            location: None,
            title: None,
        }
    }
}

/// Outgoing command message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique command id for correlating the result
    pub id: u32,
    /// Guid of the target object
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    /// Method name to invoke
    pub method: String,
    /// Method parameters
    pub params: Value,
    /// Timing metadata
    pub metadata: Metadata,
}

/// Serde helpers for `Arc<str>` fields.
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    Ok(Arc::from(s.as_str()))
}

/// Command result from the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Command id this result correlates to
    pub id: u32,
    /// Success payload (mutually exclusive with `error`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Structured failure (mutually exclusive with `result`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorWrapper>,
}

/// Wrapper around the driver's error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
    pub error: ErrorPayload,
}

/// Structured error reported by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Unsolicited event from the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Guid of the addressed object
    #[serde(
        serialize_with = "serialize_arc_str",
        deserialize_with = "deserialize_arc_str"
    )]
    pub guid: Arc<str>,
    /// Event name
    pub method: String,
    /// Event payload
    pub params: Value,
}

/// Discriminated union of inbound protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Command result (has an `id` field)
    Response(Response),
    /// Event (no `id` field)
    Event(Event),
    /// Forward-compatible catch-all; logged and dropped
    Unknown(Value),
}

type PendingCommands = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<Value>>>>>;

/// RAII guard removing the pending entry if the caller is cancelled
/// before the result arrives.
struct CancelGuard {
    id: u32,
    pending: PendingCommands,
    completed: bool,
}

impl CancelGuard {
    fn new(id: u32, pending: PendingCommands) -> Self {
        Self {
            id,
            pending,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if self.pending.lock().remove(&self.id).is_some() {
            tracing::debug!(id = self.id, "removed pending command for cancelled caller");
        }
    }
}

/// Future returned by [`Connection::send_message`].
struct ResponseFuture {
    rx: oneshot::Receiver<Result<Value>>,
    guard: CancelGuard,
}

impl Future for ResponseFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                self.guard.complete();
                Poll::Ready(
                    result
                        .map_err(|_| {
                            Error::ConnectionClosed(
                                "connection closed before the command resolved".to_string(),
                            )
                        })
                        .and_then(|r| r),
                )
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Transport halves consumed exactly once by [`Connection::run`].
struct ConnectionIo {
    sender: Box<dyn Transport>,
    receiver: Box<dyn TransportReceiver>,
    message_rx: mpsc::UnboundedReceiver<Value>,
    outbound_rx: mpsc::UnboundedReceiver<Value>,
}

/// Protocol connection to the automation driver.
///
/// Owns the command id counter, the pending-command table, and the single
/// dispatch loop. The id counter and pending table are the only shared
/// mutable state on the write path; everything else is owned by the
/// dispatch path.
pub struct Connection {
    last_id: AtomicU32,
    pending: PendingCommands,
    outbound_tx: mpsc::UnboundedSender<Value>,
    io: Mutex<Option<ConnectionIo>>,
    objects: ObjectStore,
    factory: Mutex<Option<Arc<dyn ObjectFactory>>>,
    /// Close reason; `Some` is permanent.
    closed: Mutex<Option<String>>,
    /// Wakes the dispatch loop when `close` is called locally, so
    /// shutdown does not wait for the transport to EOF.
    shutdown: Notify,
}

impl Connection {
    /// Creates a connection over the given transport halves.
    pub fn new(parts: TransportParts) -> Self {
        let TransportParts {
            sender,
            receiver,
            message_rx,
        } = parts;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            last_id: AtomicU32::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound_tx,
            io: Mutex::new(Some(ConnectionIo {
                sender,
                receiver,
                message_rx,
                outbound_rx,
            })),
            objects: ObjectStore::new(),
            factory: Mutex::new(None),
            closed: Mutex::new(None),
            shutdown: Notify::new(),
        }
    }

    /// Sets the proxy factory. Must happen before [`run`](Self::run) for
    /// `__create__` announcements to produce objects.
    pub fn set_factory(&self, factory: Arc<dyn ObjectFactory>) {
        *self.factory.lock() = Some(factory);
    }

    /// The connection's object registry.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// True once the transport has ended. Permanent.
    pub fn is_closed(&self) -> bool {
        self.closed.lock().is_some()
    }

    /// Sends a command and suspends until its result arrives.
    ///
    /// On a closed connection this fails immediately with
    /// [`Error::ConnectionClosed`] without touching the transport.
    pub async fn send_message(&self, guid: &str, method: &str, params: Value) -> Result<Value> {
        if let Some(reason) = self.closed.lock().clone() {
            return Err(Error::ConnectionClosed(reason));
        }

        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(id, guid, method, "sending command");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let guard = CancelGuard::new(id, Arc::clone(&self.pending));

        // close() may have drained the table between the closed check and
        // the insert; re-check so the slot cannot be stranded. The guard
        // removes it on the error path.
        if let Some(reason) = self.closed.lock().clone() {
            return Err(Error::ConnectionClosed(reason));
        }

        let request = Request {
            id,
            guid: Arc::from(guid),
            method: method.to_string(),
            params,
            metadata: Metadata::now(),
        };
        let encoded = serde_json::to_value(&request)?;

        if self.outbound_tx.send(encoded).is_err() {
            return Err(Error::ConnectionClosed(
                "writer task is gone; connection closed".to_string(),
            ));
        }

        ResponseFuture { rx, guard }.await
    }

    /// Runs the dispatch loop until the transport ends, then closes the
    /// connection.
    ///
    /// Spawns the transport reader and writer tasks, then processes
    /// inbound messages strictly in arrival order on this one logical
    /// path. Events a command's completion implicitly causes are therefore
    /// observed by waiters in the order the driver emitted them.
    pub async fn run(self: &Arc<Self>) {
        let Some(io) = self.io.lock().take() else {
            tracing::error!("Connection::run called more than once; ignoring");
            return;
        };
        let ConnectionIo {
            mut sender,
            mut receiver,
            mut message_rx,
            mut outbound_rx,
        } = io;

        let reader_handle = tokio::spawn(async move {
            if let Err(e) = receiver.run().await {
                tracing::error!(error = %e, "transport read error");
            }
        });

        let writer_handle = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sender.send(message).await {
                    tracing::error!(error = %e, "transport write error");
                    break;
                }
            }
        });

        loop {
            let value = tokio::select! {
                maybe = message_rx.recv() => match maybe {
                    Some(value) => value,
                    None => break,
                },
                // close() signals here so the loop ends even while the
                // transport is still open.
                _ = self.shutdown.notified() => break,
            };
            match serde_json::from_value::<Message>(value) {
                Ok(message) => {
                    if let Err(e) = self.dispatch(message).await {
                        tracing::error!(error = %e, "error dispatching message");
                    }
                }
                Err(e) => {
                    // Malformed messages are non-fatal to the connection.
                    tracing::warn!(error = %e, "dropping unparseable message");
                }
            }
        }

        self.close("transport closed");
        // The writer blocks on an outbound channel whose sender this
        // connection holds; abort both tasks rather than waiting.
        reader_handle.abort();
        writer_handle.abort();
        let _ = reader_handle.await;
        let _ = writer_handle.await;
    }

    /// Closes the connection: fails every outstanding command with
    /// [`Error::ConnectionClosed`] and disposes every live object,
    /// rejecting all of their pending waiters. Idempotent; after the
    /// first call every future `send_message` fails fast.
    pub fn close(&self, reason: &str) {
        {
            let mut closed = self.closed.lock();
            if closed.is_some() {
                return;
            }
            *closed = Some(reason.to_string());
        }
        tracing::debug!(reason, "closing connection");

        let outstanding: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        for (_, tx) in outstanding {
            let _ = tx.send(Err(Error::ConnectionClosed(reason.to_string())));
        }

        for object in self.objects.all() {
            object.dispose(DisposeReason::ConnectionClosed);
        }

        // notify_one stores a permit, so the dispatch loop stops even if
        // it has not reached its select yet.
        self.shutdown.notify_one();
    }

    /// Dispatches one inbound message. Test-only public wrapper.
    #[cfg(test)]
    pub async fn dispatch_message(self: &Arc<Self>, message: Message) -> Result<()> {
        self.dispatch(message).await
    }

    async fn dispatch(self: &Arc<Self>, message: Message) -> Result<()> {
        match message {
            Message::Response(response) => {
                let Some(slot) = self.pending.lock().remove(&response.id) else {
                    // Driver protocol violation: a result must match a command.
                    return Err(Error::Malformed(format!(
                        "result for unknown command id {}",
                        response.id
                    )));
                };
                let outcome = match response.error {
                    Some(wrapper) => Err(driver_error(wrapper.error)),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                // A cancelled caller may have dropped the receiver; fine.
                let _ = slot.send(outcome);
                Ok(())
            }
            Message::Event(event) => match event.method.as_str() {
                "__create__" => self.handle_create(&event).await,
                "__dispose__" => self.handle_dispose(&event),
                "__adopt__" => self.handle_adopt(&event),
                _ => {
                    match self.objects.try_get(&event.guid) {
                        Some(object) => object.on_event(&event.method, event.params),
                        None => {
                            // Benign race: client-side disposal can beat a
                            // final in-flight event. Deliberate leniency.
                            tracing::debug!(
                                guid = %event.guid,
                                method = %event.method,
                                "event for unknown object dropped"
                            );
                        }
                    }
                    Ok(())
                }
            },
            Message::Unknown(value) => {
                tracing::debug!(?value, "unknown message shape ignored");
                Ok(())
            }
        }
    }

    async fn handle_create(self: &Arc<Self>, event: &Event) -> Result<()> {
        let type_name = event.params["type"]
            .as_str()
            .ok_or_else(|| Error::Malformed("__create__ missing 'type'".to_string()))?
            .to_string();
        let guid: Arc<str> = Arc::from(
            event.params["guid"]
                .as_str()
                .ok_or_else(|| Error::Malformed("__create__ missing 'guid'".to_string()))?,
        );
        let initializer = event.params["initializer"].clone();

        tracing::debug!(%type_name, %guid, parent = %event.guid, "__create__");

        // The empty guid addresses the connection root.
        let (parent, parent_obj) = if event.guid.is_empty() {
            (
                ParentOrConnection::Connection(Arc::clone(self) as Arc<dyn ConnectionLike>),
                None,
            )
        } else {
            let parent_obj = self.objects.try_get(&event.guid).ok_or_else(|| {
                Error::Malformed(format!("__create__ parent not found: {}", event.guid))
            })?;
            (
                ParentOrConnection::Parent(Arc::clone(&parent_obj)),
                Some(parent_obj),
            )
        };

        let factory = self
            .factory
            .lock()
            .clone()
            .ok_or_else(|| Error::Malformed("object factory not set".to_string()))?;

        let object = factory
            .create_object(parent, type_name, Arc::clone(&guid), initializer)
            .await?;

        self.objects.insert(Arc::clone(&guid), Arc::clone(&object));
        if let Some(parent_obj) = parent_obj {
            parent_obj.add_child(guid, object);
        }
        Ok(())
    }

    fn handle_dispose(&self, event: &Event) -> Result<()> {
        let reason = match event.params.get("reason").and_then(|r| r.as_str()) {
            Some("gc") => DisposeReason::GarbageCollected,
            _ => DisposeReason::Closed,
        };

        match self.objects.try_get(&event.guid) {
            Some(object) => object.dispose(reason),
            None => {
                tracing::debug!(guid = %event.guid, "__dispose__ for unknown object ignored");
            }
        }
        Ok(())
    }

    fn handle_adopt(&self, event: &Event) -> Result<()> {
        let child_guid = event.params["guid"]
            .as_str()
            .ok_or_else(|| Error::Malformed("__adopt__ missing 'guid'".to_string()))?;

        let new_parent = self.objects.try_get(&event.guid).ok_or_else(|| {
            Error::Malformed(format!("__adopt__ parent not found: {}", event.guid))
        })?;
        let child = self
            .objects
            .try_get(child_guid)
            .ok_or_else(|| Error::Malformed(format!("__adopt__ child not found: {child_guid}")))?;

        new_parent.adopt(child);
        Ok(())
    }
}

/// Converts a driver error payload into [`Error::Protocol`].
fn driver_error(payload: ErrorPayload) -> Error {
    Error::Protocol {
        name: payload.name.unwrap_or_else(|| "Error".to_string()),
        message: payload.message,
        stack: payload.stack,
    }
}

impl ConnectionLike for Connection {
    fn send_message(
        &self,
        guid: &str,
        method: &str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        let guid = guid.to_string();
        let method = method.to_string();
        Box::pin(async move { Connection::send_message(self, &guid, &method, params).await })
    }

    fn register_object(&self, guid: Arc<str>, object: Arc<dyn ChannelOwner>) {
        self.objects.insert(guid, object);
    }

    fn unregister_object(&self, guid: &str) {
        self.objects.remove(guid);
    }

    fn get_object(&self, guid: &str) -> Result<Arc<dyn ChannelOwner>> {
        self.objects
            .try_get(guid)
            .ok_or_else(|| Error::ObjectDisposed {
                guid: guid.to_string(),
            })
    }

    fn wait_for_object(
        &self,
        guid: &str,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + '_>> {
        let guid: Arc<str> = Arc::from(guid);
        Box::pin(async move { self.objects.wait_for(&guid, timeout).await })
    }
}
