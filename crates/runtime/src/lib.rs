//! Drover runtime - driver lifecycle, connection, and object registry
//!
//! This crate provides the low-level machinery for talking to the
//! browser-automation driver process:
//!
//! - **Driver management**: locating and launching the Node.js driver
//! - **Transport**: length-prefixed JSON framing over stdio pipes
//! - **Connection**: command/result correlation and event dispatch
//! - **Object registry**: tracking remote objects by guid
//! - **Events**: per-object emitters with cancellable waiters
//!
//! # Decoupling via ObjectFactory
//!
//! The [`Connection`] creates protocol objects through the
//! [`ObjectFactory`] trait rather than depending on concrete proxy
//! types; the client crate supplies the factory. This keeps the runtime
//! independent of the API surface built on top of it.

pub mod channel;
pub mod channel_owner;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod transport;
pub mod waiter;

// Re-export key types at crate root
pub use channel::Channel;
pub use channel_owner::{ChannelOwner, ChannelOwnerImpl, DisposeReason, ParentOrConnection};
pub use connection::{
    Connection, ConnectionLike, Event, Message, Metadata, ObjectFactory, ObjectStore, Request,
    Response,
};
pub use driver::{DriverProcess, get_driver_executable};
pub use error::{Error, Result};
pub use events::{EventEmitter, EventFilter, FlushReason, ListenerId};
pub use transport::{
    PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts,
    TransportReceiver,
};
pub use waiter::{DEFAULT_TIMEOUT, Waiter, effective_timeout};
