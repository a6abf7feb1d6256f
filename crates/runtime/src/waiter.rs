//! One-shot blocking primitive over the event emitter.
//!
//! Every "block until X happens" operation (navigation waits, popup
//! capture, request/response capture, explicit event waits) suspends on a
//! [`Waiter`]. Exactly one of three terminal outcomes occurs:
//!
//! 1. **Matched** - an event satisfied the predicate; resolves with its payload.
//! 2. **Disposed** - the owning object or the connection went away first.
//! 3. **TimedOut** - the deadline elapsed with no match and no disposal.
//!
//! The deadline is a pure timer, independent of the dispatch path, but
//! resolution always funnels through the waiter's single oneshot slot so a
//! simultaneous match cannot race the timeout into a double resolution.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Default deadline applied to every blocking operation whose caller does
/// not configure one. Matches the driver's own default so unconfigured
/// timeouts behave consistently everywhere.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maps an optional caller-supplied timeout to the effective deadline.
/// Zero and unset both fall back to [`DEFAULT_TIMEOUT`].
pub fn effective_timeout(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(t) if !t.is_zero() => t,
        _ => DEFAULT_TIMEOUT,
    }
}

/// Single-resolution blocking handle for the next matching event.
///
/// Created by [`EventEmitter::wait_for`]. Await [`wait`](Self::wait) for
/// deadline semantics, or `.await` the waiter directly to wait without one.
///
/// [`EventEmitter::wait_for`]: crate::events::EventEmitter::wait_for
pub struct Waiter {
    rx: oneshot::Receiver<Result<Value>>,
    timeout: Duration,
}

impl Waiter {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Value>>, timeout: Duration) -> Self {
        Self { rx, timeout }
    }

    /// The deadline this waiter was configured with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Suspends until the waiter resolves or the deadline elapses.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] carrying the configured duration if nothing
    ///   matched in time
    /// - [`Error::ObjectDisposed`] if the owning object was disposed first
    /// - [`Error::ConnectionClosed`] if the transport died first
    pub async fn wait(self) -> Result<Value> {
        let duration = self.timeout;
        match tokio::time::timeout(duration, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::ConnectionClosed(
                "event source dropped before resolution".to_string(),
            )),
            Err(_) => Err(Error::Timeout {
                message: "waiting for event".to_string(),
                duration_ms: duration.as_millis() as u64,
            }),
        }
    }
}

impl Future for Waiter {
    type Output = Result<Value>;

    /// Polls without a deadline. Use [`wait`](Self::wait) for timeout support.
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ConnectionClosed(
                "event source dropped before resolution".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
