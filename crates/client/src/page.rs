//! Page proxy.
//!
//! A page delegates navigation and interaction to its main frame and is
//! the primary event surface: popups, console messages, requests and
//! responses all arrive here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use drover_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use drover_runtime::{DEFAULT_TIMEOUT, Error, EventFilter, Result};

use crate::frame::{Frame, downcast_frame};
use crate::macros::remote_object;
use crate::subscription::Subscription;

/// A single tab or popup window.
pub struct Page {
    base: ChannelOwnerImpl,
}

remote_object!(Page);

impl Page {
    pub(crate) fn new(
        parent: Arc<dyn ChannelOwner>,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Self {
        Self {
            base: ChannelOwnerImpl::new(
                ParentOrConnection::Parent(parent),
                type_name,
                guid,
                initializer,
            ),
        }
    }

    /// The page's main frame.
    ///
    /// The frame's `__create__` announcement may trail the result that
    /// referenced it, so this waits on the registry rather than doing a
    /// plain lookup.
    pub async fn main_frame(&self) -> Result<Arc<Frame>> {
        let guid = self.base.initializer()["mainFrame"]["guid"]
            .as_str()
            .ok_or_else(|| Error::Malformed("page initializer missing mainFrame".to_string()))?
            .to_string();
        let object = self
            .base
            .connection()
            .wait_for_object(&guid, DEFAULT_TIMEOUT)
            .await?;
        downcast_frame(object)
    }

    /// Navigates the main frame.
    pub async fn goto(&self, url: &str) -> Result<Value> {
        self.main_frame().await?.goto(url).await
    }

    /// Clicks the first element matching `selector` in the main frame.
    pub async fn click(&self, selector: &str) -> Result<()> {
        self.main_frame().await?.click(selector).await
    }

    /// Evaluates a JavaScript expression in the main frame.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.main_frame().await?.evaluate(expression).await
    }

    /// Waits for the next occurrence of `event` on this page.
    pub async fn wait_for_event(&self, event: &str, timeout: Option<Duration>) -> Result<Value> {
        self.base
            .events()
            .wait_for(EventFilter::named(event), |_| true, timeout)
            .wait()
            .await
    }

    /// Runs `action` and resolves with the page opened as a popup while
    /// it ran. The waiter is registered before the action starts so a
    /// popup arriving mid-action is never missed.
    pub async fn expect_popup<F, Fut>(&self, timeout: Option<Duration>, action: F) -> Result<Arc<Page>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let waiter = self
            .base
            .events()
            .wait_for(EventFilter::named("popup"), |_| true, timeout);
        action().await?;
        let payload = waiter.wait().await?;

        let guid = payload["page"]["guid"]
            .as_str()
            .ok_or_else(|| Error::Malformed("popup event missing page guid".to_string()))?
            .to_string();
        let object = self
            .base
            .connection()
            .wait_for_object(&guid, DEFAULT_TIMEOUT)
            .await?;
        object
            .downcast_arc::<Page>()
            .map_err(|_| Error::Malformed(format!("object {guid} is not a Page")))
    }

    /// Waits for a `request` event whose payload satisfies `predicate`.
    pub async fn wait_for_request<F>(&self, predicate: F, timeout: Option<Duration>) -> Result<Value>
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.base
            .events()
            .wait_for(EventFilter::named("request"), predicate, timeout)
            .wait()
            .await
    }

    /// Waits for a `response` event whose payload satisfies `predicate`.
    pub async fn wait_for_response<F>(
        &self,
        predicate: F,
        timeout: Option<Duration>,
    ) -> Result<Value>
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.base
            .events()
            .wait_for(EventFilter::named("response"), predicate, timeout)
            .wait()
            .await
    }

    /// Registers a console-message listener; the returned handle removes
    /// it on drop.
    pub fn on_console<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.base.events().on("console", callback);
        Subscription::new(self.base.events(), id)
    }

    /// Asks the driver to close the page. Tolerant of racing with the
    /// driver's own `__dispose__`.
    pub async fn close(&self) -> Result<()> {
        if self.base.is_disposed() {
            return Ok(());
        }
        match self.base.channel().send_no_result("close", json!({})).await {
            Err(e) if e.is_object_disposed() || e.is_connection_closed() => Ok(()),
            other => other,
        }
    }
}
