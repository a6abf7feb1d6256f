//! Frame proxy.
//!
//! Navigation and DOM operations happen on frames; [`crate::Page`]
//! delegates to its main frame. The proxy tracks the frame's current url
//! and reached load states from `navigated` and `loadstate` events.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use drover_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use drover_runtime::{DEFAULT_TIMEOUT, Error, EventFilter, Result};

use crate::macros::remote_object;

/// A frame within a page.
pub struct Frame {
    base: ChannelOwnerImpl,
    url: Mutex<String>,
    load_states: Mutex<HashSet<String>>,
}

remote_object!(Frame, custom_events);

impl Frame {
    pub(crate) fn new(
        parent: Arc<dyn ChannelOwner>,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Self {
        let url = initializer["url"].as_str().unwrap_or_default().to_string();
        let load_states: HashSet<String> = initializer["loadStates"]
            .as_array()
            .map(|states| {
                states
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            base: ChannelOwnerImpl::new(
                ParentOrConnection::Parent(parent),
                type_name,
                guid,
                initializer,
            ),
            url: Mutex::new(url),
            load_states: Mutex::new(load_states),
        }
    }

    fn handle_event(&self, method: &str, params: &Value) {
        match method {
            "loadstate" => {
                let mut states = self.load_states.lock();
                if let Some(added) = params["add"].as_str() {
                    states.insert(added.to_string());
                }
                if let Some(removed) = params["remove"].as_str() {
                    states.remove(removed);
                }
            }
            "navigated" => {
                if let Some(url) = params["url"].as_str() {
                    *self.url.lock() = url.to_string();
                }
            }
            _ => {}
        }
    }

    /// The frame's current url, updated by `navigated` events.
    pub fn url(&self) -> String {
        self.url.lock().clone()
    }

    /// Navigates the frame.
    pub async fn goto(&self, url: &str) -> Result<Value> {
        self.base
            .channel()
            .send(
                "goto",
                json!({
                    "url": url,
                    "timeout": DEFAULT_TIMEOUT.as_millis() as u64,
                }),
            )
            .await
    }

    /// Clicks the first element matching `selector`.
    pub async fn click(&self, selector: &str) -> Result<()> {
        self.base
            .channel()
            .send_no_result("click", json!({"selector": selector}))
            .await
    }

    /// Evaluates a JavaScript expression in the frame, returning the
    /// driver-serialized value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let mut result: Value = self
            .base
            .channel()
            .send("evaluateExpression", json!({"expression": expression}))
            .await?;
        Ok(result["value"].take())
    }

    /// Waits until the frame reaches `state` ("load", "domcontentloaded",
    /// "networkidle"). Resolves immediately if the state was already
    /// reached.
    pub async fn wait_for_load_state(&self, state: &str, timeout: Option<Duration>) -> Result<()> {
        let wanted = state.to_string();
        // Waiter goes in before the re-check so a loadstate event landing
        // between the two cannot be lost.
        let waiter = self.base.events().wait_for(
            EventFilter::named("loadstate"),
            move |params| params["add"].as_str() == Some(wanted.as_str()),
            timeout,
        );
        if self.load_states.lock().contains(state) {
            return Ok(());
        }
        waiter.wait().await.map(drop)
    }
}

pub(crate) fn downcast_frame(object: Arc<dyn ChannelOwner>) -> Result<Arc<Frame>> {
    let guid: Arc<str> = Arc::from(object.guid());
    object
        .downcast_arc::<Frame>()
        .map_err(|_| Error::Malformed(format!("object {guid} is not a Frame")))
}
