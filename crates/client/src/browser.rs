//! Browser proxy.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use drover_runtime::channel_owner::{ChannelOwnerImpl, ParentOrConnection};
use drover_runtime::connection::deserialize_arc_str;
use drover_runtime::{DEFAULT_TIMEOUT, Error, Result};

use crate::browser_context::BrowserContext;
use crate::macros::remote_object;

/// A running browser instance.
pub struct Browser {
    base: ChannelOwnerImpl,
}

remote_object!(Browser);

impl Browser {
    pub(crate) fn new(
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Self {
        Self {
            base: ChannelOwnerImpl::new(parent, type_name, guid, initializer),
        }
    }

    /// Browser version string from the initializer.
    pub fn version(&self) -> Option<&str> {
        self.base.initializer()["version"].as_str()
    }

    /// Creates an isolated browser context.
    pub async fn new_context(&self) -> Result<Arc<BrowserContext>> {
        #[derive(Deserialize)]
        struct NewContextResult {
            context: ObjectReference,
        }
        #[derive(Deserialize)]
        struct ObjectReference {
            #[serde(deserialize_with = "deserialize_arc_str")]
            guid: Arc<str>,
        }

        let result: NewContextResult = self.base.channel().send("newContext", json!({})).await?;
        let object = self
            .base
            .connection()
            .wait_for_object(&result.context.guid, DEFAULT_TIMEOUT)
            .await?;
        object.downcast_arc::<BrowserContext>().map_err(|_| {
            Error::Malformed(format!(
                "object {} is not a BrowserContext",
                result.context.guid
            ))
        })
    }

    /// Closes the browser and everything under it.
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
