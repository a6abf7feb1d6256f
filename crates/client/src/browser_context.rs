//! BrowserContext proxy.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use drover_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use drover_runtime::connection::deserialize_arc_str;
use drover_runtime::{DEFAULT_TIMEOUT, Error, Result};

use crate::macros::remote_object;
use crate::page::Page;

/// An isolated browser session (cookies, storage, pages).
pub struct BrowserContext {
    base: ChannelOwnerImpl,
}

remote_object!(BrowserContext);

impl BrowserContext {
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

    /// Opens a new page in this context.
    pub async fn new_page(&self) -> Result<Arc<Page>> {
        #[derive(Deserialize)]
        struct NewPageResult {
            page: ObjectReference,
        }
        #[derive(Deserialize)]
        struct ObjectReference {
            #[serde(deserialize_with = "deserialize_arc_str")]
            guid: Arc<str>,
        }

        let result: NewPageResult = self.base.channel().send("newPage", json!({})).await?;
        let object = self
            .base
            .connection()
            .wait_for_object(&result.page.guid, DEFAULT_TIMEOUT)
            .await?;
        object.downcast_arc::<Page>().map_err(|_| {
            Error::Malformed(format!("object {} is not a Page", result.page.guid))
        })
    }

    /// Closes the context and every page in it.
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
