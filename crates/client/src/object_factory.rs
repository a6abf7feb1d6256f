//! Maps protocol type names to proxy constructors.
//!
//! The connection calls into this factory whenever the driver announces
//! a new object with `__create__`. Type names without a dedicated proxy
//! get a generic passthrough object so their events still flow and
//! unknown types stay forward-compatible.

use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use drover_runtime::channel_owner::{ChannelOwner, ChannelOwnerImpl, ParentOrConnection};
use drover_runtime::{Error, ObjectFactory, Result};

use crate::browser::Browser;
use crate::browser_context::BrowserContext;
use crate::frame::Frame;
use crate::macros::remote_object;
use crate::page::Page;

/// Factory wired into the runtime connection by [`crate::Session`].
pub struct ProxyFactory;

impl ObjectFactory for ProxyFactory {
    fn create_object(
        &self,
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ChannelOwner>>> + Send + '_>> {
        Box::pin(async move {
            let object: Arc<dyn ChannelOwner> = match type_name.as_str() {
                "Browser" => Arc::new(Browser::new(parent, type_name, guid, initializer)),
                "BrowserContext" => Arc::new(BrowserContext::new(
                    require_parent(parent, "BrowserContext")?,
                    type_name,
                    guid,
                    initializer,
                )),
                "Page" => Arc::new(Page::new(
                    require_parent(parent, "Page")?,
                    type_name,
                    guid,
                    initializer,
                )),
                "Frame" => Arc::new(Frame::new(
                    require_parent(parent, "Frame")?,
                    type_name,
                    guid,
                    initializer,
                )),
                // Known passthrough types: events flow, no typed surface.
                "Request" | "Response" | "Worker" | "CDPSession" => {
                    Arc::new(RemoteProxy::new(parent, type_name, guid, initializer))
                }
                other => {
                    debug!(type_name = other, %guid, "unknown protocol type, using passthrough proxy");
                    Arc::new(RemoteProxy::new(parent, type_name, guid, initializer))
                }
            };
            Ok(object)
        })
    }
}

fn require_parent(parent: ParentOrConnection, type_name: &str) -> Result<Arc<dyn ChannelOwner>> {
    match parent {
        ParentOrConnection::Parent(p) => Ok(p),
        ParentOrConnection::Connection(_) => Err(Error::Malformed(format!(
            "{type_name} must have a parent object"
        ))),
    }
}

/// Generic proxy for types without a dedicated client surface.
pub struct RemoteProxy {
    base: ChannelOwnerImpl,
}

remote_object!(RemoteProxy);

impl RemoteProxy {
    fn new(
        parent: ParentOrConnection,
        type_name: String,
        guid: Arc<str>,
        initializer: Value,
    ) -> Self {
        Self {
            base: ChannelOwnerImpl::new(parent, type_name, guid, initializer),
        }
    }
}
