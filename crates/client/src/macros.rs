//! Delegation macro for remote object proxies.
//!
//! Every proxy embeds a `ChannelOwnerImpl` named `base`; the macro writes
//! the `ChannelOwner` delegation so each proxy file only carries its own
//! behavior. The `custom_events` form routes incoming protocol events
//! through the proxy's `handle_event` before the default emit.

macro_rules! remote_object {
    ($ty:ident) => {
        remote_object!(@impl $ty, (|this: &$ty, method: &str, params: ::serde_json::Value| {
            this.base.on_event(method, params)
        }));
    };
    ($ty:ident, custom_events) => {
        remote_object!(@impl $ty, (|this: &$ty, method: &str, params: ::serde_json::Value| {
            this.handle_event(method, &params);
            this.base.on_event(method, params)
        }));
    };
    (@impl $ty:ident, ($on_event:expr)) => {
        impl ::drover_runtime::channel_owner::private::Sealed for $ty {}

        impl ::drover_runtime::ChannelOwner for $ty {
            fn guid(&self) -> &str {
                self.base.guid()
            }

            fn type_name(&self) -> &str {
                self.base.type_name()
            }

            fn parent(&self) -> Option<::std::sync::Arc<dyn ::drover_runtime::ChannelOwner>> {
                self.base.parent()
            }

            fn connection(&self) -> ::std::sync::Arc<dyn ::drover_runtime::ConnectionLike> {
                self.base.connection()
            }

            fn initializer(&self) -> &::serde_json::Value {
                self.base.initializer()
            }

            fn channel(&self) -> &::drover_runtime::Channel {
                self.base.channel()
            }

            fn events(&self) -> &::std::sync::Arc<::drover_runtime::EventEmitter> {
                self.base.events()
            }

            fn on_event(&self, method: &str, params: ::serde_json::Value) {
                ($on_event)(self, method, params)
            }

            fn dispose(&self, reason: ::drover_runtime::DisposeReason) {
                self.base.dispose(reason)
            }

            fn adopt(&self, child: ::std::sync::Arc<dyn ::drover_runtime::ChannelOwner>) {
                self.base.adopt(child)
            }

            fn add_child(
                &self,
                guid: ::std::sync::Arc<str>,
                child: ::std::sync::Arc<dyn ::drover_runtime::ChannelOwner>,
            ) {
                self.base.add_child(guid, child)
            }

            fn remove_child(&self, guid: &str) {
                self.base.remove_child(guid)
            }

            fn is_disposed(&self) -> bool {
                self.base.is_disposed()
            }
        }
    };
}

pub(crate) use remote_object;
