//! drover: client proxy layer for the browser-automation driver.
//!
//! Builds on `drover-runtime` to expose typed proxies for the objects
//! the driver announces: a [`Session`] owns the connection and driver
//! process; [`Browser`], [`BrowserContext`], [`Page`] and [`Frame`]
//! wrap remote objects by guid and route their events.
//!
//! # Example
//!
//! ```ignore
//! use drover::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::launch().await?;
//!     let browser = session.launch_browser().await?;
//!     let context = browser.new_context().await?;
//!     let page = context.new_page().await?;
//!
//!     page.goto("https://example.com").await?;
//!     let title = page.evaluate("document.title").await?;
//!     println!("{title}");
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

mod browser;
mod browser_context;
mod frame;
mod macros;
mod object_factory;
mod page;
mod session;
mod subscription;

pub use browser::Browser;
pub use browser_context::BrowserContext;
pub use frame::Frame;
pub use object_factory::ProxyFactory;
pub use page::Page;
pub use session::Session;
pub use subscription::Subscription;

pub use drover_runtime::{DEFAULT_TIMEOUT, Error, Result};
