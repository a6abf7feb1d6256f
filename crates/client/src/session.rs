//! Session: owns the connection, its run loop, and optionally the
//! driver process.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;

use drover_runtime::transport::TransportParts;
use drover_runtime::{
    Connection, DEFAULT_TIMEOUT, DriverProcess, Error, Result,
};

use crate::browser::Browser;
use crate::object_factory::ProxyFactory;

/// A live session against one driver process or transport.
pub struct Session {
    connection: Arc<Connection>,
    driver: Mutex<Option<DriverProcess>>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Launches the driver process and connects over its stdio pipes.
    pub async fn launch() -> Result<Arc<Self>> {
        let mut driver = DriverProcess::launch().await?;
        let parts = driver.transport_parts()?;
        Ok(Self::connect_inner(parts, Some(driver)))
    }

    /// Connects over an externally supplied transport. Used by tests to
    /// drive the session from an in-memory pipe.
    pub fn connect(parts: TransportParts) -> Arc<Self> {
        Self::connect_inner(parts, None)
    }

    fn connect_inner(parts: TransportParts, driver: Option<DriverProcess>) -> Arc<Self> {
        let connection = Arc::new(Connection::new(parts));
        connection.set_factory(Arc::new(ProxyFactory));

        let run_conn = Arc::clone(&connection);
        let run_handle = tokio::spawn(async move { run_conn.run().await });

        Arc::new(Self {
            connection,
            driver: Mutex::new(driver),
            run_handle: Mutex::new(Some(run_handle)),
        })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Asks the driver to launch a browser and resolves its proxy.
    pub async fn launch_browser(&self) -> Result<Arc<Browser>> {
        let result = self
            .connection
            .send_message("", "launchBrowser", json!({}))
            .await?;
        let guid = result["browser"]["guid"]
            .as_str()
            .ok_or_else(|| Error::Malformed("launchBrowser result missing browser guid".to_string()))?
            .to_string();

        let object = self.connection.objects().wait_for(&guid, DEFAULT_TIMEOUT).await?;
        object
            .downcast_arc::<Browser>()
            .map_err(|_| Error::Malformed(format!("object {guid} is not a Browser")))
    }

    /// Closes the connection, stops the run loop, and shuts the driver
    /// process down if this session launched one.
    pub async fn close(&self) -> Result<()> {
        self.connection.close("session closed");

        let handle = self.run_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            driver.shutdown().await?;
        }
        Ok(())
    }
}
