//! Byte transport between the client and the driver process.
//!
//! The driver speaks length-prefixed JSON over stdio: every frame is a
//! 4-byte little-endian `u32` length followed by that many bytes of JSON.
//! The transport resolves message boundaries and hands each decoded
//! [`Value`] to the connection; decoding into the typed message union is
//! the connection's job.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

#[cfg(test)]
mod tests;

/// Write half of a transport: encodes and sends one message per call.
pub trait Transport: Send {
    /// Sends a single message to the driver.
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Read half of a transport: drains the pipe until it closes.
///
/// Each fully-framed inbound message is forwarded to the channel handed
/// out by the transport constructor. The channel closing is the
/// exactly-once close signal the connection observes.
pub trait TransportReceiver: Send {
    /// Runs the read loop to completion.
    ///
    /// Returns `Ok(())` on clean end-of-stream at a frame boundary, or an
    /// error if the pipe dies mid-frame.
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Bundle of transport halves consumed by a connection.
pub struct TransportParts {
    pub sender: Box<dyn Transport>,
    pub receiver: Box<dyn TransportReceiver>,
    pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Transport over a pair of byte pipes (driver stdio, or in-memory
/// duplex streams in tests).
pub struct PipeTransport<W, R> {
    sender: PipeTransportSender<W>,
    receiver: PipeTransportReceiver<R>,
}

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
    writer: W,
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
    reader: R,
    tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Creates a transport writing to `writer` and reading from `reader`.
    ///
    /// Returns the transport together with the receiver end of the inbound
    /// message channel.
    pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            sender: PipeTransportSender { writer },
            receiver: PipeTransportReceiver { reader, tx },
        };
        (transport, rx)
    }

    /// Splits the transport into its sender and receiver halves.
    pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
        (self.sender, self.receiver)
    }

    /// Boxes the halves into the bundle a connection consumes.
    pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
        let (sender, receiver) = self.into_parts();
        TransportParts {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
            message_rx,
        }
    }

    /// Runs the read loop without splitting. Test convenience.
    pub async fn run(&mut self) -> Result<()> {
        self.receiver.read_loop().await
    }
}

impl<W> PipeTransportSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Frames and writes one message.
    pub async fn send(&mut self, message: Value) -> Result<()> {
        let body = serde_json::to_vec(&message)?;
        let length = (body.len() as u32).to_le_bytes();
        self.writer
            .write_all(&length)
            .await
            .map_err(|e| Error::Transport(format!("failed to write frame header: {e}")))?;
        self.writer
            .write_all(&body)
            .await
            .map_err(|e| Error::Transport(format!("failed to write frame body: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush frame: {e}")))?;
        Ok(())
    }
}

impl<R> PipeTransportReceiver<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_loop(&mut self) -> Result<()> {
        loop {
            let mut header = [0u8; 4];
            let mut filled = 0;
            while filled < header.len() {
                let n = self
                    .reader
                    .read(&mut header[filled..])
                    .await
                    .map_err(|e| Error::Transport(format!("failed to read frame header: {e}")))?;
                if n == 0 {
                    if filled == 0 {
                        // Clean end-of-stream at a frame boundary.
                        return Ok(());
                    }
                    return Err(Error::Transport(format!(
                        "pipe closed mid-header after {filled} bytes"
                    )));
                }
                filled += n;
            }

            let length = u32::from_le_bytes(header) as usize;
            let mut body = vec![0u8; length];
            self.reader
                .read_exact(&mut body)
                .await
                .map_err(|e| Error::Transport(format!("pipe closed mid-frame: {e}")))?;

            let message: Value = match serde_json::from_slice(&body) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, length, "dropping frame with invalid JSON");
                    continue;
                }
            };

            if self.tx.send(message).is_err() {
                // Consumer is gone; nothing left to deliver to.
                return Ok(());
            }
        }
    }
}

impl<W> Transport for PipeTransportSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.send(message))
    }
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    fn run(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.read_loop())
    }
}
