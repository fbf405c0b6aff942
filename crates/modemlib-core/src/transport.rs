//! Transport trait for modem port communication.
//!
//! The [`Transport`] trait abstracts over the byte-stream link to a modem
//! command port. The serial implementation lives in `modemlib-transport`;
//! `MockTransport` in `modemlib-test-harness` replays scripted exchanges so
//! the AT engine and the vendor plugins can be tested without hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a modem port.
///
/// Implementations only move bytes. Command framing, final result code
/// recognition, and unsolicited message extraction are handled by the AT
/// port task that owns the transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the modem.
    ///
    /// Returns once all bytes have been handed to the underlying port.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the modem into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the port.
    ///
    /// After `close()`, `send()` and `receive()` return
    /// [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the port is currently open.
    fn is_connected(&self) -> bool;
}
