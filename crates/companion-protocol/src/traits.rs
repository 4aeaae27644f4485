//! Traits for Companion transport abstraction.

use async_trait::async_trait;
use companion_core::error::Result;

/// Byte-stream transport to a Companion device.
///
/// `send` only queues data for writing; delivery failures surface on a later
/// `read`.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait CompanionTransport: Send {
    /// Open the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Queue bytes for sending.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Wait for inbound bytes and return everything received so far.
    async fn read(&mut self) -> Result<Vec<u8>>;

    /// Release the connection. Safe to call more than once.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}
