//! # Driven Ports (Outbound SPI)
//!
//! Collaborators this crate consumes: the raw byte transport and the ban
//! list oracle.

use async_trait::async_trait;
use std::io;

use crate::domain::Address;

/// Non-blocking, readiness-driven byte stream.
///
/// `try_read`/`try_write` never block: they return
/// [`io::ErrorKind::WouldBlock`] when nothing can be done, and `try_read`
/// returns `Ok(0)` once the peer closed its write side. `readable` and
/// `writable` resolve when the next `try_*` call is likely to make
/// progress; spurious wake-ups are allowed.
///
/// # Example Implementation
///
/// ```rust,ignore
/// struct TcpChannel { stream: Option<tokio::net::TcpStream> }
///
/// #[async_trait]
/// impl ByteChannel for TcpChannel {
///     fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
///         self.stream()?.try_read(buf)
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait ByteChannel: Send + Sync {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    async fn readable(&self) -> io::Result<()>;

    async fn writable(&self) -> io::Result<()>;

    /// Release the underlying transport. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Read-only peer reputation oracle.
///
/// Queried concurrently from inbound handshakes and outbound connects;
/// never mutated by this crate.
pub trait BanList: Send + Sync {
    fn is_banned(&self, address: &Address) -> bool;
}
