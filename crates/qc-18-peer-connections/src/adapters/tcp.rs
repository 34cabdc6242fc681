use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::trace;

use crate::ports::ByteChannel;

// ============================================================================
// TcpChannel - tokio TCP stream behind the ByteChannel port
// ============================================================================

/// TCP transport using tokio readiness (`readable`/`writable`) with
/// non-blocking `try_read`/`try_write`.
///
/// Closing drops the stream, which closes the socket.
#[derive(Debug)]
pub struct TcpChannel {
    stream: Option<TcpStream>,
    peer_addr: Option<SocketAddr>,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        // Envelopes are small; don't wait for coalescing.
        let _ = stream.set_nodelay(true);
        let peer_addr = stream.peer_addr().ok();
        Self {
            stream: Some(stream),
            peer_addr,
        }
    }

    /// Remote socket address, if it was known at construction.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

#[async_trait]
impl ByteChannel for TcpChannel {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.try_read(buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.try_write(buf)
    }

    async fn readable(&self) -> io::Result<()> {
        self.stream()?.readable().await
    }

    async fn writable(&self) -> io::Result<()> {
        self.stream()?.writable().await
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            trace!(peer = ?self.peer_addr, "TCP channel closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
