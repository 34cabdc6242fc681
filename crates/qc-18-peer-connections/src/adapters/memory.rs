use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::ports::ByteChannel;

// ============================================================================
// MemoryChannel - in-process duplex pipe for tests
// ============================================================================

#[derive(Debug, Default)]
struct PipeState {
    buffer: VecDeque<u8>,
    write_closed: bool,
    read_closed: bool,
}

/// One direction of a [`MemoryChannel`] pair.
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    notify: Notify,
}

/// In-memory [`ByteChannel`]. Created in connected pairs; bytes written on
/// one end are read on the other, in order and in whatever chunks the
/// writer used.
#[derive(Debug)]
pub struct MemoryChannel {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    open: bool,
}

impl MemoryChannel {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        let a = Self {
            incoming: Arc::clone(&b_to_a),
            outgoing: Arc::clone(&a_to_b),
            open: true,
        };
        let b = Self {
            incoming: a_to_b,
            outgoing: b_to_a,
            open: true,
        };
        (a, b)
    }

    /// Close only the write side; the peer reads end-of-stream once it
    /// drained what was already written.
    pub fn shutdown_write(&mut self) {
        self.outgoing.state.lock().write_closed = true;
        self.outgoing.notify.notify_one();
    }

    /// Bytes written by the peer and not yet read.
    pub fn pending_incoming(&self) -> usize {
        self.incoming.state.lock().buffer.len()
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::NotConnected))
        }
    }
}

#[async_trait]
impl ByteChannel for MemoryChannel {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let mut state = self.incoming.state.lock();
        if state.buffer.is_empty() {
            if state.write_closed {
                return Ok(0);
            }
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let n = buf.len().min(state.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(state.buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        {
            let mut state = self.outgoing.state.lock();
            if state.read_closed {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            if state.write_closed {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            }
            state.buffer.extend(buf);
        }
        self.outgoing.notify.notify_one();
        Ok(buf.len())
    }

    async fn readable(&self) -> io::Result<()> {
        self.ensure_open()?;
        loop {
            {
                let state = self.incoming.state.lock();
                if !state.buffer.is_empty() || state.write_closed {
                    return Ok(());
                }
            }
            self.incoming.notify.notified().await;
        }
    }

    async fn writable(&self) -> io::Result<()> {
        self.ensure_open()
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.outgoing.state.lock().write_closed = true;
        self.outgoing.notify.notify_one();
        let mut incoming = self.incoming.state.lock();
        incoming.read_closed = true;
        incoming.buffer.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}
