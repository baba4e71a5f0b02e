use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::transport::Connection;

/// In-memory stand-in for a serial port: serves canned reply bytes and
/// records everything written to it.
pub(crate) struct FakeBuffer {
    response_buf: Vec<u8>,
    written: Arc<Mutex<Vec<u8>>>,
    closed: Option<Arc<AtomicUsize>>,
    stall: bool,
    stall_writes: bool,
}

impl FakeBuffer {
    pub(crate) fn new(response_buf: impl AsRef<[u8]>) -> Self {
        Self {
            response_buf: response_buf.as_ref().to_vec(),
            written: Arc::default(),
            closed: None,
            stall: false,
            stall_writes: false,
        }
    }

    /// Once the replies are used up, reads hang instead of hitting EOF.
    pub(crate) fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Writes never complete, like a port with a stuck transmitter.
    pub(crate) fn stalling_writes(mut self) -> Self {
        self.stall_writes = true;
        self
    }

    /// Counts how often a buffer is dropped, i.e. its handle closed.
    pub(crate) fn count_closes(mut self, counter: &Arc<AtomicUsize>) -> Self {
        self.closed = Some(Arc::clone(counter));
        self
    }

    pub(crate) fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    pub(crate) fn into_connection(self, port: &str, timeout: Duration) -> Connection {
        Connection::new(port, crate::DEFAULT_BAUDRATE, timeout, self)
    }
}

pub(crate) fn written_text(written: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = written.lock().expect("written lock").clone();
    String::from_utf8(bytes).expect("ASCII only")
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        if let Some(counter) = &self.closed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl tokio::io::AsyncRead for FakeBuffer {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if !self.response_buf.is_empty() {
            let c = if buf.remaining() < self.response_buf.len() {
                buf.remaining()
            } else {
                self.response_buf.len()
            };
            buf.put_slice(&self.response_buf[0..c]);
            self.response_buf.drain(0..c);
        } else if self.stall {
            // Nobody wakes us, the caller's timeout will.
            return std::task::Poll::Pending;
        }
        std::task::Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncWrite for FakeBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::result::Result<usize, std::io::Error>> {
        if self.stall_writes {
            return std::task::Poll::Pending;
        }
        self.written
            .lock()
            .expect("written lock")
            .extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}
