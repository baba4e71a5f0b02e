use futures::{SinkExt, StreamExt};
use std::{io, pin::Pin, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use super::codec::{Frame, LineCodec, MAX_LINE_LENGTH};
use super::{ProtoError, Result};

trait LineStream:
    futures::Sink<String, Error = io::Error> + futures::Stream<Item = io::Result<Frame>> + Send
{
}

impl<T> LineStream for T where
    T: futures::Sink<String, Error = io::Error> + futures::Stream<Item = io::Result<Frame>> + Send
{
}

/// An open line-oriented link to one device.
pub struct Connection {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    stream: Option<Pin<Box<dyn LineStream>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("timeout", &self.timeout)
            .field("is_open", &self.is_open())
            .finish()
    }
}

/// Opens a serial port (8N1, no flow control).
pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Connection> {
    let mut port = tokio_serial::new(port_name, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(timeout)
        .open_native_async()
        .map_err(|err| open_error(port_name, err))?;

    #[cfg(unix)]
    port.set_exclusive(false)
        .map_err(|err| open_error(port_name, err))?;

    debug!(port = port_name, baud_rate, "serial port opened");
    Ok(Connection::new(port_name, baud_rate, timeout, port))
}

fn open_error(port_name: &str, err: tokio_serial::Error) -> ProtoError {
    match err.kind() {
        tokio_serial::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
            ProtoError::PermissionDenied {
                port: port_name.to_string(),
            }
        }
        _ => ProtoError::PortUnavailable {
            port: port_name.to_string(),
            reason: err.to_string(),
        },
    }
}

impl Connection {
    /// Wraps any byte stream, e.g. an already opened port.
    pub fn new<T>(port_name: &str, baud_rate: u32, timeout: Duration, io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let stream = LineCodec::default().framed(io);
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout,
            stream: Some(Box::pin(stream)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut Pin<Box<dyn LineStream>>> {
        self.stream.as_mut().ok_or_else(|| {
            ProtoError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ))
        })
    }

    fn timed_out(&self) -> ProtoError {
        ProtoError::Timeout {
            port: self.port_name.clone(),
            timeout: self.timeout,
        }
    }

    /// Writes `text` plus terminator and flushes.
    pub async fn write_line(&mut self, text: &str) -> Result<()> {
        let timeout = self.timeout;
        let stream = self.stream()?;
        let sent = tokio::time::timeout(timeout, stream.send(text.to_string())).await;
        match sent {
            Ok(result) => result?,
            Err(_) => return Err(self.timed_out()),
        }
        debug!(port = %self.port_name, "sent {:?}", text);
        Ok(())
    }

    /// Next line from the device, terminator stripped.
    pub async fn read_line(&mut self) -> Result<String> {
        let timeout = self.timeout;
        let stream = self.stream()?;
        let received = tokio::time::timeout(timeout, stream.next()).await;
        let frame = match received {
            Ok(frame) => frame,
            Err(_) => return Err(self.timed_out()),
        };
        match frame {
            Some(Ok(Frame::Line(line))) => {
                debug!(port = %self.port_name, "received {:?}", line);
                Ok(line)
            }
            Some(Ok(Frame::Overflow)) => Err(ProtoError::MalformedReply(format!(
                "reply exceeds {} bytes without line terminator",
                MAX_LINE_LENGTH
            ))),
            Some(Err(ioerr)) => Err(ioerr.into()),
            None => Err(ProtoError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by device",
            ))),
        }
    }

    /// Releases the port. Safe to call more than once.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            trace!(port = %self.port_name, "connection closed");
        }
    }
}

/// Anything that can open a [`Connection`] to a named port.
pub trait PortOpener {
    fn open(&self, port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Connection>;
}

impl<F> PortOpener for F
where
    F: Fn(&str, u32, Duration) -> Result<Connection>,
{
    fn open(&self, port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Connection> {
        self(port_name, baud_rate, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::fake::{written_text, FakeBuffer};

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn write_appends_terminator() {
        let fake = FakeBuffer::new("");
        let written = fake.written();
        let mut conn = fake.into_connection("fake", TIMEOUT);
        conn.write_line("gsn?").await.expect("write");
        conn.write_line("p 0.05").await.expect("write");
        assert_eq!(written_text(&written), "gsn?\r\np 0.05\r\n");
    }

    #[tokio::test]
    async fn read_strips_terminator() {
        let mut conn = FakeBuffer::new("12345\r\nOK\r\n").into_connection("fake", TIMEOUT);
        assert_eq!(conn.read_line().await.expect("read"), "12345");
        assert_eq!(conn.read_line().await.expect("read"), "OK");
    }

    #[tokio::test]
    async fn read_times_out_without_terminator() {
        let mut conn = FakeBuffer::new("123")
            .stalling()
            .into_connection("fake", TIMEOUT);
        match conn.read_line().await {
            Err(ProtoError::Timeout { port, timeout }) => {
                assert_eq!(port, "fake");
                assert_eq!(timeout, TIMEOUT);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn overlong_reply_is_malformed_and_skipped() {
        let mut replies = vec![b'x'; MAX_LINE_LENGTH + 100];
        replies.extend_from_slice(b"\r\nOK\r\n");
        let mut conn = FakeBuffer::new(replies).into_connection("fake", TIMEOUT);
        assert!(matches!(
            conn.read_line().await,
            Err(ProtoError::MalformedReply(_))
        ));
        assert_eq!(conn.read_line().await.expect("read"), "OK");
    }

    #[tokio::test]
    async fn write_times_out() {
        let fake = FakeBuffer::new("").stalling_writes();
        let written = fake.written();
        let mut conn = fake.into_connection("fake", TIMEOUT);
        match conn.write_line("l0").await {
            Err(ProtoError::Timeout { port, .. }) => assert_eq!(port, "fake"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(conn.is_open());
        assert_eq!(written_text(&written), "");
    }

    #[tokio::test]
    async fn eof_is_an_io_error() {
        let mut conn = FakeBuffer::new("").into_connection("fake", TIMEOUT);
        match conn.read_line().await {
            Err(ProtoError::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let closes = std::sync::Arc::default();
        let mut conn = FakeBuffer::new("")
            .count_closes(&closes)
            .into_connection("fake", TIMEOUT);
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(matches!(
            conn.write_line("l0").await,
            Err(ProtoError::Io(_))
        ));
    }

    #[tokio::test]
    async fn open_missing_port_fails() {
        match open("/dev/does-not-exist-cobolt", crate::DEFAULT_BAUDRATE, TIMEOUT) {
            Err(ProtoError::PortUnavailable { port, .. }) => {
                assert_eq!(port, "/dev/does-not-exist-cobolt")
            }
            Err(ProtoError::PermissionDenied { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
