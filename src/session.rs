use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::proto::command::{cmd, encode, Arg, CommandDescriptor, ReplyShape, Scalar};
use crate::proto::resolver::{self, PortDescriptor, PortResolver};
use crate::proto::response::{decode, ReplyCollector, Value};
use crate::proto::transport::{self, Connection, PortOpener};
use crate::proto::{ProtoError, Result};
use crate::{DEFAULT_BAUDRATE, DEFAULT_TIMEOUT};

/// Link parameters used when connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub baud_rate: u32,
    /// Read/write timeout of the session connection.
    pub timeout: Duration,
    /// Timeout for each port probed while looking up a serial number.
    pub probe_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUDRATE,
            timeout: DEFAULT_TIMEOUT,
            probe_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// What to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Port(String),
    Serial(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Port(port) => write!(f, "port {}", port),
            Target::Serial(serial) => write!(f, "serial number {}", serial),
        }
    }
}

#[derive(Debug)]
struct Inner {
    conn: Option<Connection>,
    last_error: Option<String>,
}

/// One device on one connection.
///
/// Requests are strictly one at a time: a `send` issued while another one is
/// in flight fails with [`ProtoError::SessionBusy`] instead of queueing.
/// Failures never close the connection, there are no retries. Whether a
/// command is safe to repeat is up to the caller.
#[derive(Debug)]
pub struct Session {
    port_name: String,
    inner: Mutex<Inner>,
}

impl Session {
    /// Connects to a serial port, looking it up first if `target` is a serial number.
    pub async fn connect(target: Target, settings: &Settings) -> Result<Self> {
        Self::connect_with(&transport::open, resolver::list_ports, target, settings).await
    }

    /// Like [`Session::connect`] with custom port access.
    pub async fn connect_with<O, L>(
        opener: &O,
        list_ports: L,
        target: Target,
        settings: &Settings,
    ) -> Result<Self>
    where
        O: PortOpener + ?Sized,
        L: FnOnce() -> Result<Vec<PortDescriptor>>,
    {
        let wrap = |err: ProtoError| ProtoError::ConnectFailed {
            target: target.to_string(),
            source: Box::new(err),
        };
        let port_name = match &target {
            Target::Port(port) => port.clone(),
            Target::Serial(serial) if serial.trim().is_empty() => {
                return Err(wrap(ProtoError::InvalidArgument {
                    command: cmd::SERIAL_NUMBER.wire_name.to_string(),
                    reason: "empty serial number".into(),
                }));
            }
            Target::Serial(serial) => {
                let candidates = list_ports().map_err(wrap)?;
                PortResolver::new(opener, settings.baud_rate, settings.probe_timeout)
                    .resolve_by_serial(serial, &candidates)
                    .await
                    .map_err(wrap)?
            }
        };
        let conn = opener
            .open(&port_name, settings.baud_rate, settings.timeout)
            .map_err(wrap)?;
        info!(port = %port_name, "connected ({})", target);
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            port_name: conn.port_name().to_string(),
            inner: Mutex::new(Inner {
                conn: Some(conn),
                last_error: None,
            }),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Sends one command and waits for its reply.
    pub async fn send(&self, command: &CommandDescriptor, args: &[Arg]) -> Result<Value> {
        let mut inner = self.inner.try_lock().map_err(|_| ProtoError::SessionBusy)?;
        let result = match encode(command, args) {
            Ok(line) => Self::exchange(&mut inner, &line, command.wire_name, &command.reply).await,
            Err(err) => Err(err),
        };
        Self::record(&mut inner, &result);
        result
    }

    /// Sends a caller-written line, the reply is returned as text.
    pub async fn send_raw(&self, line: &str) -> Result<Value> {
        let mut inner = self.inner.try_lock().map_err(|_| ProtoError::SessionBusy)?;
        let line = line.trim();
        let command = line.split_whitespace().next().unwrap_or_default().to_string();
        let result = if line.is_empty() || line.contains(['\r', '\n']) {
            Err(ProtoError::InvalidArgument {
                command,
                reason: "raw line must be a single non-empty line".into(),
            })
        } else {
            Self::exchange(
                &mut inner,
                line,
                &command,
                &ReplyShape::Scalar(Scalar::Text),
            )
            .await
        };
        Self::record(&mut inner, &result);
        result
    }

    async fn exchange(
        inner: &mut Inner,
        line: &str,
        command: &str,
        shape: &ReplyShape,
    ) -> Result<Value> {
        let conn = inner.conn.as_mut().ok_or(ProtoError::SessionClosed)?;
        conn.write_line(line).await?;
        let mut reply = ReplyCollector::new(*shape);
        loop {
            let line = conn.read_line().await?;
            if reply.push(line)? {
                break;
            }
        }
        decode(command, shape, reply.lines())
    }

    fn record(inner: &mut Inner, result: &Result<Value>) {
        match result {
            Ok(_) => inner.last_error = None,
            // Nothing happened on the wire, nothing to remember.
            Err(ProtoError::SessionClosed) => {}
            Err(err) => {
                debug!("request failed: {}", err);
                inner.last_error = Some(err.to_string());
            }
        }
    }

    /// Message of the most recent failed request, cleared by the next success.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.conn.is_some()
    }

    /// Releases the connection, waiting for a request in flight. Later
    /// requests fail with [`ProtoError::SessionClosed`].
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut conn) = inner.conn.take() {
            conn.close();
            info!(port = %self.port_name, "session closed");
        }
    }
}
