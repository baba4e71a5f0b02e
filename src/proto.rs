use std::time::Duration;

use self::command::ModelFamily;

pub mod codec;
pub mod command;
pub mod resolver;
pub mod response;
pub mod transport;

#[cfg(test)]
pub mod fake;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("{port}: port unavailable ({reason})")]
    PortUnavailable { port: String, reason: String },
    #[error("{port}: permission denied")]
    PermissionDenied { port: String },
    #[error("{port}: no reply within {timeout:?}")]
    Timeout { port: String, timeout: Duration },

    #[error("I/O error: {:?}", _0)]
    Io(#[from] std::io::Error),

    #[error("Serial I/O error: {:?}", _0)]
    Serial(#[from] tokio_serial::Error),

    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    #[error("Unknown state {token:?} in reply to {command}")]
    UnknownState { command: String, token: String },
    #[error("Device error (code {code:?}): {message}")]
    Protocol { code: Option<u32>, message: String },
    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument { command: String, reason: String },

    #[error("No device with serial number {0} found")]
    DeviceNotFound(String),

    #[error("Connecting to {target} failed: {source}")]
    ConnectFailed {
        target: String,
        source: Box<ProtoError>,
    },
    #[error("Session was closed")]
    SessionClosed,
    #[error("Session is busy with another request")]
    SessionBusy,

    #[error("{command} is not supported by {family} lasers")]
    Unsupported {
        command: &'static str,
        family: ModelFamily,
    },
    #[error("{port}: not a recognized laser ({reason})")]
    UnrecognizedDevice { port: String, reason: String },
}

impl ProtoError {
    /// Device reported the failure itself, the link is fine.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

pub type Result<T> = std::result::Result<T, ProtoError>;
