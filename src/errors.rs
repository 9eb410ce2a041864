use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::response::Status;

/// Failure to turn bytes or text into a message, or a message into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Why a listener could not be bound. Fatal for the server; retrying is up to the caller.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("address {addr} is already in use")]
    AddressInUse { addr: String },

    #[error("permission denied binding {addr}")]
    PermissionDenied { addr: String },

    #[error("invalid bind address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("failed to bind {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl BindError {
    pub(crate) fn from_io(addr: &str, err: io::Error) -> Self {
        let addr = addr.to_string();
        match err.kind() {
            io::ErrorKind::AddrInUse => BindError::AddressInUse { addr },
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied { addr },
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
                BindError::InvalidAddress {
                    addr,
                    reason: err.to_string(),
                }
            }
            _ => BindError::Io { addr, source: err },
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("server {addr} is unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("connecting to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("connection to {addr} refused")]
    Refused { addr: String },

    #[error("TLS handshake with {addr} failed: {reason}")]
    Tls { addr: String, reason: String },
}

impl ConnectError {
    pub(crate) fn from_io(addr: &str, err: io::Error, timeout: Duration) -> Self {
        let addr = addr.to_string();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::Refused { addr },
            io::ErrorKind::TimedOut => ConnectError::Timeout { addr, timeout },
            _ => ConnectError::Unreachable {
                addr,
                reason: err.to_string(),
            },
        }
    }
}

/// Everything a single call can end with besides a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("call canceled")]
    Canceled,

    #[error("handler error: {0}")]
    Handler(String),
}

impl CallError {
    /// Maps a non-`Ok` response status carried in an error frame.
    pub(crate) fn from_status(status: Status, detail: String) -> Self {
        match status {
            Status::MethodNotFound => CallError::MethodNotFound(detail),
            Status::SchemaMismatch => CallError::SchemaMismatch(detail),
            Status::HandlerError => CallError::Handler(detail),
            Status::MalformedMessage | Status::Ok => CallError::MalformedMessage(detail),
        }
    }
}

/// A codec failure on the caller's side. `SchemaMismatch` and `MethodNotFound`
/// are reserved for rejections reported by the server.
impl From<CodecError> for CallError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::SchemaMismatch(reason)
            | CodecError::Malformed(reason)
            | CodecError::Encode(reason) => CallError::MalformedMessage(reason),
        }
    }
}

/// Failure reported by a service handler. Travels to the client inside the response frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct HandlerError {
    pub reason: String,
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read PEM data from {path}: {reason}")]
    Pem { path: String, reason: String },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("invalid server name {0}")]
    InvalidServerName(String),

    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("unknown log level {0:?}")]
    InvalidLevel(String),
}

/// Umbrella error for callers that drive a whole server or client session.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Log(#[from] LogInitError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_classifies_io_kinds() {
        let err = BindError::from_io("127.0.0.1:1", io::Error::from(io::ErrorKind::AddrInUse));
        assert!(matches!(err, BindError::AddressInUse { .. }));

        let err = BindError::from_io("127.0.0.1:1", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, BindError::PermissionDenied { .. }));

        let err = BindError::from_io("10.1.2.3:1", io::Error::from(io::ErrorKind::AddrNotAvailable));
        assert!(matches!(err, BindError::InvalidAddress { .. }));
    }

    #[test]
    fn connect_error_classifies_io_kinds() {
        let timeout = Duration::from_secs(1);
        let err = ConnectError::from_io("a:1", io::Error::from(io::ErrorKind::ConnectionRefused), timeout);
        assert!(matches!(err, ConnectError::Refused { .. }));

        let err = ConnectError::from_io("a:1", io::Error::from(io::ErrorKind::TimedOut), timeout);
        assert!(matches!(err, ConnectError::Timeout { timeout: t, .. } if t == timeout));

        let err = ConnectError::from_io("a:1", io::Error::from(io::ErrorKind::Other), timeout);
        assert!(matches!(err, ConnectError::Unreachable { .. }));
    }

    #[test]
    fn local_codec_errors_are_malformed_messages() {
        assert_eq!(
            CallError::from(CodecError::SchemaMismatch("x".into())),
            CallError::MalformedMessage("x".into())
        );
        assert_eq!(
            CallError::from(CodecError::Malformed("y".into())),
            CallError::MalformedMessage("y".into())
        );
    }

    #[test]
    fn status_maps_to_call_error() {
        assert_eq!(
            CallError::from_status(Status::MethodNotFound, "Greeter.Nope".into()),
            CallError::MethodNotFound("Greeter.Nope".into())
        );
        assert_eq!(
            CallError::from_status(Status::HandlerError, "boom".into()),
            CallError::Handler("boom".into())
        );
    }
}
