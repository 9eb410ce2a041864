use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::logging::Logger;
use crate::tls::{ClientTls, ServerTls};

/// Frames larger than this are refused by both ends.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,

    pub tls: Option<ServerTls>,

    pub max_frame_length: usize,
}

impl ServerConfig {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            tls: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    pub fn with_tls(mut self, tls: ServerTls) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }
}

/// How a client establishes its connection. Without TLS the channel is plaintext.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub timeout: Duration,

    pub tls: Option<ClientTls>,

    pub max_frame_length: usize,

    pub logger: Logger,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: None,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            logger: Logger::disabled(),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: ClientTls) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn is_insecure(&self) -> bool {
        self.tls.is_none()
    }
}

/// Per-call knobs. The default call waits as long as the connection lives.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Duration>,

    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_permissive() {
        let connect = ConnectOptions::default();
        assert!(connect.is_insecure());
        assert_eq!(connect.timeout, DEFAULT_CONNECT_TIMEOUT);

        let call = CallOptions::default();
        assert!(call.deadline.is_none());
        assert!(call.cancel.is_none());

        let server = ServerConfig::new(":8080");
        assert!(server.tls.is_none());
        assert_eq!(server.max_frame_length, DEFAULT_MAX_FRAME_LENGTH);
    }

    #[test]
    fn builders_override_defaults() {
        let call = CallOptions::new().with_deadline(Duration::from_millis(250));
        assert_eq!(call.deadline, Some(Duration::from_millis(250)));

        let connect = ConnectOptions::new()
            .with_timeout(Duration::from_secs(1))
            .with_max_frame_length(1024);
        assert_eq!(connect.timeout, Duration::from_secs(1));
        assert_eq!(connect.max_frame_length, 1024);
    }
}
